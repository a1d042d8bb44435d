use crate::track::{Segment, SegmentKind, Track, TrackDefinition};

/// Fluent construction of track definitions, mostly for tests.
///
/// ```
/// use relay_race::track::builder::TrackDefinitionBuilder;
///
/// let definition = TrackDefinitionBuilder::new()
///     .track("1")
///         .start("start-and-goal-1", &["segment-1-1"])
///         .normal("segment-1-1", &["start-and-goal-1"])
///         .done()
///     .build();
/// assert_eq!(definition.tracks.len(), 1);
/// ```
#[derive(Default)]
pub struct TrackDefinitionBuilder {
    tracks: Vec<Track>,
    global_segments: Vec<Segment>,
}

impl TrackDefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(self, id: &str) -> TrackBuilder {
        TrackBuilder {
            definition: self,
            track: Track {
                track_id: id.to_string(),
                segments: Vec::new(),
            },
        }
    }

    pub fn global(mut self, id: &str, kind: SegmentKind, next: &[&str]) -> Self {
        self.global_segments.push(Segment::new(id, kind, owned(next)));
        self
    }

    pub fn build(self) -> TrackDefinition {
        TrackDefinition {
            tracks: self.tracks,
            global_segments: self.global_segments,
        }
    }
}

pub struct TrackBuilder {
    definition: TrackDefinitionBuilder,
    track: Track,
}

impl TrackBuilder {
    pub fn start(self, id: &str, next: &[&str]) -> Self {
        self.segment(id, SegmentKind::StartGoal, next)
    }

    pub fn normal(self, id: &str, next: &[&str]) -> Self {
        self.segment(id, SegmentKind::Normal, next)
    }

    pub fn segment(mut self, id: &str, kind: SegmentKind, next: &[&str]) -> Self {
        self.track.segments.push(Segment::new(id, kind, owned(next)));
        self
    }

    pub fn done(mut self) -> TrackDefinitionBuilder {
        self.definition.tracks.push(self.track);
        self.definition
    }
}

fn owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}
