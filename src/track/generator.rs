//! Deterministic track generators.
//!
//! Segment ids follow the naming the workers and tokens expect:
//! `start-and-goal-<t>` for the start segment of track `t`, and
//! `segment-<t>-<c>` for the ordinary segment at position `c`.

use crate::error::TrackError;
use crate::track::{Segment, SegmentKind, Track, TrackDefinition};

pub const GLOBAL_CAESAR: &str = "segment-global-caesar";
pub const GLOBAL_BOTTLENECK: &str = "segment-global-bottleneck";

pub fn start_id(track: usize) -> String {
    format!("start-and-goal-{}", track)
}

/// `num_tracks` simple loops of `length` segments each. A length of 1 makes the
/// start segment loop onto itself.
pub fn generate_circular(num_tracks: usize, length: usize) -> Result<TrackDefinition, TrackError> {
    if num_tracks == 0 || length == 0 {
        return Err(TrackError::Generator(
            "track count and length must both be at least 1".to_string(),
        ));
    }

    let tracks = (1..=num_tracks)
        .map(|t| {
            let start = start_id(t);
            let ring: Vec<String> = std::iter::once(start.clone())
                .chain((1..length).map(|c| format!("segment-{}-{}", t, c)))
                .collect();

            let segments = ring
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    let next = ring[(i + 1) % ring.len()].clone();
                    let kind = if i == 0 { SegmentKind::StartGoal } else { SegmentKind::Normal };
                    Segment::new(id.clone(), kind, vec![next])
                })
                .collect();

            Track {
                track_id: t.to_string(),
                segments,
            }
        })
        .collect();

    Ok(TrackDefinition {
        tracks,
        global_segments: Vec::new(),
    })
}

/// Loops with two contention points shared by every track.
///
/// Position `caesar` of each track is a link into [`GLOBAL_CAESAR`], position
/// `bottleneck` a link into [`GLOBAL_BOTTLENECK`]. Each global segment fans out
/// to a per-track return segment that rejoins its track at the next position.
/// The segment in front of a contention point also offers a bypass: straight to
/// the caesar return, or straight into the global bottleneck. The start segment
/// never does.
pub fn generate_with_contention(
    num_tracks: usize,
    base_segments: usize,
    caesar: usize,
    bottleneck: usize,
) -> Result<TrackDefinition, TrackError> {
    if num_tracks == 0 {
        return Err(TrackError::Generator("track count must be at least 1".to_string()));
    }
    if base_segments < 4 {
        return Err(TrackError::Generator("base segment count must be at least 4".to_string()));
    }
    let valid = 1..=base_segments - 2;
    if !valid.contains(&caesar) || !valid.contains(&bottleneck) || caesar == bottleneck {
        return Err(TrackError::Generator(format!(
            "contention indices must be distinct and within {}..={}",
            valid.start(),
            valid.end()
        )));
    }

    let id_at = |t: usize, c: usize| -> String {
        if c == 0 || c == base_segments {
            start_id(t)
        } else if c == caesar {
            format!("segment-{}-caesar-link", t)
        } else if c == bottleneck {
            format!("segment-{}-bottleneck", t)
        } else {
            format!("segment-{}-{}", t, c)
        }
    };
    let caesar_ret = |t: usize| format!("segment-{}-caesar-ret", t);
    let bottleneck_ret = |t: usize| format!("segment-{}-bottleneck-ret", t);

    let mut tracks = Vec::with_capacity(num_tracks);
    for t in 1..=num_tracks {
        let mut segments = Vec::with_capacity(base_segments + 2);
        for c in 0..base_segments {
            let id = id_at(t, c);
            let segment = if c == caesar {
                Segment::new(id, SegmentKind::CaesarLink, vec![GLOBAL_CAESAR.to_string()])
            } else if c == bottleneck {
                Segment::new(id, SegmentKind::Bottleneck, vec![GLOBAL_BOTTLENECK.to_string()])
            } else {
                let mut next = vec![id_at(t, c + 1)];
                // The start segment has no bypass; it always hands over to position 1.
                if c > 0 && c + 1 == caesar {
                    next.push(caesar_ret(t));
                } else if c > 0 && c + 1 == bottleneck {
                    next.push(GLOBAL_BOTTLENECK.to_string());
                }
                let kind = if c == 0 { SegmentKind::StartGoal } else { SegmentKind::Normal };
                Segment::new(id, kind, next)
            };
            segments.push(segment);

            if c == caesar {
                segments.push(Segment::new(
                    caesar_ret(t),
                    SegmentKind::CaesarRet,
                    vec![id_at(t, c + 1)],
                ));
            } else if c == bottleneck {
                segments.push(Segment::new(
                    bottleneck_ret(t),
                    SegmentKind::BottleneckRet,
                    vec![id_at(t, c + 1)],
                ));
            }
        }
        tracks.push(Track {
            track_id: t.to_string(),
            segments,
        });
    }

    let global_segments = vec![
        Segment::new(
            GLOBAL_CAESAR,
            SegmentKind::GlobalCaesar,
            (1..=num_tracks).map(caesar_ret).collect(),
        ),
        Segment::new(
            GLOBAL_BOTTLENECK,
            SegmentKind::GlobalBottleneck,
            (1..=num_tracks).map(bottleneck_ret).collect(),
        ),
    ];

    Ok(TrackDefinition {
        tracks,
        global_segments,
    })
}
