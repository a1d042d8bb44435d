pub mod builder;
pub mod generator;
pub mod loader;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use crate::error::TrackError;

pub use loader::{load_tracks_from_json, load_validated};
pub use validate::validate;

/// The whole race topology, as produced by the track generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackDefinition {
    pub tracks: Vec<Track>,
    /// Segments shared by several tracks (contention points).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub track_id: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub segment_id: String,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub next_segments: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentKind {
    StartGoal,
    Normal,
    CaesarLink,
    CaesarRet,
    Bottleneck,
    BottleneckRet,
    GlobalCaesar,
    GlobalBottleneck,
}

impl Segment {
    pub fn new(id: impl Into<String>, kind: SegmentKind, next: Vec<String>) -> Self {
        Self {
            segment_id: id.into(),
            kind,
            next_segments: next,
        }
    }

    pub fn is_start_goal(&self) -> bool {
        self.kind == SegmentKind::StartGoal
    }
}

impl Track {
    pub fn start_segment(&self) -> Option<&Segment> {
        self.segments.iter().find(|s| s.is_start_goal())
    }
}

impl TrackDefinition {
    /// Every segment once, tracks first, then the global ones.
    /// A segment id listed twice is only yielded the first time.
    pub fn all_segments(&self) -> Vec<&Segment> {
        let mut seen = std::collections::HashSet::new();
        self.tracks
            .iter()
            .flat_map(|t| t.segments.iter())
            .chain(self.global_segments.iter())
            .filter(|s| seen.insert(s.segment_id.as_str()))
            .collect()
    }

    pub fn segment_index(&self) -> HashMap<&str, &Segment> {
        self.all_segments()
            .into_iter()
            .map(|s| (s.segment_id.as_str(), s))
            .collect()
    }

    pub fn write_json(&self, path: &Path) -> Result<(), TrackError> {
        let mut json = serde_json::to_string_pretty(self).map_err(|source| TrackError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        json.push('\n');
        std::fs::write(path, json).map_err(|source| TrackError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
