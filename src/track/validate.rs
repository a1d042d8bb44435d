use std::collections::{HashMap, HashSet, VecDeque};
use crate::error::TrackError;
use crate::track::TrackDefinition;

/// Checks the invariants the race relies on:
/// unique segment ids, exactly one start-goal per track, non-empty successor
/// lists that only name known segments, and every track segment both reachable
/// from and able to return to its start-goal segment.
pub fn validate(definition: &TrackDefinition) -> Result<(), TrackError> {
    if definition.tracks.is_empty() {
        return Err(TrackError::NoTracks);
    }

    let mut ids = HashSet::new();
    let raw = definition
        .tracks
        .iter()
        .flat_map(|t| t.segments.iter())
        .chain(definition.global_segments.iter());
    for segment in raw {
        if !ids.insert(segment.segment_id.as_str()) {
            return Err(TrackError::DuplicateSegment(segment.segment_id.clone()));
        }
    }

    let index = definition.segment_index();
    for segment in index.values() {
        if segment.next_segments.is_empty() {
            return Err(TrackError::EmptySuccessors(segment.segment_id.clone()));
        }
        for next in &segment.next_segments {
            if !index.contains_key(next.as_str()) {
                return Err(TrackError::UnknownSuccessor {
                    from: segment.segment_id.clone(),
                    to: next.clone(),
                });
            }
        }
    }

    let forward: HashMap<&str, Vec<&str>> = index
        .values()
        .map(|&s| {
            let next = s.next_segments.iter().map(String::as_str).collect();
            (s.segment_id.as_str(), next)
        })
        .collect();
    let mut backward: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, next) in &forward {
        for to in next {
            backward.entry(*to).or_default().push(*from);
        }
    }

    for track in &definition.tracks {
        let starts: Vec<_> = track.segments.iter().filter(|s| s.is_start_goal()).collect();
        let start = match starts.as_slice() {
            [] => return Err(TrackError::MissingStartGoal(track.track_id.clone())),
            [one] => one.segment_id.as_str(),
            many => {
                return Err(TrackError::MultipleStartGoal {
                    track: track.track_id.clone(),
                    count: many.len(),
                })
            }
        };

        let reachable = reach(start, &forward);
        let returning = reach(start, &backward);
        for segment in &track.segments {
            let id = segment.segment_id.as_str();
            if !reachable.contains(id) {
                return Err(TrackError::Unreachable {
                    track: track.track_id.clone(),
                    segment: id.to_string(),
                });
            }
            if !returning.contains(id) {
                return Err(TrackError::NoReturn {
                    track: track.track_id.clone(),
                    segment: id.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn reach<'a>(from: &'a str, edges: &HashMap<&'a str, Vec<&'a str>>) -> HashSet<&'a str> {
    let mut seen = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        for next in edges.get(current).into_iter().flatten() {
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    seen
}
