//! Key layout in the shared store.

pub const TOKEN_FIELD: &str = "token";

pub const LOCATIONS: &str = "token_locations";
pub const LAPS: &str = "token_rounds";
pub const START_TIMES: &str = "token_start_times";
pub const RESULTS: &str = "race_results";
pub const FINISHED: &str = "finished_tokens";

pub fn queue(segment: &str) -> String {
    format!("stream-{}", segment)
}

pub fn lock(segment: &str) -> String {
    format!("lock:{}", segment)
}

/// Per-token list of `<segment>:<seconds>` records.
pub fn timings(token: &str) -> String {
    format!("{}:{}", RESULTS, token)
}

pub fn token_id(start_segment: &str, seq: usize) -> String {
    format!("token-{}-{}", start_segment, seq)
}
