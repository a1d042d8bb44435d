//! Result aggregation and the plain-text results file.

use std::fmt;
use std::path::Path;
use crate::error::RaceError;

/// One `<segment>:<seconds>` record from a token's timing log.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRecord {
    pub segment: String,
    pub seconds: f64,
}

impl TimingRecord {
    /// Segment ids may contain `:`, so the split is on the last one.
    pub fn parse(raw: &str) -> Option<Self> {
        let (segment, seconds) = raw.rsplit_once(':')?;
        if segment.is_empty() {
            return None;
        }
        let seconds: f64 = seconds.trim().parse().ok()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        Some(Self {
            segment: segment.to_string(),
            seconds,
        })
    }
}

/// Aggregated timings of one token.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenReport {
    pub token: String,
    pub records: Vec<TimingRecord>,
    /// Raw entries that could not be parsed.
    pub malformed: Vec<String>,
    /// Set when the log itself could not be read.
    pub read_error: Option<String>,
    /// Race time recorded by the start-goal segment, if the token finished.
    pub finish_time: Option<f64>,
}

impl TokenReport {
    pub fn from_entries(token: &str, entries: &[String]) -> Self {
        let mut report = TokenReport {
            token: token.to_string(),
            ..Default::default()
        };
        for raw in entries {
            match TimingRecord::parse(raw) {
                Some(record) => report.records.push(record),
                None => report.malformed.push(raw.clone()),
            }
        }
        report
    }

    pub fn unreadable(token: &str, error: String) -> Self {
        TokenReport {
            token: token.to_string(),
            read_error: Some(error),
            ..Default::default()
        }
    }

    pub fn total(&self) -> f64 {
        self.records.iter().map(|r| r.seconds).sum()
    }

    /// True when something about this token's log could not be used.
    pub fn is_flagged(&self) -> bool {
        !self.malformed.is_empty() || self.read_error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RaceReport {
    pub tokens: Vec<TokenReport>,
    pub finished: i64,
    pub expected: i64,
}

impl RaceReport {
    pub fn token(&self, id: &str) -> Option<&TokenReport> {
        self.tokens.iter().find(|t| t.token == id)
    }

    pub fn flagged(&self) -> impl Iterator<Item = &TokenReport> {
        self.tokens.iter().filter(|t| t.is_flagged())
    }

    pub fn write_to(&self, path: &Path) -> Result<(), RaceError> {
        std::fs::write(path, self.to_string()).map_err(|source| RaceError::Report {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl fmt::Display for TokenReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Token {}:", self.token)?;
        if let Some(error) = &self.read_error {
            writeln!(f, "  Log unavailable: {}", error)?;
        }
        for record in &self.records {
            writeln!(f, "  {}: {:.6} seconds", record.segment, record.seconds)?;
        }
        for raw in &self.malformed {
            writeln!(f, "  Unparseable entry: {}", raw)?;
        }
        writeln!(f, "  Total: {:.6} seconds", self.total())?;
        match self.finish_time {
            Some(secs) => writeln!(f, "  Race time: {:.6} seconds", secs),
            None => writeln!(f, "  Race time: not finished"),
        }
    }
}

impl fmt::Display for RaceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}
