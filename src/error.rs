//! Error taxonomy shared by the pipeline stages.
//!
//! Per-row problems are recovered where they happen (the row is dropped and
//! counted). Per-unit problems (a chunk, a day) are logged by the caller and
//! the unit is skipped. Configuration problems abort the run before any data
//! is touched.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("malformed {field} on row {row}: {message}")]
    MalformedInput {
        row: u64,
        field: &'static str,
        message: String,
    },
    #[error("{unit} unavailable: {message}")]
    UpstreamUnavailable { unit: String, message: String },
    #[error("required file '{path}' is missing: {message}")]
    ConfigurationMissing { path: PathBuf, message: String },
    #[error("invalid configuration in '{path}': {message}")]
    InvalidConfiguration { path: PathBuf, message: String },
    #[error("input header has no column named '{column}'")]
    MissingColumn { column: String },
}

impl PipelineError {
    /// True for errors that must stop the run instead of skipping a unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ConfigurationMissing { .. }
                | PipelineError::InvalidConfiguration { .. }
                | PipelineError::MissingColumn { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let missing = PipelineError::ConfigurationMissing {
            path: PathBuf::from("config.json"),
            message: "not found".into(),
        };
        let upstream = PipelineError::UpstreamUnavailable {
            unit: "day 2019-09-01".into(),
            message: "connection refused".into(),
        };
        assert!(missing.is_fatal());
        assert!(!upstream.is_fatal());
        assert_eq!(
            upstream.to_string(),
            "day 2019-09-01 unavailable: connection refused"
        );
    }
}
