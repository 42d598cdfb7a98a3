use std::path::PathBuf;

use thiserror::Error;

/// The data source could not run the query or exited with a failure status.
#[derive(Debug, Error)]
#[error("failed to query data source (status {status}){}", render_diagnostic(.diagnostic))]
pub struct DataSourceError {
    pub status: i32,
    /// Whatever the data source printed before failing, line by line.
    pub diagnostic: String,
}

impl DataSourceError {
    pub fn new(status: i32, diagnostic: impl Into<String>) -> Self {
        Self {
            status,
            diagnostic: diagnostic.into(),
        }
    }
}

/// A fetched row does not match the revision query's column contract.
#[derive(Debug, Error)]
#[error("malformed revision row {row}: {reason}")]
pub struct MalformedRowError {
    /// Zero-based position in the fetched batch.
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("failed to convert `{page}`: {diagnostic}")]
pub struct ConversionError {
    pub page: String,
    pub diagnostic: String,
}

#[derive(Debug, Error)]
#[error("invalid timestamp `{0}` (expected a valid yyyymmddhhmmss date)")]
pub struct InvalidTimestampError(pub String);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path escapes the working tree: {0}")]
    PathOutsideTree(String),

    #[error("invalid commit timestamp `{0}`")]
    InvalidDate(String),
}

/// Fatal errors that stop a migration run.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    MalformedRow(#[from] MalformedRowError),

    #[error("revision {index} of `{page}`: {source}")]
    InvalidTimestamp {
        index: usize,
        page: String,
        #[source]
        source: InvalidTimestampError,
    },

    #[error("revision {index} of `{page}`: {source}")]
    Sink {
        index: usize,
        page: String,
        #[source]
        source: SinkError,
    },

    #[error("the output path '{}' already exists", .0.display())]
    OutputPathExists(PathBuf),

    #[error("failed to initialize repository at '{}': {source}", .path.display())]
    OutputInit {
        path: PathBuf,
        #[source]
        source: SinkError,
    },
}

fn render_diagnostic(diagnostic: &str) -> String {
    let trimmed = diagnostic.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_source_error_includes_diagnostic_lines() {
        let error = DataSourceError::new(1, "ERROR 1049 (42000): Unknown database 'wiki'\n");
        let message = error.to_string();
        assert!(message.contains("status 1"));
        assert!(message.contains("Unknown database 'wiki'"));
    }

    #[test]
    fn data_source_error_without_diagnostic_is_single_line() {
        let error = DataSourceError::new(2, "  \n");
        assert_eq!(error.to_string(), "failed to query data source (status 2)");
    }

    #[test]
    fn output_path_error_names_path() {
        let error = MigrateError::OutputPathExists(PathBuf::from("pages"));
        assert_eq!(error.to_string(), "the output path 'pages' already exists");
    }
}
