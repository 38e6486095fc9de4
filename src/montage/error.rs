use std::path::PathBuf;

use thiserror::Error;

/// Failures that end a build. Predicate rejection is not an error and never appears here.
#[derive(Debug, Error)]
pub enum MontageError {
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    #[error("no source can fill {duration:.3}s{}", constraint_suffix(.constraint))]
    NoSourceAvailable {
        duration: f64,
        constraint: Option<String>,
    },

    #[error("could not resolve '{identifier}': {reason}")]
    Resolution { identifier: String, reason: String },

    #[error("{tool} exited with status {code:?}: {stderr}")]
    Render {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },
}

fn constraint_suffix(constraint: &Option<String>) -> String {
    match constraint {
        Some(c) => format!(" matching \"{c}\""),
        None => String::new(),
    }
}

impl MontageError {
    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn resolution(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}
