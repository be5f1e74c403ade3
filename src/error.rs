//! Typed errors shared by every stage of expansion.

use thiserror::Error;

use crate::namespace::NamespacePath;

/// Coarse classification used by callers to decide whether a failure aborts the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Shape,
    Duplicate,
    Stall,
    Domain,
    Effect,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed macro or constructor arguments, unknown macros or constructors.
    #[error("malformed `{form}`: {message}")]
    Shape { form: String, message: String },

    /// Two commits targeted the same namespace path.
    #[error("duplicate definition of {path}")]
    Duplicate { path: NamespacePath },

    /// A thread waited on a path that was never committed.
    #[error("stalled waiting on {path}{}", .context.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Stall {
        path: NamespacePath,
        context: Option<String>,
    },

    /// Summary of a run in which at least one thread stalled.
    #[error("{} thread(s) stalled; first: {}", .stalls.len(), .stalls.first().map(|e| e.to_string()).unwrap_or_default())]
    Stalled { stalls: Vec<Error> },

    /// A value was used with a dex that does not accept it.
    #[error("dex domain error: {0}")]
    Domain(String),

    /// Observable effect requested outside an effect mode, or the host refused it.
    #[error("effect error: {0}")]
    Effect(String),
}

impl Error {
    pub fn shape(form: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Shape {
            form: form.into(),
            message: message.into(),
        }
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Error::Domain(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Shape { .. } => ErrorKind::Shape,
            Error::Duplicate { .. } => ErrorKind::Duplicate,
            Error::Stall { .. } | Error::Stalled { .. } => ErrorKind::Stall,
            Error::Domain(_) => ErrorKind::Domain,
            Error::Effect(_) => ErrorKind::Effect,
        }
    }

    /// Stalls are per-thread; everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::Stall
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{Namespace, PathKey};

    #[test]
    fn stall_display_includes_context() {
        let path = Namespace::root().get(PathKey::Tag("defs")).path().clone();
        let err = Error::Stall {
            path,
            context: Some("reference to `x`".into()),
        };
        assert_eq!(err.to_string(), "stalled waiting on /defs (reference to `x`)");
        assert!(!err.is_fatal());
        assert!(Error::domain("nope").is_fatal());
    }
}
