//! Errors that escape the core to callers.
//!
//! Per the error taxonomy only three kinds ever reach a caller:
//! [`SupervisorError::SessionExists`], [`SupervisorError::UnknownSession`],
//! and [`SupervisorError::SpawnFailed`]. Everything else (write races,
//! listener panics, malformed directives) is absorbed inside the core and
//! never constructs one of these.
//!
//! A small, hand-written `Display`-only enum rather than a `thiserror`
//! derive — there are only three variants, and `Display` for each is one
//! line.

use std::fmt;

#[derive(Debug)]
pub enum SupervisorError {
    /// `createSession` called with an id already present in the registry.
    SessionExists(String),
    /// Any session operation addressed to an id not present in the registry.
    UnknownSession(String),
    /// PTY allocation or child spawn failed; nothing was registered.
    SpawnFailed(String),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionExists(id) => write!(f, "session {id} already exists"),
            Self::UnknownSession(id) => write!(f, "session {id} not found"),
            Self::SpawnFailed(reason) => write!(f, "failed to spawn session: {reason}"),
        }
    }
}

impl std::error::Error for SupervisorError {}
