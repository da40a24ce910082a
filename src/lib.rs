#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! termsup — a multi-tenant PTY session supervisor for AI coding tool
//! sub-processes, with an embedded orchestrator control-directive parser.
//!
//! The library exposes two independent subsystems:
//! - [`registry`] (plus [`session`], [`serializer`], [`lifecycle`],
//!   [`fanout`], [`variant`], [`env_sanitizer`], [`shell`]) — the Session
//!   Manager: PTY lifecycle, write serialization, output fan-out, and
//!   shutdown.
//! - [`directives`] — streaming extraction of fenced JSON control
//!   directives from PTY output.
//!
//! Everything else (`config`, `state`, `routes`, `ws`, `auth`,
//! `noise_filter`, `ambient`) is the ambient HTTP/WS surface this crate
//! ships to exercise the core; it is not part of the core contract.

pub mod ambient;
pub mod auth;
pub mod config;
pub mod directives;
pub mod env_sanitizer;
pub mod error;
pub mod fanout;
pub mod lifecycle;
pub mod noise_filter;
pub mod registry;
pub mod routes;
pub mod serializer;
pub mod session;
pub mod shell;
pub mod state;
pub mod variant;
pub mod ws;

pub use config::Config;
pub use error::SupervisorError;
pub use registry::Registry;
pub use state::AppState;
