//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. All handlers except
//! [`health`] require authentication via [`crate::auth::require_api_key`].

pub mod health;
pub mod sessions;
