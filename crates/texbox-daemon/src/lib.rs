//! # texbox-daemon
//!
//! HTTP front end for sandboxed LaTeX compilation: bearer-token auth,
//! template resolution and the mapping from compile results to responses.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod state;

pub use auth::AuthPolicy;
pub use config::DaemonConfig;
pub use error::ApiError;
pub use server::router;
pub use state::{AppState, Readiness};
