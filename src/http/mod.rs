//! HTTP server module.
//!
//! The service speaks plain HTTP; TLS is terminated by the platform in front
//! of the container. This module provides:
//! - listener binding that fails fast before anything is served
//! - graceful shutdown on SIGTERM/SIGINT
//! - the download service for generated audio

mod downloads;
mod server;
mod shutdown;

pub use downloads::create_download_service;
pub use server::{bind, start_server, ServerError};
pub use shutdown::shutdown_signal;
