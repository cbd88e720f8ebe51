//! songgen: HTTP front end for a song-generation backend, plus the container
//! health monitor that supervises it.
//!
//! The binary in `main.rs` wires these modules together:
//! - `serve`: the API process (`routes`, `http`, `backend`, `storage`)
//! - `check`: one health probe, for a container `HEALTHCHECK`
//! - `monitor`: the interval loop from [`monitor::HealthMonitor`]

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod monitor;
pub mod routes;
pub mod state;
pub mod storage;
