//! Library exports for trainlog, shared between the binary and tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod identity;
pub mod models;
pub mod resources;
pub mod session;
pub mod startup;
pub mod state;
pub mod utils;
