// ABOUTME: Library root for hoptunnel - exposes the tunnel core and config for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod error;
pub mod tunnel;
