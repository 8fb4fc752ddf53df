//! Google Business Profile API (v4 endpoints).

pub mod client;
pub mod config;

pub use client::{GbpApi, GbpClient, GbpError, GbpLocationInfo, LocalPostBody, MediaBody};
