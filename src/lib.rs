#![forbid(unsafe_code)]

//! Video ingestion for IPTV channels: uploads and YouTube channels go in,
//! playable stream URLs come out.

pub mod adapters;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod orchestrator;
pub mod playback;
pub mod security;
pub mod service;
pub mod uploads;
pub mod youtube;

pub use error::{Error, Result};
