//! smrt Fetch Layer
//!
//! Retrieves raw feed data:
//! - HTTP client construction (proxy, TLS toggle, user agent)
//! - Download with on-disk cache and no-fetch mode
//! - Local file remotes resolved against the rule directory

pub mod client;
pub mod fetcher;

pub use client::*;
pub use fetcher::*;
