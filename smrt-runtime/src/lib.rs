//! smrt Runtime
//!
//! Drives the ingestion pipeline:
//! - **Resolver**: rule file / directory -> (rule, feed) work items
//! - **Pipeline**: normalize, dedup, submit and yield indicators per feed
//! - **Service**: one-shot or repeating cycles with error classification

pub mod classify;
pub mod pipeline;
pub mod resolver;
pub mod service;
pub mod stdin;

pub use classify::*;
pub use pipeline::*;
pub use resolver::*;
pub use service::*;
