//! smrt Core - Indicator model, rule files and shared types
//!
//! This crate provides the foundational primitives:
//! - Indicator records, candidates and normalization
//! - Indicator type detection and free-text extraction
//! - TOML rule / feed model and loader
//! - Error taxonomy shared by every crate
//! - Output format registry

pub mod error;
pub mod format;
pub mod indicator;
pub mod itype;
pub mod rule;

pub use error::*;
pub use format::*;
pub use indicator::*;
pub use itype::{detect, extract, IndicatorType};
pub use rule::*;

/// Group assigned to indicators that do not declare one
pub const DEFAULT_GROUP: &str = "everyone";

/// Parser used when neither feed nor rule names one
pub const PARSER_DEFAULT: &str = "pattern";

/// Batch size for fireball submissions
pub const FIREBALL_SIZE: usize = 500;

/// Days a dedup record is kept before cleanup prunes it
pub const ARCHIVE_RETENTION_DAYS: i64 = 180;
