//! smrt Plugins
//!
//! Pluggable pieces of the ingestion pipeline:
//! - **Parsers**: `pattern` (default), `csv` / `tsv` / `delim`, `json`, `zioc`
//! - **Clients**: `stdout`, `null`, `rest`
//! - **Archive**: JSON file dedup store
//!
//! Everything is looked up by name through [`registry::PluginRegistry`].

pub mod archive;
pub mod delimited;
pub mod ioc;
pub mod json;
pub mod lines;
pub mod pattern;
pub mod registry;
pub mod rest;
pub mod sink;
pub mod traits;

pub use archive::*;
pub use delimited::*;
pub use ioc::*;
pub use json::*;
pub use pattern::*;
pub use registry::*;
pub use rest::*;
pub use sink::*;
pub use traits::*;
