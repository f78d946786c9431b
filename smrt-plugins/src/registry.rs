//! Name -> factory registry for parsers and clients

use smrt_core::SmrtError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{
    DelimitedParser, IocParser, JsonParser, NullClient, Parser, ParserContext, PatternParser,
    RestClient, SharedClient, StdoutClient,
};

/// Builds a parser bound to one rule/feed
pub type ParserFactory =
    Arc<dyn Fn(ParserContext) -> Result<Box<dyn Parser>, SmrtError> + Send + Sync>;

/// Builds a submission client
pub type ClientFactory = Arc<dyn Fn(&ClientConfig) -> Result<SharedClient, SmrtError> + Send + Sync>;

/// Settings handed to client factories
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub remote: Option<String>,
    pub token: Option<String>,
    pub user: Option<String>,
    pub verify_ssl: bool,
    pub timeout_secs: u64,
    pub proxy: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote: None,
            token: None,
            user: None,
            verify_ssl: true,
            timeout_secs: 300,
            proxy: None,
        }
    }
}

/// Names tried, in order, when looking up a parser
pub fn parser_candidates(name: &str) -> [String; 2] {
    [name.to_string(), format!("z{name}")]
}

/// Registry of available parsers and clients
#[derive(Clone, Default)]
pub struct PluginRegistry {
    parsers: BTreeMap<String, ParserFactory>,
    clients: BTreeMap<String, ClientFactory>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("parsers", &self.parser_names())
            .field("clients", &self.client_names())
            .finish()
    }
}

impl PluginRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in parser and client
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        registry.register_parser("pattern", |ctx| Ok(Box::new(PatternParser::new(ctx))));
        registry.register_parser("csv", |ctx| Ok(Box::new(DelimitedParser::csv(ctx))));
        registry.register_parser("tsv", |ctx| Ok(Box::new(DelimitedParser::tsv(ctx))));
        registry.register_parser("delim", |ctx| Ok(Box::new(DelimitedParser::delim(ctx))));
        registry.register_parser("json", |ctx| Ok(Box::new(JsonParser::new(ctx))));
        registry.register_parser("zioc", |ctx| Ok(Box::new(IocParser::new(ctx))));

        registry.register_client("stdout", |_| Ok(Arc::new(StdoutClient)));
        registry.register_client("null", |_| Ok(Arc::new(NullClient)));
        registry.register_client("rest", |config| Ok(Arc::new(RestClient::new(config)?)));

        registry
    }

    pub fn register_parser<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(ParserContext) -> Result<Box<dyn Parser>, SmrtError> + Send + Sync + 'static,
    {
        self.parsers.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_client<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ClientConfig) -> Result<SharedClient, SmrtError> + Send + Sync + 'static,
    {
        self.clients.insert(name.to_string(), Arc::new(factory));
    }

    pub fn parser_names(&self) -> Vec<&str> {
        self.parsers.keys().map(String::as_str).collect()
    }

    pub fn client_names(&self) -> Vec<&str> {
        self.clients.keys().map(String::as_str).collect()
    }

    /// Look up `name`, then `z<name>`
    pub fn resolve_parser(&self, name: &str) -> Result<(String, ParserFactory), SmrtError> {
        parser_candidates(name)
            .into_iter()
            .find_map(|candidate| {
                self.parsers
                    .get(&candidate)
                    .map(|factory| (candidate, Arc::clone(factory)))
            })
            .ok_or_else(|| {
                SmrtError::PluginNotFound(format!("parser '{name}' (tried '{name}' and 'z{name}')"))
            })
    }

    pub fn create_client(&self, name: &str, config: &ClientConfig) -> Result<SharedClient, SmrtError> {
        let factory = self.clients.get(name).ok_or_else(|| {
            SmrtError::PluginNotFound(format!(
                "client '{}' (available: {})",
                name,
                self.client_names().join(", ")
            ))
        })?;
        factory(config)
    }
}
