use crate::error::RenderResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_TRACE: &str = "CANOPY_TRACE";
pub const ENV_METRICS: &str = "CANOPY_METRICS";
pub const ENV_MAX_DEPTH: &str = "CANOPY_MAX_DEPTH";
pub const ENV_LOG: &str = "CANOPY_LOG";

/// Configuration for a `Renderer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Maximum element nesting before expansion fails (unbounded when unset)
    pub max_depth: Option<usize>,
    /// Install the tracing middleware
    pub trace_expansions: bool,
    /// Install a metrics middleware, reachable through `Renderer::metrics`
    pub collect_metrics: bool,
    /// Log filter directive for binaries (e.g. "canopy=debug")
    pub log_filter: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            trace_expansions: false,
            collect_metrics: false,
            log_filter: None,
        }
    }
}

impl RenderConfig {
    pub fn from_toml_str(source: &str) -> RenderResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Loads a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> RenderResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Defaults overridden by `CANOPY_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Overrides fields with the `CANOPY_*` environment variables that are set.
    pub fn merge_env(self) -> Self {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    fn merge_vars<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var(ENV_TRACE) {
            self.trace_expansions = is_truthy(&value);
        }
        if let Some(value) = var(ENV_METRICS) {
            self.collect_metrics = is_truthy(&value);
        }
        if let Some(value) = var(ENV_MAX_DEPTH) {
            // "0", "none" or garbage clear the limit
            self.max_depth = value.trim().parse().ok().filter(|depth| *depth > 0);
        }
        if let Some(value) = var(ENV_LOG) {
            self.log_filter = Some(value);
        }
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
