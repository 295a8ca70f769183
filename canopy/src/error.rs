// Error handling for the canopy evaluator

use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

/// Errors raised while expanding a node tree.
///
/// Errors are `Clone` because memoized nodes cache failures and replay them
/// to every later consumer instead of re-running the failing effect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    /// An error raised by a component, a deferred or a stream.
    #[error("{0}")]
    Failed(String),

    /// A component failure tagged with the component that raised it.
    #[error("component `{component}` failed: {message}")]
    Component { component: String, message: String },

    /// A one-shot stream was opened a second time.
    #[error("stream node was already consumed; wrap it with memo() to render it more than once")]
    StreamConsumed,

    /// Expansion went deeper than `RenderConfig::max_depth`.
    #[error("expansion depth {depth} exceeded while expanding `{component}`")]
    DepthExceeded { depth: usize, component: String },

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation (e.g. a poisoned lock)
    #[error("internal error: {0}")]
    Internal(String),
}

impl RenderError {
    pub fn msg(message: impl Into<String>) -> Self {
        RenderError::Failed(message.into())
    }

    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        RenderError::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// The human-readable message without the component prefix.
    pub fn message(&self) -> String {
        match self {
            RenderError::Failed(message) => message.clone(),
            RenderError::Component { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for RenderError {
    fn from(e: toml::de::Error) -> Self {
        RenderError::Config(e.to_string())
    }
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        RenderError::Config(e.to_string())
    }
}
