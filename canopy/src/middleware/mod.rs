//! Render middleware - observers chained around the evaluator's expansion step.
//!
//! Every element, deferred and stream expansion is passed through the
//! registered middleware, ordered by priority. Lower priority runs first
//! (wraps outer):
//! ```text
//! Tracing.wrap(next = |
//!   Metrics.wrap(next = |
//!     expand_suspended()
//!   |)
//! |)
//! ```
//! Middleware observes; it must hand back the snapshots of `next()` unchanged.

mod logging;
mod metrics;

pub use logging::TracingMiddleware;
pub use metrics::{ExpansionStats, MetricsMiddleware};

use crate::error::RenderResult;
use crate::node::{Node, NodeKind, Part};
use crate::render::RenderStream;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

/// Produces the wrapped expansion (inner middleware, or the evaluator itself).
pub type NextRender = Box<dyn FnOnce() -> RenderStream + Send>;

/// Description of one expansion handed to middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Expansion {
    pub kind: NodeKind,
    /// Component name, for element expansions.
    pub component: Option<String>,
    pub depth: usize,
}

impl Expansion {
    pub fn new(node: &Node, depth: usize) -> Self {
        Self {
            kind: node.kind(),
            component: node.as_element().map(|element| element.name().to_string()),
            depth,
        }
    }

    /// Component name for elements, node kind otherwise.
    pub fn label(&self) -> String {
        match &self.component {
            Some(name) => name.clone(),
            None => format!("<{}>", self.kind),
        }
    }
}

/// Trait for render middleware.
///
/// # Priority Guidelines
/// - 0-9: logging, tracing
/// - 10-19: metrics
/// - 20+: user middleware
pub trait RenderMiddleware: Send + Sync {
    /// Unique name, used to unregister.
    fn name(&self) -> &str;

    /// Lower values wrap outer. Equal priorities keep registration order.
    fn priority(&self) -> u32;

    /// Wraps one expansion. Implementations call `next()` exactly once and
    /// return its snapshots, possibly observed through [`observe`].
    fn wrap(&self, expansion: Expansion, next: NextRender) -> RenderStream;
}

pub type ArcRenderMiddleware = Arc<dyn RenderMiddleware>;

/// Middleware sorted by priority (lowest first).
#[derive(Clone)]
pub struct MiddlewareStack {
    layers: Arc<[ArcRenderMiddleware]>,
}

impl Default for MiddlewareStack {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self {
            layers: Arc::from(Vec::new()),
        }
    }

    /// Registers middleware. The stack is kept sorted by priority.
    pub fn register(&mut self, middleware: ArcRenderMiddleware) {
        let mut layers: Vec<_> = self.layers.iter().cloned().collect();
        layers.push(middleware);
        layers.sort_by_key(|m| m.priority());
        self.layers = layers.into();
    }

    /// Unregisters middleware by name.
    /// Returns true if something was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.layers.len();
        let layers: Vec<_> = self
            .layers
            .iter()
            .filter(|m| m.name() != name)
            .cloned()
            .collect();
        self.layers = layers.into();
        self.layers.len() < before
    }

    /// Registered names in priority order.
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs `base` through every layer, outermost first.
    pub fn run(&self, expansion: Expansion, base: NextRender) -> RenderStream {
        if self.layers.is_empty() {
            return base();
        }
        run_chain(Arc::clone(&self.layers), 0, expansion, base)
    }
}

fn run_chain(
    layers: Arc<[ArcRenderMiddleware]>,
    index: usize,
    expansion: Expansion,
    base: NextRender,
) -> RenderStream {
    let Some(layer) = layers.get(index).cloned() else {
        return base();
    };
    let inner = expansion.clone();
    let next: NextRender = Box::new(move || run_chain(layers, index + 1, inner, base));
    layer.wrap(expansion, next)
}

/// Passes `snapshots` through unchanged, calling `on_snapshot` for every item
/// and `on_end` once the stream is exhausted or has yielded its error.
pub fn observe<S, E>(snapshots: RenderStream, on_snapshot: S, on_end: E) -> RenderStream
where
    S: FnMut(&RenderResult<Vec<Part>>) + Send + 'static,
    E: FnOnce() + Send + 'static,
{
    stream::unfold(
        (snapshots, on_snapshot, Some(on_end)),
        |(mut snapshots, mut on_snapshot, mut on_end)| async move {
            match snapshots.next().await {
                Some(snapshot) => {
                    on_snapshot(&snapshot);
                    if snapshot.is_err() {
                        if let Some(end) = on_end.take() {
                            end();
                        }
                    }
                    Some((snapshot, (snapshots, on_snapshot, on_end)))
                }
                None => {
                    if let Some(end) = on_end.take() {
                        end();
                    }
                    None
                }
            }
        },
    )
    .boxed()
}
