//! Canopy - a streaming evaluator for trees of lazy components.
//!
//! A tree is built from literals, sequences, component elements, deferred
//! futures and frame streams. Evaluating it produces a stream of
//! progressively refined snapshots; the last one is the settled output.
//!
//! ```ignore
//! use canopy::{render, ContextKey, Node};
//!
//! let temperature = ContextKey::new("Temperature", 0.5_f64);
//! let reading = {
//!     let key = temperature.clone();
//!     Node::from_fn("Reading", move |_, ctx| Ok(Node::from(ctx.get(&key))))
//! };
//! let text = render(canopy::seq![reading.clone(), temperature.provide(1.0, reading)]).await?;
//! assert_eq!(text, "0.51");
//! ```

pub mod boundary;
pub mod config;
pub mod context;
pub mod error;
pub mod inspect;
pub mod memo;
pub mod middleware;
pub mod node;
pub mod render;

pub use boundary::{ErrorBoundary, Fallback};
pub use config::RenderConfig;
pub use context::{create_context, ContextId, ContextKey, Fragment, RenderContext};
pub use error::{RenderError, RenderResult};
pub use inspect::{debug_parts, debug_tree, extract, Extraction, Stepper};
pub use memo::{memo, memo_bound};
pub use middleware::{
    Expansion, ExpansionStats, MetricsMiddleware, MiddlewareStack, RenderMiddleware,
    TracingMiddleware,
};
pub use node::{
    Component, Deferred, Element, FnComponent, FrameSource, Literal, Node, NodeKind, Part, Props,
    StreamFrame, StreamNode,
};
pub use render::{RenderStream, Renderer, StopPredicate};

use futures::stream::BoxStream;
use std::future::Future;

/// Renders `node` to its final string with a default renderer.
pub fn render(node: impl Into<Node>) -> impl Future<Output = RenderResult<String>> + Send + 'static {
    Renderer::default().render(node)
}

/// Streams progressively refined strings of `node`.
pub fn render_stream(node: impl Into<Node>) -> BoxStream<'static, RenderResult<String>> {
    Renderer::default().render_stream(node)
}

/// Settled snapshot of `node`, leaving elements matching `stop` unexpanded.
pub fn partial_render<F>(
    node: impl Into<Node>,
    stop: F,
) -> impl Future<Output = RenderResult<Vec<Part>>> + Send + 'static
where
    F: Fn(&Element) -> bool + Send + Sync + 'static,
{
    Renderer::default().partial_render(node, stop)
}

/// Snapshot stream of `node`, leaving elements matching `stop` unexpanded.
pub fn partial_render_stream<F>(node: impl Into<Node>, stop: F) -> RenderStream
where
    F: Fn(&Element) -> bool + Send + Sync + 'static,
{
    Renderer::default().partial_render_stream(node, stop)
}
