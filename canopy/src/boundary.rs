//! Error boundary - isolates failures of a subtree behind a fallback.

use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::node::{Component, Element, Node, Props};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What an error boundary renders instead of a failed subtree.
#[derive(Clone)]
pub enum Fallback {
    /// A fixed replacement.
    Node(Node),
    /// Builds the replacement from the caught error.
    With(Arc<dyn Fn(&RenderError) -> Node + Send + Sync>),
}

impl Fallback {
    pub fn node(node: impl Into<Node>) -> Self {
        Fallback::Node(node.into())
    }

    pub fn with<F>(handler: F) -> Self
    where
        F: Fn(&RenderError) -> Node + Send + Sync + 'static,
    {
        Fallback::With(Arc::new(handler))
    }

    fn resolve(&self, error: &RenderError) -> Node {
        match self {
            Fallback::Node(node) => node.clone(),
            Fallback::With(handler) => handler(error),
        }
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Node(node) => f.debug_tuple("Node").field(node).finish(),
            Fallback::With(_) => f.write_str("With(..)"),
        }
    }
}

/// Renders its children to completion; on any failure in the subtree the
/// partial output is discarded and the fallback is evaluated instead.
///
/// The children are rendered with a never-stopping predicate, so the
/// boundary is atomic for partial rendering: callers only ever see either
/// the settled children or the fallback.
#[derive(Debug, Clone)]
pub struct ErrorBoundary {
    fallback: Fallback,
}

impl ErrorBoundary {
    /// A boundary around `children` with a static fallback node.
    pub fn new(children: impl Into<Node>, fallback: impl Into<Node>) -> Node {
        Self::element(children, Fallback::node(fallback)).into()
    }

    /// A boundary around `children` whose fallback is built from the error.
    pub fn with_handler<F>(children: impl Into<Node>, handler: F) -> Node
    where
        F: Fn(&RenderError) -> Node + Send + Sync + 'static,
    {
        Self::element(children, Fallback::with(handler)).into()
    }

    pub fn element(children: impl Into<Node>, fallback: Fallback) -> Element {
        Element::new(
            Arc::new(ErrorBoundary { fallback }),
            Props::new().child(children),
        )
    }
}

impl Component for ErrorBoundary {
    fn name(&self) -> &str {
        "ErrorBoundary"
    }

    fn render(&self, props: &Props, ctx: &RenderContext) -> RenderResult<Node> {
        let rendering = ctx.render(props.children_node());
        let fallback = self.fallback.clone();
        Ok(Node::deferred(async move {
            match rendering.await {
                Ok(text) => Ok(Node::text(text)),
                Err(error) => {
                    warn!(error = %error, "error boundary caught a failure, rendering fallback");
                    Ok(fallback.resolve(&error))
                }
            }
        }))
    }
}
