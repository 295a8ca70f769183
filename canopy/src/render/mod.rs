//! Renderer - walks a node tree and produces progressively refined snapshots.
//!
//! Every node is expanded into a `RenderStream`: a lazy stream of snapshots
//! (`Vec<Part>`) whose last item is the settled output. Nothing is spawned;
//! all concurrency comes from polling sibling streams together, so dropping
//! the outer stream cancels every outstanding child.
//!
//! # Expansion
//! ```text
//! Literal  -> one snapshot
//! Sequence -> sequence::combine (ordered concatenation of concurrent children)
//! Element  -> stop? yield the element : middleware(invoke component -> expand)
//! Deferred -> middleware(await -> expand)
//! Stream   -> middleware(for each frame -> expand, until Final)
//! ```

mod sequence;

use crate::config::RenderConfig;
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::middleware::{
    ArcRenderMiddleware, Expansion, MetricsMiddleware, MiddlewareStack, NextRender,
    TracingMiddleware,
};
use crate::node::{Element, FrameStream, Node, Part, StreamFrame, StreamNode};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// Snapshots produced while evaluating one node.
pub type RenderStream = BoxStream<'static, RenderResult<Vec<Part>>>;

/// Decides whether evaluation halts at an element.
#[derive(Clone)]
pub struct StopPredicate(Arc<dyn Fn(&Element) -> bool + Send + Sync>);

impl StopPredicate {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Element) -> bool + Send + Sync + 'static,
    {
        StopPredicate(Arc::new(predicate))
    }

    /// Never stops: full rendering.
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    /// Stops on elements whose component name is one of `names`.
    pub fn on_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        Self::new(move |element| names.iter().any(|name| name == element.name()))
    }

    pub fn matches(&self, element: &Element) -> bool {
        (self.0)(element)
    }
}

impl fmt::Debug for StopPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StopPredicate(..)")
    }
}

struct RendererInner {
    config: RenderConfig,
    middleware: MiddlewareStack,
    metrics: Option<Arc<MetricsMiddleware>>,
}

/// Evaluates node trees.
///
/// Cheap to clone; clones share configuration and middleware. The renderer
/// travels inside every `RenderContext` it creates.
#[derive(Clone)]
pub struct Renderer {
    inner: Arc<RendererInner>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.inner.config)
            .field("middleware", &self.inner.middleware.names())
            .finish()
    }
}

impl Renderer {
    /// Creates a renderer with default configuration and no middleware.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RendererInner {
                config: RenderConfig::default(),
                middleware: MiddlewareStack::new(),
                metrics: None,
            }),
        }
    }

    /// Creates a renderer from configuration, installing the built-in
    /// middleware the configuration asks for.
    pub fn from_config(config: RenderConfig) -> Self {
        let mut middleware = MiddlewareStack::new();
        if config.trace_expansions {
            middleware.register(Arc::new(TracingMiddleware::new()));
        }
        let metrics = if config.collect_metrics {
            let metrics = Arc::new(MetricsMiddleware::new());
            middleware.register(metrics.clone());
            Some(metrics)
        } else {
            None
        };
        debug!(
            max_depth = ?config.max_depth,
            middleware = ?middleware.names(),
            "renderer configured"
        );
        Self {
            inner: Arc::new(RendererInner {
                config,
                middleware,
                metrics,
            }),
        }
    }

    /// Returns a renderer with `middleware` added to the chain.
    pub fn with_middleware(self, middleware: ArcRenderMiddleware) -> Self {
        let mut stack = self.inner.middleware.clone();
        stack.register(middleware);
        Self {
            inner: Arc::new(RendererInner {
                config: self.inner.config.clone(),
                middleware: stack,
                metrics: self.inner.metrics.clone(),
            }),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    pub fn middleware(&self) -> &MiddlewareStack {
        &self.inner.middleware
    }

    /// Metrics collected by this renderer, when enabled in the configuration.
    pub fn metrics(&self) -> Option<Arc<MetricsMiddleware>> {
        self.inner.metrics.clone()
    }

    /// A fresh root context with no bindings.
    pub fn context(&self) -> RenderContext {
        RenderContext::root(self.clone())
    }

    /// Evaluates `node` under `ctx`, starting at the context's depth.
    pub fn evaluate(&self, node: Node, ctx: &RenderContext, stop: StopPredicate) -> RenderStream {
        self.expand(node, ctx.clone(), stop, ctx.depth())
    }

    /// Renders `node` to its final string.
    pub fn render(
        &self,
        node: impl Into<Node>,
    ) -> impl Future<Output = RenderResult<String>> + Send + 'static {
        let ctx = self.context();
        self.render_in(node.into(), &ctx)
    }

    /// Renders `node` to its final string under an existing context.
    pub fn render_in(
        &self,
        node: Node,
        ctx: &RenderContext,
    ) -> impl Future<Output = RenderResult<String>> + Send + 'static {
        let snapshots = self.evaluate(node, ctx, StopPredicate::never());
        async move { settle(snapshots).await.map(|parts| Part::concat(&parts)) }
    }

    /// Streams progressively refined strings; the last one equals `render`'s.
    pub fn render_stream(&self, node: impl Into<Node>) -> BoxStream<'static, RenderResult<String>> {
        let ctx = self.context();
        self.render_stream_in(node.into(), &ctx)
    }

    pub(crate) fn render_stream_in(
        &self,
        node: Node,
        ctx: &RenderContext,
    ) -> BoxStream<'static, RenderResult<String>> {
        self.evaluate(node, ctx, StopPredicate::never())
            .map(|snapshot| snapshot.map(|parts| Part::concat(&parts)))
            .boxed()
    }

    /// Evaluates `node`, leaving elements matching `stop` unexpanded, and
    /// returns the settled snapshot.
    pub fn partial_render<F>(
        &self,
        node: impl Into<Node>,
        stop: F,
    ) -> impl Future<Output = RenderResult<Vec<Part>>> + Send + 'static
    where
        F: Fn(&Element) -> bool + Send + Sync + 'static,
    {
        settle(self.partial_render_stream(node, stop))
    }

    pub fn partial_render_stream<F>(&self, node: impl Into<Node>, stop: F) -> RenderStream
    where
        F: Fn(&Element) -> bool + Send + Sync + 'static,
    {
        let ctx = self.context();
        self.evaluate(node.into(), &ctx, StopPredicate::new(stop))
    }

    pub(crate) fn expand(
        &self,
        node: Node,
        ctx: RenderContext,
        stop: StopPredicate,
        depth: usize,
    ) -> RenderStream {
        match node {
            Node::Literal(literal) => settled(literal.to_text().map(Part::Text).into_iter().collect()),
            Node::Sequence(children) => sequence::combine(self, children, ctx, stop, depth),
            Node::Element(element) if stop.matches(&element) => {
                trace!(component = element.name(), depth, "stopping at element");
                settled(vec![Part::Element(element.bind_if_unbound(&ctx))])
            }
            node => {
                let expansion = Expansion::new(&node, depth);
                let renderer = self.clone();
                let base: NextRender =
                    Box::new(move || renderer.expand_suspended(node, ctx, stop, depth));
                self.inner.middleware.run(expansion, base)
            }
        }
    }

    fn expand_suspended(
        &self,
        node: Node,
        ctx: RenderContext,
        stop: StopPredicate,
        depth: usize,
    ) -> RenderStream {
        match node {
            Node::Element(element) => self.expand_element(element, ctx, stop, depth),
            Node::Deferred(deferred) => {
                let renderer = self.clone();
                stream::once(async move {
                    match deferred.resolve().await {
                        Ok(node) => renderer.expand(node, ctx, stop, depth),
                        Err(e) => failed(e),
                    }
                })
                .flatten()
                .boxed()
            }
            Node::Stream(source) => self.expand_stream(source, ctx, stop, depth),
            structural => self.expand(structural, ctx, stop, depth),
        }
    }

    fn expand_element(
        &self,
        element: Element,
        ctx: RenderContext,
        stop: StopPredicate,
        depth: usize,
    ) -> RenderStream {
        if let Some(limit) = self.inner.config.max_depth {
            if depth >= limit {
                return failed(RenderError::DepthExceeded {
                    depth,
                    component: element.name().to_string(),
                });
            }
        }
        let ctx = element
            .bound_context()
            .cloned()
            .unwrap_or(ctx)
            .at_depth(depth + 1);
        let renderer = self.clone();
        stream::once(async move {
            trace!(component = element.name(), depth, context = %ctx.id(), "invoking component");
            match element.component().render(element.props(), &ctx) {
                Ok(node) => renderer.expand(node, ctx, stop, depth + 1),
                Err(e) => {
                    debug!(component = element.name(), error = %e, "component failed");
                    failed(e)
                }
            }
        })
        .flatten()
        .boxed()
    }

    fn expand_stream(
        &self,
        source: StreamNode,
        ctx: RenderContext,
        stop: StopPredicate,
        depth: usize,
    ) -> RenderStream {
        let renderer = self.clone();
        stream::once(async move {
            match source.open() {
                Ok(frames) => renderer.expand_frames(frames, ctx, stop, depth),
                Err(e) => failed(e),
            }
        })
        .flatten()
        .boxed()
    }

    fn expand_frames(
        &self,
        frames: FrameStream,
        ctx: RenderContext,
        stop: StopPredicate,
        depth: usize,
    ) -> RenderStream {
        let renderer = self.clone();
        let snapshots = stream::unfold(Some(frames), move |state| {
            let renderer = renderer.clone();
            let ctx = ctx.clone();
            let stop = stop.clone();
            async move {
                let mut frames = state?;
                match frames.next().await? {
                    Ok(StreamFrame::Partial(node)) => {
                        Some((renderer.expand(node, ctx, stop, depth), Some(frames)))
                    }
                    Ok(StreamFrame::Final(node)) => {
                        Some((renderer.expand(node, ctx, stop, depth), None))
                    }
                    Err(e) => Some((failed(e), None)),
                }
            }
        })
        .flatten()
        .boxed();
        stop_after_error(snapshots)
    }
}

/// A stream holding one already settled snapshot.
pub(crate) fn settled(parts: Vec<Part>) -> RenderStream {
    stream::once(future::ready(Ok(parts))).boxed()
}

/// A stream failing immediately with `error`.
pub(crate) fn failed(error: RenderError) -> RenderStream {
    stream::once(future::ready(Err(error))).boxed()
}

/// Ends `snapshots` right after the first error it yields.
fn stop_after_error(snapshots: RenderStream) -> RenderStream {
    snapshots
        .scan(false, |errored, item| {
            if *errored {
                return future::ready(None);
            }
            *errored = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

/// Drives `snapshots` to completion and returns the last snapshot.
pub(crate) async fn settle(mut snapshots: RenderStream) -> RenderResult<Vec<Part>> {
    let mut last = Vec::new();
    while let Some(snapshot) = snapshots.next().await {
        last = snapshot?;
    }
    Ok(last)
}
