//! Memoization - reference a node many times, run its effects once.
//!
//! - Elements get a per-context cache of their rendered output; failures are
//!   cached as pre-rejected deferreds.
//! - Deferreds are wrapped so the resolved node is memoized once.
//! - Streams become replaying sources: a growing frame buffer plus one shared
//!   pull future, so late consumers replay what was produced and then wait on
//!   the same pull instead of pulling the source again. Binding an already
//!   replaying stream wraps it once more with the new scope.

use crate::context::{ContextId, RenderContext};
use crate::error::{RenderError, RenderResult};
use crate::node::{Component, Element, FrameSource, FrameStream, Node, Props, StreamFrame, StreamNode};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;
use uuid::Uuid;

/// Memoizes `node`. Element memos are keyed by the context evaluating them.
pub fn memo(node: impl Into<Node>) -> Node {
    memoize(node.into(), None)
}

/// Memoizes `node` and binds its elements to `ctx`, so they evaluate once no
/// matter which context later reaches them.
pub fn memo_bound(node: impl Into<Node>, ctx: &RenderContext) -> Node {
    memoize(node.into(), Some(ctx))
}

fn memoize(node: Node, scope: Option<&RenderContext>) -> Node {
    match node {
        Node::Literal(_) => node,
        Node::Sequence(children) => Node::Sequence(
            children
                .iter()
                .cloned()
                .map(|child| memoize(child, scope))
                .collect(),
        ),
        Node::Element(element) => {
            let memoized = memo_element(element);
            Node::Element(match scope {
                Some(ctx) => memoized.bind_if_unbound(ctx),
                None => memoized,
            })
        }
        Node::Deferred(deferred) => {
            let scope = scope.cloned();
            Node::deferred(async move {
                deferred
                    .resolve()
                    .await
                    .map(|resolved| memoize(resolved, scope.as_ref()))
            })
        }
        // a bound memo re-buffers so the frames pick up the new scope
        Node::Stream(source) if source.is_replayable() && scope.is_none() => Node::Stream(source),
        Node::Stream(source) => Node::Stream(StreamNode::new(Arc::new(Replay::new(
            source,
            scope.cloned(),
        )))),
    }
}

fn memo_element(element: Element) -> Element {
    if element.memo_id().is_some() {
        return element;
    }
    let id = Uuid::new_v4();
    let bound = element.bound_context().cloned();
    let props = element.props().clone();
    let memoized = Memoized {
        id,
        name: element.name().to_string(),
        target: element,
        cache: Mutex::new(HashMap::new()),
    };
    let memoized = Element::memoized(Arc::new(memoized), props, id);
    match bound {
        Some(ctx) => memoized.with_context(ctx),
        None => memoized,
    }
}

/// Caches the wrapped element's output per evaluating context.
struct Memoized {
    id: Uuid,
    name: String,
    target: Element,
    cache: Mutex<HashMap<ContextId, Node>>,
}

impl Component for Memoized {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, _props: &Props, ctx: &RenderContext) -> RenderResult<Node> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|e| RenderError::Internal(format!("memo cache poisoned: {}", e)))?;
        if let Some(node) = cache.get(&ctx.id()) {
            trace!(memo = %self.id, component = %self.name, context = %ctx.id(), "memo hit");
            return Ok(node.clone());
        }
        trace!(memo = %self.id, component = %self.name, context = %ctx.id(), "memo miss");
        let node = match self.target.component().render(self.target.props(), ctx) {
            Ok(node) => memo(node),
            Err(e) => Node::rejected(e),
        };
        cache.insert(ctx.id(), node.clone());
        Ok(node)
    }
}

type PendingPull = Shared<BoxFuture<'static, ()>>;

struct ReplayState {
    frames: Vec<RenderResult<StreamFrame>>,
    finished: bool,
    pending: Option<PendingPull>,
}

enum Source {
    Unopened(StreamNode),
    Open(FrameStream),
    Drained,
}

/// Buffer and source shared by every cursor of one replaying stream.
///
/// The pending pull owns the source but only a `Weak` handle on the buffer
/// that stores it, so dropping every cursor mid-pull frees the source too.
struct ReplayShared {
    state: Arc<Mutex<ReplayState>>,
    source: Arc<AsyncMutex<Source>>,
    scope: Option<RenderContext>,
}

fn lock_state(state: &Mutex<ReplayState>) -> MutexGuard<'_, ReplayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReplayShared {
    /// The in-flight pull, or a new one if none is running.
    fn pull(&self) -> PendingPull {
        let mut state = lock_state(&self.state);
        if let Some(pending) = &state.pending {
            return pending.clone();
        }
        let source = Arc::clone(&self.source);
        let buffer = Arc::downgrade(&self.state);
        let scope = self.scope.clone();
        let pending = async move {
            let next = advance(&source).await;
            if let Some(buffer) = buffer.upgrade() {
                record(&buffer, next, scope.as_ref());
            }
        }
        .boxed()
        .shared();
        state.pending = Some(pending.clone());
        pending
    }
}

async fn advance(source: &AsyncMutex<Source>) -> Option<RenderResult<StreamFrame>> {
    let mut source = source.lock().await;
    let opened = match &*source {
        Source::Unopened(node) => Some(node.open()),
        _ => None,
    };
    let next = match opened {
        Some(Err(e)) => Some(Err(e)),
        Some(Ok(frames)) => {
            *source = Source::Open(frames);
            next_frame(&mut source).await
        }
        None => next_frame(&mut source).await,
    };
    if !matches!(next, Some(Ok(StreamFrame::Partial(_)))) {
        *source = Source::Drained;
    }
    next
}

fn record(
    buffer: &Mutex<ReplayState>,
    next: Option<RenderResult<StreamFrame>>,
    scope: Option<&RenderContext>,
) {
    let mut state = lock_state(buffer);
    match next {
        Some(Ok(frame)) => {
            state.finished = frame.is_final();
            state.frames.push(Ok(frame.map(|node| memoize(node, scope))));
        }
        Some(Err(e)) => {
            state.frames.push(Err(e));
            state.finished = true;
        }
        None => state.finished = true,
    }
    trace!(buffered = state.frames.len(), finished = state.finished, "replay buffer advanced");
    state.pending = None;
}

async fn next_frame(source: &mut Source) -> Option<RenderResult<StreamFrame>> {
    match source {
        Source::Open(frames) => frames.next().await,
        _ => None,
    }
}

/// A frame source that can be opened any number of times.
struct Replay(Arc<ReplayShared>);

impl Replay {
    fn new(source: StreamNode, scope: Option<RenderContext>) -> Self {
        Replay(Arc::new(ReplayShared {
            state: Arc::new(Mutex::new(ReplayState {
                frames: Vec::new(),
                finished: false,
                pending: None,
            })),
            source: Arc::new(AsyncMutex::new(Source::Unopened(source))),
            scope,
        }))
    }
}

impl FrameSource for Replay {
    fn open(&self) -> RenderResult<FrameStream> {
        let shared = Arc::clone(&self.0);
        Ok(stream::unfold((shared, 0usize), |(shared, cursor)| async move {
            loop {
                {
                    let state = lock_state(&shared.state);
                    if let Some(frame) = state.frames.get(cursor) {
                        let frame = frame.clone();
                        drop(state);
                        return Some((frame, (shared, cursor + 1)));
                    }
                    if state.finished {
                        return None;
                    }
                }
                let pending = shared.pull();
                pending.await;
            }
        })
        .boxed())
    }

    fn replayable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKey;
    use crate::render::Renderer;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(name: &'static str, calls: &Arc<AtomicUsize>) -> Node {
        let calls = calls.clone();
        Node::from_fn(name, move |_, _| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Node::text(format!("{}#{}", name, n)))
        })
    }

    #[tokio::test]
    async fn test_element_runs_once_per_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = memo(counted("Roll", &calls));
        let node = crate::seq![shared.clone(), " ", shared];
        assert_eq!(Renderer::new().render(node).await.unwrap(), "Roll#1 Roll#1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_contexts_get_distinct_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let key = ContextKey::new("Seed", 0_i64);
        let shared = memo(counted("Roll", &calls));
        let node = crate::seq![key.provide(1, shared.clone()), key.provide(2, shared)];
        assert_eq!(Renderer::new().render(node).await.unwrap(), "Roll#1Roll#2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bound_memo_ignores_evaluating_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let key = ContextKey::new("Seed", 0_i64);
        let renderer = Renderer::new();
        let shared = renderer.context().memo(counted("Roll", &calls));
        let node = crate::seq![key.provide(1, shared.clone()), key.provide(2, shared)];
        assert_eq!(renderer.render(node).await.unwrap(), "Roll#1Roll#1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let shared = memo(Node::from_fn("Flaky", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RenderError::msg("flaked"))
        }));
        let renderer = Renderer::new();
        let ctx = renderer.context();
        assert_eq!(ctx.render(shared.clone()).await, Err(RenderError::msg("flaked")));
        assert_eq!(ctx.render(shared).await, Err(RenderError::msg("flaked")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memo_is_idempotent_for_elements() {
        let calls = Arc::new(AtomicUsize::new(0));
        let once = memo(counted("Roll", &calls));
        let twice = memo(once.clone());
        let (Some(a), Some(b)) = (once.as_element(), twice.as_element()) else {
            panic!("expected elements");
        };
        assert!(a.same_invocation(b));
        assert_eq!(a.name(), "Roll");
    }

    #[tokio::test]
    async fn test_stream_is_pulled_once() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        let frames = stream::iter(vec![
            StreamFrame::Partial(Node::text("a")),
            StreamFrame::Partial(Node::text("ab")),
            StreamFrame::Final(Node::text("abc")),
        ])
        .inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .map(Ok);
        let shared = memo(Node::stream(frames));
        let renderer = Renderer::new();

        let node = crate::seq![shared.clone(), "|", shared.clone()];
        assert_eq!(renderer.render(node).await.unwrap(), "abc|abc");
        // a late consumer replays the buffer
        assert_eq!(renderer.render(shared).await.unwrap(), "abc");
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stream_error_is_replayed() {
        let frames = stream::iter(vec![
            Ok(StreamFrame::Partial(Node::text("a"))),
            Err(RenderError::msg("cut")),
        ]);
        let shared = memo(Node::stream(frames));
        let renderer = Renderer::new();
        assert_eq!(renderer.render(shared.clone()).await, Err(RenderError::msg("cut")));
        assert_eq!(renderer.render(shared).await, Err(RenderError::msg("cut")));
    }

    #[tokio::test]
    async fn test_dropping_consumers_mid_pull_frees_source() {
        let tracker = Arc::new(());
        let held = tracker.clone();
        let frames = stream::pending::<RenderResult<StreamFrame>>().map(move |frame| {
            let _keep = &held;
            frame
        });
        let shared = memo(Node::stream(frames));
        let mut snapshots = Renderer::new().render_stream(shared.clone());
        let first = tokio::time::timeout(std::time::Duration::from_millis(10), snapshots.next()).await;
        assert!(first.is_err());
        assert_eq!(Arc::strong_count(&tracker), 2);

        drop(snapshots);
        drop(shared);
        assert_eq!(Arc::strong_count(&tracker), 1);
    }

    #[tokio::test]
    async fn test_bound_memo_rebinds_replaying_stream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let key = ContextKey::new("Seed", 0_i64);
        let renderer = Renderer::new();
        let frames = Node::frames(vec![StreamFrame::Final(counted("Roll", &calls))]);
        let shared = renderer.context().memo(memo(frames));
        let node = crate::seq![key.provide(1, shared.clone()), key.provide(2, shared)];
        assert_eq!(renderer.render(node).await.unwrap(), "Roll#1Roll#1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deferred_resolution_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = counted("Late", &calls);
        let shared = memo(Node::deferred(async move { Ok(inner) }));
        let renderer = Renderer::new();
        let ctx = renderer.context();
        let node = crate::seq![shared.clone(), shared];
        assert_eq!(ctx.render(node).await.unwrap(), "Late#1Late#1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
