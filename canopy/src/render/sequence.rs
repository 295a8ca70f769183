//! Sequence combinator: ordered concatenation of concurrently evaluated children.
//!
//! The first snapshot waits for every child's first snapshot. After that each
//! child update replaces only that child's slot and re-yields the whole
//! ordered concatenation.

use super::{RenderStream, Renderer, StopPredicate};
use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::node::{Node, Part};
use futures::future::try_join_all;
use futures::stream::{self, select_all, BoxStream, SelectAll, StreamExt};
use std::sync::Arc;
use tracing::trace;

type IndexedStream = BoxStream<'static, (usize, RenderResult<Vec<Part>>)>;

enum SequenceState {
    Starting(Vec<RenderStream>),
    Racing {
        slots: Vec<Vec<Part>>,
        pending: SelectAll<IndexedStream>,
    },
    Finished,
}

type Step = Option<(RenderResult<Vec<Part>>, SequenceState)>;

pub(super) fn combine(
    renderer: &Renderer,
    children: Arc<[Node]>,
    ctx: RenderContext,
    stop: StopPredicate,
    depth: usize,
) -> RenderStream {
    let streams: Vec<RenderStream> = children
        .iter()
        .cloned()
        .map(|child| renderer.expand(child, ctx.clone(), stop.clone(), depth))
        .collect();

    stream::unfold(SequenceState::Starting(streams), |state| async move {
        match state {
            SequenceState::Starting(streams) => start(streams).await,
            SequenceState::Racing { slots, pending } => race(slots, pending).await,
            SequenceState::Finished => None,
        }
    })
    .boxed()
}

async fn start(streams: Vec<RenderStream>) -> Step {
    let firsts = streams.into_iter().map(|snapshots| async move {
        match snapshots.into_future().await {
            (Some(Ok(parts)), rest) => Ok((parts, Some(rest))),
            (Some(Err(e)), _) => Err(e),
            (None, _) => Ok((Vec::new(), None)),
        }
    });

    let results = match try_join_all(firsts).await {
        Ok(results) => results,
        Err(e) => return Some((Err(e), SequenceState::Finished)),
    };

    let mut slots = Vec::with_capacity(results.len());
    let mut live: Vec<IndexedStream> = Vec::new();
    for (index, (parts, rest)) in results.into_iter().enumerate() {
        slots.push(parts);
        if let Some(rest) = rest {
            live.push(rest.map(move |snapshot| (index, snapshot)).boxed());
        }
    }
    trace!(children = slots.len(), live = live.len(), "sequence started");

    let snapshot = concat(&slots);
    Some((
        Ok(snapshot),
        SequenceState::Racing {
            slots,
            pending: select_all(live),
        },
    ))
}

async fn race(mut slots: Vec<Vec<Part>>, mut pending: SelectAll<IndexedStream>) -> Step {
    let (index, snapshot) = pending.next().await?;
    match snapshot {
        Ok(parts) => {
            slots[index] = parts;
            let snapshot = concat(&slots);
            Some((Ok(snapshot), SequenceState::Racing { slots, pending }))
        }
        Err(e) => Some((Err(e), SequenceState::Finished)),
    }
}

fn concat(slots: &[Vec<Part>]) -> Vec<Part> {
    slots.iter().flatten().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::node::StreamFrame;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn delayed(text: &'static str, millis: u64) -> Node {
        Node::deferred(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(Node::text(text))
        })
    }

    #[tokio::test]
    async fn test_order_is_declaration_order() {
        let node = crate::seq![delayed("a", 30), delayed("b", 1), delayed("c", 10)];
        assert_eq!(Renderer::new().render(node).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_each_update_recombines() {
        let counting = Node::frames(vec![
            StreamFrame::Partial(Node::text("1")),
            StreamFrame::Partial(Node::text("12")),
            StreamFrame::Final(Node::text("123")),
        ]);
        let node = crate::seq!["[", counting, "]"];
        let snapshots: Vec<String> = Renderer::new()
            .render_stream(node)
            .map(|s| s.unwrap())
            .collect()
            .await;
        assert_eq!(snapshots, vec!["[1]", "[12]", "[123]"]);
    }

    #[tokio::test]
    async fn test_empty_sequence() {
        let node = Node::sequence(Vec::<Node>::new());
        assert_eq!(Renderer::new().render(node).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_first_error_fails_fast() {
        let slow = delayed("slow", 5_000);
        let broken = Node::rejected(RenderError::msg("nope"));
        let started = std::time::Instant::now();
        let result = Renderer::new().render(crate::seq![slow, broken]).await;
        assert_eq!(result, Err(RenderError::msg("nope")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
