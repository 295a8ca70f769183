use canopy::{
    memo, render, render_stream, ContextKey, ErrorBoundary, Node, RenderError, StreamFrame,
};
use futures::stream::{self, StreamExt};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn after(millis: u64, node: impl Into<Node>) -> Node {
    let node = node.into();
    Node::deferred(async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(node)
    })
}

fn consumer(key: &ContextKey<f64>) -> Node {
    let key = key.clone();
    Node::from_fn("Consumer", move |_, ctx| Ok(Node::from(ctx.get(&key))))
}

#[tokio::test]
async fn literals_render_as_themselves() {
    assert_eq!(render("plain text").await.unwrap(), "plain text");
    assert_eq!(render(7).await.unwrap(), "7");
    assert_eq!(render(2.25).await.unwrap(), "2.25");
    assert_eq!(render(false).await.unwrap(), "");
    assert_eq!(render(None::<String>).await.unwrap(), "");
}

#[tokio::test]
async fn sequence_concatenates_children_in_order() {
    let a = after(25, "a");
    let b = after(0, Node::from_fn("B", |_, _| Ok(Node::text("b"))));
    let c = after(10, "c");
    let separately = format!(
        "{}{}{}",
        render(a.clone()).await.unwrap(),
        render(b.clone()).await.unwrap(),
        render(c.clone()).await.unwrap()
    );
    assert_eq!(render(canopy::seq![a, b, c]).await.unwrap(), separately);
    assert_eq!(separately, "abc");
}

#[tokio::test]
async fn temperature_providers() {
    let temperature = ContextKey::new("Temperature", 0.0_f64);
    let node = canopy::seq![
        temperature.provide(0.5, consumer(&temperature)),
        temperature.provide(1.0, consumer(&temperature)),
    ];
    assert_eq!(render(node).await.unwrap(), "0.51");
}

#[tokio::test]
async fn context_default_outside_provider() {
    let temperature = ContextKey::new("Temperature", 0.25_f64);
    let node = canopy::seq![
        consumer(&temperature),
        "/",
        temperature.provide(0.75, consumer(&temperature)),
    ];
    assert_eq!(render(node).await.unwrap(), "0.25/0.75");
}

#[tokio::test]
async fn nested_providers_inherit_outer_bindings() {
    let temperature = ContextKey::new("Temperature", 0.0_f64);
    let model = ContextKey::new("Model", "default".to_string());
    let describe = {
        let (temperature, model) = (temperature.clone(), model.clone());
        Node::from_fn("Describe", move |_, ctx| {
            Ok(Node::text(format!("{}@{}", ctx.get(&model), ctx.get(&temperature))))
        })
    };
    let node = model.provide(
        "small".to_string(),
        temperature.provide(0.2, canopy::seq![describe.clone(), " ", model.provide("large".to_string(), describe)]),
    );
    assert_eq!(render(node).await.unwrap(), "small@0.2 large@0.2");
}

#[tokio::test]
async fn memoized_stream_referenced_twice_runs_generator_once() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let generator = stream::once(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        stream::iter(["Once", "Once upon", "Once upon a time"])
    })
    .flatten()
    .then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(chunk.to_string())
    });
    let story = memo(Node::text_stream(generator));

    let text = render(canopy::seq![story.clone(), " | ", story]).await.unwrap();
    assert_eq!(text, "Once upon a time | Once upon a time");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn render_stream_ends_with_final_value() {
    let node = Node::text_stream(stream::iter(["a", "ab", "abc"]).map(|s| Ok(s.to_string())));
    let snapshots: Vec<String> = render_stream(node).map(|s| s.unwrap()).collect().await;
    assert_eq!(snapshots.last().map(String::as_str), Some("abc"));
    assert_eq!(snapshots, vec!["a", "ab", "abc"]);
}

#[tokio::test]
async fn render_stream_refines_around_slow_children() {
    let node = canopy::seq!["[", after(20, "slow"), "|", after(1, "fast"), "]"];
    let snapshots: Vec<String> = render_stream(node).map(|s| s.unwrap()).collect().await;
    assert_eq!(snapshots.last().unwrap(), "[slow|fast]");
}

#[tokio::test]
async fn stream_frames_can_hold_elements() {
    let shout = |word: &'static str| {
        Node::from_fn("Shout", move |_, _| Ok(Node::text(word.to_uppercase())))
    };
    let node = Node::frames(vec![
        StreamFrame::Partial(shout("draft")),
        StreamFrame::Final(canopy::seq![shout("final"), "!"]),
    ]);
    let snapshots: Vec<String> = render_stream(node).map(|s| s.unwrap()).collect().await;
    assert_eq!(snapshots, vec!["DRAFT", "FINAL!"]);
}

#[tokio::test]
async fn one_shot_stream_used_twice_fails() {
    let node = Node::text_stream(stream::iter(vec![Ok("x".to_string())]));
    let result = render(canopy::seq![node.clone(), node]).await;
    assert_eq!(result, Err(RenderError::StreamConsumed));
}

#[tokio::test]
async fn render_stream_error_ends_stream() {
    let frames = stream::iter(vec![
        Ok("partial".to_string()),
        Err(RenderError::msg("connection reset")),
        Ok("never".to_string()),
    ]);
    let items: Vec<_> = render_stream(Node::text_stream(frames)).collect().await;
    assert_eq!(
        items,
        vec![Ok("partial".to_string()), Err(RenderError::msg("connection reset"))]
    );
}

#[tokio::test]
async fn error_boundary_static_fallback() {
    let throwing = Node::from_fn("Throwing", |_, _| Err(RenderError::msg("bad input")));
    assert_eq!(render(ErrorBoundary::new(throwing, "X")).await.unwrap(), "X");
}

#[tokio::test]
async fn error_boundary_functional_fallback() {
    let throwing = Node::from_fn("Throwing", |_, _| Err(RenderError::msg("bad input")));
    let node = ErrorBoundary::with_handler(throwing, |e| Node::text(format!("err:{}", e.message())));
    assert_eq!(render(node).await.unwrap(), "err:bad input");
}

#[tokio::test]
async fn error_boundary_catches_rejected_deferred_and_failing_stream() {
    let rejected = Node::rejected(RenderError::msg("timeout"));
    let failing = Node::text_stream(stream::iter(vec![
        Ok("half".to_string()),
        Err(RenderError::msg("cut off")),
    ]));
    let node = canopy::seq![
        ErrorBoundary::with_handler(rejected, |e| Node::text(format!("<{}>", e.message()))),
        ErrorBoundary::with_handler(failing, |e| Node::text(format!("<{}>", e.message()))),
    ];
    assert_eq!(render(node).await.unwrap(), "<timeout><cut off>");
}

#[tokio::test]
async fn error_without_boundary_fails_render() {
    let node = canopy::seq!["ok", after(1, Node::rejected(RenderError::msg("late failure")))];
    assert_eq!(render(node).await, Err(RenderError::msg("late failure")));
}

#[tokio::test]
async fn dropping_render_stream_cancels_pending_work() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let slow = Node::deferred(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        flag.store(true, Ordering::SeqCst);
        Ok(Node::text("slow"))
    });
    let mut snapshots = render_stream(canopy::seq!["fast", slow]);
    let first = tokio::time::timeout(Duration::from_millis(10), snapshots.next()).await;
    assert!(first.is_err(), "sequence waits for every child before its first snapshot");
    drop(snapshots);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!finished.load(Ordering::SeqCst));
}
