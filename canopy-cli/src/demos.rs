//! Built-in demo trees.

use canopy::{memo, ContextKey, Element, ErrorBoundary, Node, Props, RenderError};
use clap::ValueEnum;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// Context providers: the same consumer under two temperatures
    Temperature,
    /// A memoized, slowly streamed story referenced twice
    Story,
    /// Error boundaries around failing components, deferreds and streams
    Fragile,
    /// Tagged tool elements, for extraction
    Tools,
}

impl Demo {
    pub fn build(self) -> Node {
        match self {
            Demo::Temperature => temperature(),
            Demo::Story => story(),
            Demo::Fragile => fragile(),
            Demo::Tools => tools(),
        }
    }
}

fn temperature() -> Node {
    let temperature = ContextKey::new("Temperature", 0.0_f64);
    let model = ContextKey::new("Model", "tiny".to_string());
    let completion = {
        let (temperature, model) = (temperature.clone(), model.clone());
        Node::from_fn("Completion", move |_, ctx| {
            let temp = ctx.get(&temperature);
            let model = ctx.get(&model);
            Ok(Node::deferred(async move {
                tokio::time::sleep(Duration::from_millis((temp * 100.0) as u64)).await;
                Ok(Node::text(format!("[{} @ {}]", model, temp)))
            }))
        })
    };
    canopy::seq![
        "cold: ",
        temperature.provide(0.5, completion.clone()),
        "\nhot:  ",
        temperature.provide(1.0, model.provide("large".to_string(), completion.clone())),
        "\ndefault: ",
        completion,
        "\n",
    ]
}

fn story() -> Node {
    let generations = Arc::new(AtomicUsize::new(0));
    let counter = generations.clone();
    let words = ["Once", " upon", " a", " time,", " a", " tree", " rendered", " itself."];
    let chunks = stream::once(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        stream::iter(words)
    })
    .flatten()
    .scan(String::new(), |text, word| {
        text.push_str(word);
        futures::future::ready(Some(text.clone()))
    })
    .then(|text| async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        Ok(text)
    });
    let story = memo(Node::text_stream(chunks));
    let footer = Node::from_fn("GenerationCount", move |_, _| {
        Ok(Node::text(format!(
            "\n(generated {} time(s))\n",
            generations.load(Ordering::SeqCst)
        )))
    });
    canopy::seq!["Title: ", story.clone(), "\n---\n", story, footer]
}

fn fragile() -> Node {
    let flaky = Node::from_fn("Flaky", |_, _| {
        Err(RenderError::component("Flaky", "upstream returned 503"))
    });
    let slow_failure = Node::deferred(async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Err(RenderError::msg("deadline exceeded"))
    });
    let cut_stream = Node::text_stream(stream::iter(vec![
        Ok("partial answ".to_string()),
        Err(RenderError::msg("stream interrupted")),
    ]));
    let report = |e: &RenderError| Node::text(format!("(recovered: {})", e.message()));
    canopy::seq![
        "a: ",
        ErrorBoundary::new(flaky, "(static fallback)"),
        "\nb: ",
        ErrorBoundary::with_handler(slow_failure, report),
        "\nc: ",
        ErrorBoundary::with_handler(cut_stream, report),
        "\n",
    ]
}

fn tool(name: &str, input: &str) -> Element {
    Element::from_fn(
        "Tool",
        Props::new().attr("name", name).attr("input", input),
        |props, _| {
            let name = props.get_str("name").unwrap_or("unknown").to_string();
            let input = props.get_str("input").unwrap_or("").to_string();
            Ok(Node::deferred(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Node::text(match name.as_str() {
                    "reverse" => input.chars().rev().collect(),
                    "upper" => input.to_uppercase(),
                    _ => format!("{}({})", name, input),
                }))
            }))
        },
    )
}

fn tools() -> Node {
    let answer = Node::from_fn("Answer", |_, _| {
        Ok(canopy::seq![
            "reversed: ",
            tool("reverse", "canopy"),
            "\nshouted: ",
            tool("upper", "quiet please"),
            "\n",
        ])
    });
    canopy::seq!["Question: what do the tools say?\n", answer]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temperature_demo() {
        let text = canopy::render(Demo::Temperature.build()).await.unwrap();
        assert_eq!(
            text,
            "cold: [tiny @ 0.5]\nhot:  [large @ 1]\ndefault: [tiny @ 0]\n"
        );
    }

    #[tokio::test]
    async fn test_fragile_demo_recovers() {
        let text = canopy::render(Demo::Fragile.build()).await.unwrap();
        assert_eq!(
            text,
            "a: (static fallback)\nb: (recovered: deadline exceeded)\nc: (recovered: stream interrupted)\n"
        );
    }

    #[tokio::test]
    async fn test_tools_demo() {
        let text = canopy::render(Demo::Tools.build()).await.unwrap();
        assert!(text.contains("reversed: yponac"));
        assert!(text.contains("shouted: QUIET PLEASE"));
    }
}
