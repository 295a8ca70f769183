//! Inspection helpers built on partial rendering.
//!
//! - `Stepper`: expand a tree one level at a time
//! - `extract`: pull tagged elements out of a tree for re-routing
//! - `debug_tree` / `debug_parts`: static JSX-like views of trees and snapshots

use crate::error::RenderResult;
use crate::node::{Element, Node, Part};
use crate::render::Renderer;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::fmt::Write;
use tracing::debug;

/// Renders `node` as JSX-like text without evaluating anything.
pub fn debug_tree(node: &Node) -> String {
    let mut out = String::new();
    write_node(&mut out, node);
    out
}

/// Renders a snapshot as JSX-like text; stopped elements show their children.
pub fn debug_parts(parts: &[Part]) -> String {
    let mut out = String::new();
    for part in parts {
        match part {
            Part::Text(text) => out.push_str(text),
            Part::Element(element) => write_element(&mut out, element),
        }
    }
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Literal(literal) => {
            if let Some(text) = literal.to_text() {
                out.push_str(&text);
            }
        }
        Node::Sequence(children) => children.iter().for_each(|child| write_node(out, child)),
        Node::Element(element) => write_element(out, element),
        Node::Deferred(_) => out.push_str("{deferred}"),
        Node::Stream(_) => out.push_str("{stream}"),
    }
}

fn write_element(out: &mut String, element: &Element) {
    let _ = write!(out, "<{}", element.name());
    for (key, value) in element.props().attrs() {
        let _ = write!(out, " {}={}", key, value);
    }
    let children = element.props().child_nodes();
    if children.is_empty() {
        out.push_str(" />");
        return;
    }
    out.push('>');
    children.iter().for_each(|child| write_node(out, child));
    let _ = write!(out, "</{}>", element.name());
}

/// Expands a tree one level per step.
///
/// Every element is stopped on; a step expands each currently stopped
/// element exactly once and stops again on whatever elements it produced.
/// Stopped elements carry their context, so the final text matches a plain
/// `render` of the same tree.
pub struct Stepper {
    renderer: Renderer,
    parts: Vec<Part>,
    steps: usize,
}

impl Stepper {
    pub async fn new(node: impl Into<Node>) -> RenderResult<Self> {
        Self::with_renderer(Renderer::default(), node).await
    }

    pub async fn with_renderer(renderer: Renderer, node: impl Into<Node>) -> RenderResult<Self> {
        let parts = renderer.partial_render(node, |_| true).await?;
        Ok(Self {
            renderer,
            parts,
            steps: 0,
        })
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_settled(&self) -> bool {
        self.parts.iter().all(|part| part.as_element().is_none())
    }

    /// Current snapshot as JSX-like text.
    pub fn output(&self) -> String {
        debug_parts(&self.parts)
    }

    /// Expands every stopped element by one level. On error the current
    /// snapshot is kept.
    pub async fn step(&mut self) -> RenderResult<&[Part]> {
        let expansions = self.parts.iter().cloned().map(|part| {
            let renderer = self.renderer.clone();
            async move {
                match part {
                    Part::Text(text) => Ok(vec![Part::Text(text)]),
                    Part::Element(element) => {
                        let target = element.clone();
                        renderer
                            .partial_render(element, move |candidate| {
                                !candidate.same_invocation(&target)
                            })
                            .await
                    }
                }
            }
        });
        let expanded = try_join_all(expansions).await?;
        self.parts = expanded.into_iter().flatten().collect();
        self.steps += 1;
        debug!(step = self.steps, settled = self.is_settled(), "stepper advanced");
        Ok(&self.parts)
    }

    /// Steps until no element is left and returns the final text.
    pub async fn run_to_end(&mut self) -> RenderResult<String> {
        while !self.is_settled() {
            self.step().await?;
        }
        Ok(Part::concat(&self.parts))
    }
}

/// Result of [`extract`]: a snapshot with the tagged elements left in place.
///
/// Keeps the renderer that produced it, so resuming runs through the same
/// middleware and limits.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub parts: Vec<Part>,
    renderer: Renderer,
}

impl Extraction {
    /// Text around the extracted elements.
    pub fn text(&self) -> String {
        Part::concat(&self.parts)
    }

    /// Extracted elements, in output order, bound to their contexts.
    pub fn elements(&self) -> Vec<Element> {
        self.parts
            .iter()
            .filter_map(|part| part.as_element().cloned())
            .collect()
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Renders every extracted element to completion.
    pub async fn resume(&self) -> RenderResult<Vec<String>> {
        try_join_all(
            self.elements()
                .into_iter()
                .map(|element| self.renderer.render(element)),
        )
        .await
    }

    /// Renders the whole snapshot to completion, resuming every element in place.
    pub async fn resume_all(&self) -> RenderResult<String> {
        let nodes: Vec<Node> = self
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => Node::text(text.clone()),
                Part::Element(element) => Node::Element(element.clone()),
            })
            .collect();
        self.renderer.render(nodes).await
    }
}

impl Renderer {
    /// Renders `node`, stopping on every element whose name is in `tags`.
    pub async fn extract(&self, node: impl Into<Node>, tags: &[&str]) -> RenderResult<Extraction> {
        let tags: HashSet<String> = tags.iter().map(|tag| tag.to_string()).collect();
        let parts = self
            .partial_render(node, move |element| tags.contains(element.name()))
            .await?;
        debug!(elements = parts.iter().filter(|p| p.as_element().is_some()).count(), "extracted");
        Ok(Extraction {
            parts,
            renderer: self.clone(),
        })
    }
}

/// [`Renderer::extract`] with a default renderer.
pub async fn extract(node: impl Into<Node>, tags: &[&str]) -> RenderResult<Extraction> {
    Renderer::default().extract(node, tags).await
}
