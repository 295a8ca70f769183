//! Node model consumed by the evaluator.
//!
//! A tree is built from five kinds of nodes:
//! - `Literal`: terminal text, numbers, booleans and null
//! - `Sequence`: ordered children rendered concurrently
//! - `Element`: a suspended component invocation
//! - `Deferred`: a shareable future resolving to a node
//! - `Stream`: a source of intermediate frames followed by a final one
//!
//! Nodes are cheap to clone (everything heavy sits behind `Arc`) and are
//! never mutated by the evaluator.

use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Terminal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Literal {
    /// The text this literal contributes to the output, if any.
    /// Booleans and null render as nothing.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Literal::Text(text) => Some(text.clone()),
            Literal::Integer(i) => Some(i.to_string()),
            Literal::Float(f) => Some(format_float(*f)),
            Literal::Bool(_) | Literal::Null => None,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f64::INFINITY {
        "Infinity".to_string()
    } else if f == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if f == 0.0 {
        "0".to_string()
    } else if f.abs() >= 1e21 || f.abs() < 1e-6 {
        // exponent form with an explicit sign, like JS: 1e+21, 1.5e-7
        let exp = format!("{:e}", f);
        match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => {
                format!("{}e+{}", mantissa, power)
            }
            _ => exp,
        }
    } else {
        f.to_string()
    }
}

/// Node kinds, used for logging and middleware descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Literal,
    Sequence,
    Element,
    Deferred,
    Stream,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Literal => "literal",
            NodeKind::Sequence => "sequence",
            NodeKind::Element => "element",
            NodeKind::Deferred => "deferred",
            NodeKind::Stream => "stream",
        };
        f.write_str(name)
    }
}

/// Immutable element properties: ordered attributes plus child nodes.
///
/// Builders consume and return `Props`; once the props are inside an
/// `Element` there is no way to mutate them.
#[derive(Clone, Default)]
pub struct Props {
    attrs: Arc<IndexMap<String, JsonValue>>,
    children: Arc<Vec<Node>>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Props holding only the given children.
    pub fn with_children<I, T>(children: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Node>,
    {
        Self::new().children(children)
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Arc::make_mut(&mut self.attrs).insert(key.into(), value.into());
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        Arc::make_mut(&mut self.children).push(child.into());
        self
    }

    pub fn children<I, T>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Node>,
    {
        Arc::make_mut(&mut self.children).extend(children.into_iter().map(Into::into));
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.attrs.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(JsonValue::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(JsonValue::as_f64)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn child_nodes(&self) -> &[Node] {
        &self.children
    }

    /// The children as a single node (a sequence, or the only child).
    pub fn children_node(&self) -> Node {
        match self.children.as_slice() {
            [only] => only.clone(),
            many => Node::Sequence(many.iter().cloned().collect()),
        }
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("attrs", &self.attrs)
            .field("children", &self.children.len())
            .finish()
    }
}

/// A component turns props into the next node of the tree.
///
/// Components should be cheap and side-effect free at invocation time; slow
/// or effectful work belongs in the returned `Deferred` or `Stream` nodes so
/// that memoization and concurrent siblings can do their job.
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self, props: &Props, ctx: &RenderContext) -> RenderResult<Node>;
}

/// Adapts a closure into a `Component`.
pub struct FnComponent<F> {
    name: Cow<'static, str>,
    func: F,
}

impl<F> FnComponent<F>
where
    F: Fn(&Props, &RenderContext) -> RenderResult<Node> + Send + Sync,
{
    pub fn new(name: impl Into<Cow<'static, str>>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Component for FnComponent<F>
where
    F: Fn(&Props, &RenderContext) -> RenderResult<Node> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, props: &Props, ctx: &RenderContext) -> RenderResult<Node> {
        (self.func)(props, ctx)
    }
}

struct ElementInner {
    component: Arc<dyn Component>,
    props: Props,
    memo_id: Option<Uuid>,
}

/// A suspended component invocation.
///
/// Clones share the same invocation identity (see [`Element::same_invocation`]).
/// The optional bound context is set by providers, memo binding and the stop
/// path of partial rendering; when present it wins over the ambient context.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
    bound: Option<RenderContext>,
}

impl Element {
    pub fn new(component: Arc<dyn Component>, props: Props) -> Self {
        Self {
            inner: Arc::new(ElementInner {
                component,
                props,
                memo_id: None,
            }),
            bound: None,
        }
    }

    pub fn from_fn<F>(name: impl Into<Cow<'static, str>>, props: Props, func: F) -> Self
    where
        F: Fn(&Props, &RenderContext) -> RenderResult<Node> + Send + Sync + 'static,
    {
        Self::new(Arc::new(FnComponent::new(name, func)), props)
    }

    pub(crate) fn memoized(component: Arc<dyn Component>, props: Props, memo_id: Uuid) -> Self {
        Self {
            inner: Arc::new(ElementInner {
                component,
                props,
                memo_id: Some(memo_id),
            }),
            bound: None,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.component.name()
    }

    pub fn props(&self) -> &Props {
        &self.inner.props
    }

    pub fn component(&self) -> &Arc<dyn Component> {
        &self.inner.component
    }

    pub fn bound_context(&self) -> Option<&RenderContext> {
        self.bound.as_ref()
    }

    pub fn memo_id(&self) -> Option<Uuid> {
        self.inner.memo_id
    }

    /// True when both handles refer to the same constructed element,
    /// regardless of context binding.
    pub fn same_invocation(&self, other: &Element) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn with_context(&self, ctx: RenderContext) -> Element {
        Element {
            inner: Arc::clone(&self.inner),
            bound: Some(ctx),
        }
    }

    pub(crate) fn bind_if_unbound(self, ctx: &RenderContext) -> Element {
        if self.bound.is_some() {
            self
        } else {
            self.with_context(ctx.clone())
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name())
            .field("props", &self.inner.props)
            .field("memo", &self.inner.memo_id)
            .field("bound", &self.bound.as_ref().map(|ctx| ctx.id()))
            .finish()
    }
}

/// A shareable future resolving to a node. The wrapped future runs at most
/// once; every consumer observes the same result (including failures).
#[derive(Clone)]
pub struct Deferred(Shared<BoxFuture<'static, RenderResult<Node>>>);

impl Deferred {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = RenderResult<Node>> + Send + 'static,
    {
        Deferred(future.boxed().shared())
    }

    pub fn rejected(error: RenderError) -> Self {
        Self::new(futures::future::ready(Err(error)))
    }

    pub async fn resolve(&self) -> RenderResult<Node> {
        self.0.clone().await
    }
}

/// One item produced by a stream node.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    /// An intermediate value; more frames may follow.
    Partial(Node),
    /// The last value of the stream.
    Final(Node),
}

impl StreamFrame {
    pub fn node(&self) -> &Node {
        match self {
            StreamFrame::Partial(node) | StreamFrame::Final(node) => node,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StreamFrame::Final(_))
    }

    pub(crate) fn map(self, f: impl FnOnce(Node) -> Node) -> Self {
        match self {
            StreamFrame::Partial(node) => StreamFrame::Partial(f(node)),
            StreamFrame::Final(node) => StreamFrame::Final(f(node)),
        }
    }
}

pub type FrameStream = BoxStream<'static, RenderResult<StreamFrame>>;

/// Something that can hand out a frame stream.
pub trait FrameSource: Send + Sync {
    fn open(&self) -> RenderResult<FrameStream>;

    /// Whether `open` can be called more than once.
    fn replayable(&self) -> bool {
        false
    }
}

/// A raw stream: can be opened exactly once.
struct OneShot {
    frames: Mutex<Option<FrameStream>>,
}

impl FrameSource for OneShot {
    fn open(&self) -> RenderResult<FrameStream> {
        let mut slot = self
            .frames
            .lock()
            .map_err(|e| RenderError::Internal(format!("stream slot poisoned: {}", e)))?;
        slot.take().ok_or(RenderError::StreamConsumed)
    }
}

#[derive(Clone)]
pub struct StreamNode(Arc<dyn FrameSource>);

impl StreamNode {
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        StreamNode(source)
    }

    pub fn open(&self) -> RenderResult<FrameStream> {
        self.0.open()
    }

    pub fn is_replayable(&self) -> bool {
        self.0.replayable()
    }
}

/// One entry of an evaluated snapshot.
#[derive(Debug, Clone)]
pub enum Part {
    Text(String),
    /// An element left unexpanded by a stop predicate.
    Element(Element),
}

impl Part {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(text) => Some(text),
            Part::Element(_) => None,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Part::Element(element) => Some(element),
            Part::Text(_) => None,
        }
    }

    /// Concatenates the text parts of a snapshot; stopped elements are skipped.
    pub fn concat(parts: &[Part]) -> String {
        parts.iter().filter_map(Part::as_text).collect()
    }
}

#[derive(Clone)]
pub enum Node {
    Literal(Literal),
    Sequence(Arc<[Node]>),
    Element(Element),
    Deferred(Deferred),
    Stream(StreamNode),
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Literal(Literal::Text(text.into()))
    }

    pub fn null() -> Self {
        Node::Literal(Literal::Null)
    }

    pub fn sequence<I, T>(children: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Node>,
    {
        Node::Sequence(children.into_iter().map(Into::into).collect())
    }

    pub fn element(component: Arc<dyn Component>, props: Props) -> Self {
        Node::Element(Element::new(component, props))
    }

    /// An element backed by a closure, with empty props.
    pub fn from_fn<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(&Props, &RenderContext) -> RenderResult<Node> + Send + Sync + 'static,
    {
        Node::Element(Element::from_fn(name, Props::new(), func))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = RenderResult<Node>> + Send + 'static,
    {
        Node::Deferred(Deferred::new(future))
    }

    /// A deferred that fails with `error` when evaluated.
    pub fn rejected(error: RenderError) -> Self {
        Node::Deferred(Deferred::rejected(error))
    }

    /// A one-shot stream of frames.
    pub fn stream<S>(frames: S) -> Self
    where
        S: Stream<Item = RenderResult<StreamFrame>> + Send + 'static,
    {
        Node::Stream(StreamNode::new(Arc::new(OneShot {
            frames: Mutex::new(Some(frames.boxed())),
        })))
    }

    /// A one-shot stream of progressively refined text. Every chunk is an
    /// intermediate frame; the last chunk is what the stream settles on.
    pub fn text_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = RenderResult<String>> + Send + 'static,
    {
        Node::stream(chunks.map(|chunk| chunk.map(|text| StreamFrame::Partial(Node::text(text)))))
    }

    /// A one-shot stream over already known frames.
    pub fn frames<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = StreamFrame>,
        I::IntoIter: Send + 'static,
    {
        Node::stream(stream::iter(frames.into_iter().map(Ok)))
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Literal(_) => NodeKind::Literal,
            Node::Sequence(_) => NodeKind::Sequence,
            Node::Element(_) => NodeKind::Element,
            Node::Deferred(_) => NodeKind::Deferred,
            Node::Stream(_) => NodeKind::Stream,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Literal(literal) => f.debug_tuple("Literal").field(literal).finish(),
            Node::Sequence(children) => f.debug_list().entries(children.iter()).finish(),
            Node::Element(element) => element.fmt(f),
            Node::Deferred(_) => f.write_str("Deferred(..)"),
            Node::Stream(stream) => write!(f, "Stream(replayable: {})", stream.is_replayable()),
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::null()
    }
}

impl From<Literal> for Node {
    fn from(literal: Literal) -> Self {
        Node::Literal(literal)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::text(text)
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::text(text)
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::Literal(Literal::Integer(value))
    }
}

impl From<i32> for Node {
    fn from(value: i32) -> Self {
        Node::Literal(Literal::Integer(value.into()))
    }
}

impl From<u32> for Node {
    fn from(value: u32) -> Self {
        Node::Literal(Literal::Integer(value.into()))
    }
}

impl From<f64> for Node {
    fn from(value: f64) -> Self {
        Node::Literal(Literal::Float(value))
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::Literal(Literal::Bool(value))
    }
}

impl From<()> for Node {
    fn from(_: ()) -> Self {
        Node::null()
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl<T: Into<Node>> From<Vec<T>> for Node {
    fn from(children: Vec<T>) -> Self {
        Node::sequence(children)
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl From<Deferred> for Node {
    fn from(deferred: Deferred) -> Self {
        Node::Deferred(deferred)
    }
}

/// Builds a `Node::Sequence` from heterogeneous children.
///
/// ```ignore
/// let node = seq!["Hello, ", name_element, "!"];
/// ```
#[macro_export]
macro_rules! seq {
    ($($child:expr),* $(,)?) => {
        $crate::Node::sequence(::std::vec![$($crate::Node::from($child)),*])
    };
}
