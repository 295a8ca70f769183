// Scoped context bindings passed down the node tree

use crate::error::RenderResult;
use crate::memo::memo_bound;
use crate::node::{Component, Element, Node, Part, Props};
use crate::render::{RenderStream, Renderer, StopPredicate};
use futures::stream::BoxStream;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque token identifying one injectable value.
///
/// Identity is the UUID allocated at construction; the label only shows up
/// in logs and debug output, so two keys with the same label never collide.
pub struct ContextKey<T> {
    id: Uuid,
    label: Arc<str>,
    default: Arc<T>,
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: Arc::clone(&self.label),
            default: Arc::clone(&self.default),
        }
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("label", &self.label)
            .field("id", &self.id)
            .finish()
    }
}

impl<T> ContextKey<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>, default: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: Arc::from(label.into()),
            default: Arc::new(default),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn default_value(&self) -> T {
        (*self.default).clone()
    }

    /// Wraps `children` so they evaluate with `value` pushed for this key.
    pub fn provide(&self, value: T, children: impl Into<Node>) -> Node {
        let provider = Provider {
            name: format!("{}.Provider", self.label),
            key: self.clone(),
            value,
        };
        Node::element(Arc::new(provider), Props::new().child(children))
    }
}

/// Same as [`ContextKey::new`].
pub fn create_context<T>(label: impl Into<String>, default: T) -> ContextKey<T>
where
    T: Clone + Send + Sync + 'static,
{
    ContextKey::new(label, default)
}

/// Identity of one `RenderContext`; memo caches are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Binding {
    key: Uuid,
    label: Arc<str>,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Binding>>,
}

/// The context an element is evaluated under.
///
/// Bindings form a persistent chain: pushing a value allocates one link that
/// points at the parent's chain, and yields a context with a fresh identity.
/// The renderer that created the root travels along so components can render
/// subtrees with the same configuration, starting at the depth of the
/// element that received the context.
#[derive(Clone)]
pub struct RenderContext {
    id: ContextId,
    scope: Option<Arc<Binding>>,
    renderer: Renderer,
    depth: usize,
}

impl RenderContext {
    /// Creates an empty root context.
    pub(crate) fn root(renderer: Renderer) -> Self {
        Self {
            id: ContextId(Uuid::new_v4()),
            scope: None,
            renderer,
            depth: 0,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Expansion depth that subtrees rendered through this context start at.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Same identity and bindings, evaluated from `depth` on.
    pub(crate) fn at_depth(&self, depth: usize) -> RenderContext {
        RenderContext {
            depth,
            ..self.clone()
        }
    }

    /// Returns a child context with `value` bound to `key`.
    pub fn with_value<T>(&self, key: &ContextKey<T>, value: T) -> RenderContext
    where
        T: Clone + Send + Sync + 'static,
    {
        RenderContext {
            id: ContextId(Uuid::new_v4()),
            scope: Some(Arc::new(Binding {
                key: key.id,
                label: Arc::clone(&key.label),
                value: Arc::new(value),
                parent: self.scope.clone(),
            })),
            renderer: self.renderer.clone(),
            depth: self.depth,
        }
    }

    /// Looks up the nearest value pushed for `key`, falling back to its default.
    pub fn get<T>(&self, key: &ContextKey<T>) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.lookup(key).unwrap_or_else(|| key.default_value())
    }

    /// Looks up the nearest value pushed for `key`, walking towards the root.
    pub fn lookup<T>(&self, key: &ContextKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut current = self.scope.as_deref();
        while let Some(binding) = current {
            if binding.key == key.id {
                return binding.value.downcast_ref::<T>().cloned();
            }
            current = binding.parent.as_deref();
        }
        None
    }

    /// Labels of every pushed binding, nearest first.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        let mut current = self.scope.as_deref();
        while let Some(binding) = current {
            labels.push(binding.label.to_string());
            current = binding.parent.as_deref();
        }
        labels
    }

    /// Renders `node` to a string under this context.
    pub fn render(
        &self,
        node: impl Into<Node>,
    ) -> impl Future<Output = RenderResult<String>> + Send + 'static {
        self.renderer.render_in(node.into(), self)
    }

    pub fn render_stream(&self, node: impl Into<Node>) -> BoxStream<'static, RenderResult<String>> {
        self.renderer.render_stream_in(node.into(), self)
    }

    /// Evaluates `node` under this context, stopping where `stop` says so.
    pub fn partial_render_stream(&self, node: impl Into<Node>, stop: StopPredicate) -> RenderStream {
        self.renderer.evaluate(node.into(), self, stop)
    }

    /// Memoizes `node` and binds its elements to this context.
    pub fn memo(&self, node: impl Into<Node>) -> Node {
        memo_bound(node, self)
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("id", &self.id)
            .field("bindings", &self.labels())
            .field("depth", &self.depth)
            .finish()
    }
}

struct Provider<T> {
    name: String,
    key: ContextKey<T>,
    value: T,
}

impl<T> Component for Provider<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, props: &Props, ctx: &RenderContext) -> RenderResult<Node> {
        let scoped = ctx.with_value(&self.key, self.value.clone());
        let fragment = Element::new(Arc::new(Fragment), props.clone());
        Ok(Node::Element(fragment.with_context(scoped)))
    }
}

/// Renders its children unchanged.
pub struct Fragment;

impl Component for Fragment {
    fn name(&self) -> &str {
        "Fragment"
    }

    fn render(&self, props: &Props, _ctx: &RenderContext) -> RenderResult<Node> {
        Ok(props.children_node())
    }
}

impl Fragment {
    pub fn node(children: impl Into<Node>) -> Node {
        Node::element(Arc::new(Fragment), Props::new().child(children))
    }
}

impl Part {
    /// The context a stopped element will resume under.
    pub fn context(&self) -> Option<&RenderContext> {
        self.as_element().and_then(Element::bound_context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_falls_back_to_default() {
        let key = ContextKey::new("Temperature", 0.5_f64);
        let ctx = Renderer::default().context();
        assert_eq!(ctx.get(&key), 0.5);
        assert_eq!(ctx.lookup(&key), None);
    }

    #[test]
    fn test_nearest_binding_wins() {
        let key = ContextKey::new("Temperature", 0.5_f64);
        let root = Renderer::default().context();
        let outer = root.with_value(&key, 0.8);
        let inner = outer.with_value(&key, 0.1);
        assert_eq!(inner.get(&key), 0.1);
        assert_eq!(outer.get(&key), 0.8);
        assert_eq!(root.get(&key), 0.5);
        assert_ne!(outer.id(), inner.id());
    }

    #[test]
    fn test_depth_is_inherited_and_keeps_identity() {
        let key = ContextKey::new("Temperature", 0.5_f64);
        let root = Renderer::default().context();
        assert_eq!(root.depth(), 0);
        let deeper = root.at_depth(4);
        assert_eq!(deeper.id(), root.id());
        assert_eq!(deeper.with_value(&key, 0.9).depth(), 4);
    }

    #[test]
    fn test_keys_with_same_label_do_not_collide() {
        let a = ContextKey::new("Model", "a".to_string());
        let b = ContextKey::new("Model", "b".to_string());
        let ctx = Renderer::default().context().with_value(&a, "pushed".to_string());
        assert_eq!(ctx.get(&a), "pushed");
        assert_eq!(ctx.get(&b), "b");
    }

    #[test]
    fn test_labels_nearest_first() {
        let temperature = ContextKey::new("Temperature", 0.5_f64);
        let model = create_context("Model", String::new());
        let ctx = Renderer::default()
            .context()
            .with_value(&temperature, 1.0)
            .with_value(&model, "small".to_string());
        assert_eq!(ctx.labels(), vec!["Model".to_string(), "Temperature".to_string()]);
    }
}
