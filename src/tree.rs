use alloc::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    vec::Vec,
};
use tracing::{debug, debug_span, error};

use crate::{
    any::Resolved,
    context::{self, boxed_resolver, BoxedCloneResolver, Injection},
    errors::{BootstrapErrorKind, InstantiateErrorKind, ResolveErrorKind},
    instantiator::BoxedCloneFactory,
    middleware::{Middleware, Next, NodeTarget},
    token::TokenKey,
};

pub(crate) type NodeId = usize;

#[derive(Clone)]
pub(crate) enum Edge {
    Local(NodeId),
    /// Value already instantiated by an ancestor container
    Upstream { token: TokenKey, value: Resolved },
}

pub(crate) enum NodeKind {
    Single {
        token: TokenKey,
        factory: Option<BoxedCloneFactory>,
    },
    Multi {
        token: TokenKey,
    },
    Transparent {
        owner: TokenKey,
        factory: BoxedCloneFactory,
    },
}

impl NodeKind {
    #[inline]
    pub(crate) fn token(&self) -> Option<&TokenKey> {
        match self {
            NodeKind::Single { token, .. } | NodeKind::Multi { token } => Some(token),
            NodeKind::Transparent { .. } => None,
        }
    }

    #[inline]
    fn target(&self) -> NodeTarget<'_> {
        match self {
            NodeKind::Single { token, .. } => NodeTarget::Single(token),
            NodeKind::Multi { token } => NodeTarget::Multi(token),
            NodeKind::Transparent { owner, .. } => NodeTarget::Transparent { owner },
        }
    }
}

pub(crate) struct TreeNode {
    kind: NodeKind,
    edges: Vec<Edge>,
    /// Tokens traced only as optional that nothing provides
    missing_optional: BTreeSet<TokenKey>,
    dependents: usize,
    value: Option<Resolved>,
}

/// Resolved instantiation tree of a container
#[derive(Default)]
pub(crate) struct Tree {
    nodes: Vec<TreeNode>,
    index: BTreeMap<TokenKey, NodeId>,
    repeated_injections: usize,
}

impl Tree {
    pub(crate) fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        if let Some(token) = kind.token() {
            self.index.insert(token.clone(), id);
        }
        self.nodes.push(TreeNode {
            kind,
            edges: Vec::new(),
            missing_optional: BTreeSet::new(),
            dependents: 0,
            value: None,
        });
        id
    }

    pub(crate) fn add_edge(&mut self, from: NodeId, edge: Edge) {
        if let Edge::Local(to) = edge {
            self.nodes[to].dependents += 1;
        }
        self.nodes[from].edges.push(edge);
    }

    #[inline]
    pub(crate) fn set_missing_optional(&mut self, node: NodeId, tokens: BTreeSet<TokenKey>) {
        self.nodes[node].missing_optional = tokens;
    }

    #[inline]
    pub(crate) fn add_repeated_injections(&mut self, count: usize) {
        self.repeated_injections += count;
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub(crate) fn repeated_injections(&self) -> usize {
        self.repeated_injections
    }

    /// Nodes nothing in the tree depends on
    pub(crate) fn unused_nodes(&self) -> usize {
        self.nodes.iter().filter(|node| node.dependents == 0).count()
    }

    #[inline]
    pub(crate) fn find(&self, token: &TokenKey) -> Option<NodeId> {
        self.index.get(token).copied()
    }

    /// Cached value of the node addressed by `token`
    #[inline]
    pub(crate) fn value_of(&self, token: &TokenKey) -> Option<&Resolved> {
        self.find(token).and_then(|id| self.nodes[id].value.as_ref())
    }

    #[cfg(test)]
    pub(crate) fn edges(&self, node: NodeId) -> &[Edge] {
        &self.nodes[node].edges
    }

    /// Instantiates `root` after everything it depends on. Nodes with a cached value are skipped.
    pub(crate) fn instantiate(&mut self, root: NodeId, chain: &[Arc<dyn Middleware>]) -> Result<(), BootstrapErrorKind> {
        let mut stack = Vec::from([(root, false)]);

        while let Some((id, expanded)) = stack.pop() {
            if self.nodes[id].value.is_some() {
                continue;
            }
            if !expanded {
                stack.push((id, true));
                for edge in self.nodes[id].edges.iter().rev() {
                    if let Edge::Local(child) = edge {
                        if self.nodes[*child].value.is_none() {
                            stack.push((*child, false));
                        }
                    }
                }
                continue;
            }

            let node = &self.nodes[id];
            let target = node.kind.target();
            let span = debug_span!("instantiate", token = target.token().name(), transparent = target.is_transparent());
            let _guard = span.enter();

            let mut build = || self.build(id);
            let value = match Next::new(chain, &target, &mut build).run() {
                Ok(value) => value,
                Err(err) => {
                    let err = BootstrapErrorKind::from_instantiate(target.token().clone(), err);
                    error!("{}", err);
                    return Err(err);
                }
            };
            debug!("Instantiated");
            self.nodes[id].value = Some(value);
        }
        Ok(())
    }

    fn build(&self, id: NodeId) -> Result<Resolved, InstantiateErrorKind> {
        let node = &self.nodes[id];
        match &node.kind {
            NodeKind::Single { token, factory } => {
                let Some(factory) = factory.clone().or_else(|| token.fallback().cloned()) else {
                    return Err(ResolveErrorKind::NotFound {
                        token: token.clone(),
                        requester: None,
                    }
                    .into());
                };
                let instance = context::instantiate(factory, Some(token.clone()), self.resolver(id, token))?;
                Ok(Resolved::Single(instance))
            }
            NodeKind::Transparent { owner, factory } => {
                let instance = context::instantiate(factory.clone(), Some(owner.clone()), self.resolver(id, owner))?;
                Ok(Resolved::Single(instance))
            }
            NodeKind::Multi { .. } => {
                let mut values = Vec::new();
                for edge in &node.edges {
                    match edge {
                        Edge::Local(child) => {
                            if let Some(value) = &self.nodes[*child].value {
                                value.extend_into(&mut values);
                            }
                        }
                        Edge::Upstream { value, .. } => value.extend_into(&mut values),
                    }
                }
                Ok(Resolved::Multi(values))
            }
        }
    }

    /// Built values of the direct edges of `id`
    pub(crate) fn answers(&self, id: NodeId) -> BTreeMap<TokenKey, Resolved> {
        let mut values = BTreeMap::new();
        for edge in &self.nodes[id].edges {
            match edge {
                Edge::Local(child) => {
                    let child = &self.nodes[*child];
                    if let (Some(token), Some(value)) = (child.kind.token(), &child.value) {
                        values.insert(token.clone(), value.clone());
                    }
                }
                Edge::Upstream { token, value } => {
                    values.insert(token.clone(), value.clone());
                }
            }
        }
        values
    }

    /// Resolver answering only from the direct edges of `id`
    fn resolver(&self, id: NodeId, requester: &TokenKey) -> BoxedCloneResolver {
        let node = &self.nodes[id];
        let values = Arc::new(self.answers(id));
        let missing_optional = Arc::new(node.missing_optional.clone());
        let requester = requester.clone();
        boxed_resolver(move |Injection { token, .. }| {
            if let Some(value) = values.get(&token) {
                return Ok(Some(value.clone()));
            }
            if missing_optional.contains(&token) {
                debug!(token = token.name(), "Optional dependency not provided");
                return Ok(None);
            }
            let err = ResolveErrorKind::Untracked {
                token,
                requester: Some(requester.clone()),
            };
            error!("{}", err);
            Err(err)
        })
    }
}
