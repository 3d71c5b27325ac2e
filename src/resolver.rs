use alloc::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    vec::Vec,
};
use tracing::{debug, debug_span, error, warn};

use crate::{
    any::Resolved,
    context::{scan, Injection, Trace},
    errors::{BootstrapErrorKind, ResolveErrorKind, TokenPath},
    instantiator::BoxedCloneFactory,
    middleware::Middleware,
    registry::{Contribution, ProtoId, ProtoNode, Registry},
    token::TokenKey,
    tree::{Edge, NodeId, NodeKind, Tree},
};

/// Source of values for tokens the local registry can't resolve
pub(crate) trait Upstream {
    fn find_node(&self, token: &TokenKey) -> Option<Resolved>;
}

#[derive(Clone)]
enum Dependency {
    Proto(ProtoId),
    Upstream { token: TokenKey, value: Resolved },
}

/// Factory whose last dry run stopped at a required value that wasn't built yet
struct Rescan {
    factory: BoxedCloneFactory,
    requester: TokenKey,
}

struct Frame {
    proto: ProtoId,
    node: NodeId,
    dependencies: Vec<Dependency>,
    cursor: usize,
    rescan: Option<Rescan>,
    /// Latest dry run
    trace: Trace,
    tokens: BTreeSet<TokenKey>,
    missing_optional: BTreeSet<TokenKey>,
}

impl Frame {
    fn new(proto: ProtoId, node: NodeId) -> Self {
        Self {
            proto,
            node,
            dependencies: Vec::new(),
            cursor: 0,
            rescan: None,
            trace: Trace::default(),
            tokens: BTreeSet::new(),
            missing_optional: BTreeSet::new(),
        }
    }
}

#[derive(Clone, Copy)]
enum Mark {
    Visiting,
    Done(NodeId),
}

/// Converts the proto graph of a registry into an instantiation tree and instantiates it.
///
/// The graph is walked depth-first with an explicit stack, so deep graphs don't grow the call stack.
/// A node is instantiated once all of its dependencies are. A factory whose dry run stopped at a
/// required value is dry-run again with the values of its built dependencies, until a run
/// reaches no new dependency.
pub(crate) struct Resolver<'a> {
    registry: Registry,
    upstream: Option<&'a dyn Upstream>,
    chain: &'a [Arc<dyn Middleware>],
    marks: BTreeMap<ProtoId, Mark>,
    stack: Vec<Frame>,
    tree: Tree,
}

impl<'a> Resolver<'a> {
    #[inline]
    #[must_use]
    pub(crate) fn new(registry: Registry, upstream: Option<&'a dyn Upstream>, chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self {
            registry,
            upstream,
            chain,
            marks: BTreeMap::new(),
            stack: Vec::new(),
            tree: Tree::default(),
        }
    }

    /// # Errors
    /// - [`ResolveErrorKind::CircularDependency`] if a dependency is reached again while its own dependencies are resolved
    /// - [`ResolveErrorKind::NotFound`] if a required dependency has no provider in the chain of containers
    /// - [`BootstrapErrorKind::Factory`] if a factory or a middleware fails
    pub(crate) fn resolve(mut self) -> Result<Tree, BootstrapErrorKind> {
        let top_level: Vec<ProtoId> = (0..self.registry.len())
            .filter(|&id| self.registry.get(id).is_some_and(|proto| !proto.is_transparent()))
            .collect();

        for proto in top_level {
            if self.marks.contains_key(&proto) {
                continue;
            }
            self.enter(proto)?;
            self.walk()?;
        }

        debug!(nodes = self.tree.len(), "Tree resolved");
        Ok(self.tree)
    }

    fn walk(&mut self) -> Result<(), BootstrapErrorKind> {
        while let Some(frame) = self.stack.last_mut() {
            let Some(dependency) = frame.dependencies.get(frame.cursor).cloned() else {
                self.complete()?;
                continue;
            };
            frame.cursor += 1;
            let node = frame.node;

            match dependency {
                Dependency::Upstream { token, value } => self.tree.add_edge(node, Edge::Upstream { token, value }),
                Dependency::Proto(proto) => match self.marks.get(&proto) {
                    Some(Mark::Done(child)) => self.tree.add_edge(node, Edge::Local(*child)),
                    Some(Mark::Visiting) => return Err(self.cycle(proto).into()),
                    None => self.enter(proto)?,
                },
            }
        }
        Ok(())
    }

    /// Dry-runs a blocked factory again or finishes the top frame
    fn complete(&mut self) -> Result<(), BootstrapErrorKind> {
        let Some(mut frame) = self.stack.pop() else {
            return Ok(());
        };

        if let Some(Rescan { factory, requester }) = frame.rescan.take() {
            let known = self.tree.answers(frame.node);
            let trace = scan(&factory, Some(&requester), known, self.registry.catch_scan_panics());
            let added = self.add_traced(&mut frame, &requester, &trace.injections)?;
            debug!(token = requester.name(), added, blocked = trace.blocked, "Factory traced again");

            let blocked = trace.blocked;
            frame.trace = trace;
            if added > 0 {
                if blocked {
                    frame.rescan = Some(Rescan { factory, requester });
                }
                self.stack.push(frame);
                return Ok(());
            }
        }

        self.finish(frame)
    }

    fn finish(&mut self, frame: Frame) -> Result<(), BootstrapErrorKind> {
        let Frame {
            proto,
            node,
            trace,
            missing_optional,
            ..
        } = frame;

        self.tree.add_repeated_injections(trace.repeated());
        self.tree.set_missing_optional(node, missing_optional);
        self.tree.instantiate(node, self.chain)?;

        self.marks.insert(proto, Mark::Done(node));
        if let Some(parent) = self.stack.last() {
            self.tree.add_edge(parent.node, Edge::Local(node));
        }
        Ok(())
    }

    fn enter(&mut self, proto: ProtoId) -> Result<(), BootstrapErrorKind> {
        let Some(node) = self.registry.get(proto).cloned() else {
            return Ok(());
        };

        let span = debug_span!(
            "resolve",
            token = node.token().map(TokenKey::name),
            transparent = node.is_transparent()
        );
        let _guard = span.enter();

        let (kind, traced) = match node {
            ProtoNode::Single { token, factory, trace } => {
                let traced = match (&factory, token.fallback()) {
                    (Some(factory), _) => Some((factory.clone(), trace)),
                    (None, Some(fallback)) => {
                        let trace = scan(fallback, Some(&token), BTreeMap::new(), self.registry.catch_scan_panics());
                        Some((fallback.clone(), trace))
                    }
                    (None, None) => None,
                };
                let traced = traced.map(|(factory, trace)| (factory, token.clone(), trace));
                (NodeKind::Single { token, factory }, traced)
            }
            ProtoNode::Transparent { owner, factory, trace } => (
                NodeKind::Transparent {
                    owner: owner.clone(),
                    factory: factory.clone(),
                },
                Some((factory, owner, trace)),
            ),
            ProtoNode::Multi { token, own, multis } => {
                let node = self.tree.push(NodeKind::Multi { token: token.clone() });
                let mut frame = Frame::new(proto, node);
                frame.dependencies = self.multi_dependencies(&token, &own, &multis);
                self.push(frame);
                return Ok(());
            }
        };

        let node = self.tree.push(kind);
        let mut frame = Frame::new(proto, node);
        if let Some((factory, requester, trace)) = traced {
            self.add_traced(&mut frame, &requester, &trace.injections)?;
            if trace.blocked {
                frame.rescan = Some(Rescan { factory, requester });
            }
            frame.trace = trace;
        }
        self.push(frame);
        Ok(())
    }

    #[inline]
    fn push(&mut self, frame: Frame) {
        self.marks.insert(frame.proto, Mark::Visiting);
        self.stack.push(frame);
    }

    /// Adds one dependency per traced token the frame doesn't depend on yet.
    /// Returns the number of added dependencies.
    ///
    /// A token traced both as optional and as required is required.
    fn add_traced(
        &mut self,
        frame: &mut Frame,
        requester: &TokenKey,
        injections: &[Injection],
    ) -> Result<usize, ResolveErrorKind> {
        let mut distinct: Vec<Injection> = Vec::with_capacity(injections.len());
        for injection in injections {
            match distinct.iter_mut().find(|seen| seen.token == injection.token) {
                Some(seen) => seen.optional &= injection.optional,
                None => distinct.push(injection.clone()),
            }
        }

        let mut added = 0;
        for Injection { token, optional } in distinct {
            if frame.tokens.contains(&token) {
                continue;
            }

            let dependency = if let Some(dependency) = self.lookup(&token) {
                dependency
            } else if token.is_multi() || token.has_fallback() {
                Dependency::Proto(self.auto_create(token.clone()))
            } else if optional {
                debug!(token = token.name(), "Optional dependency not provided");
                frame.missing_optional.insert(token);
                continue;
            } else {
                let err = ResolveErrorKind::NotFound {
                    token,
                    requester: Some(requester.clone()),
                };
                warn!("{}", err);
                return Err(err);
            };

            frame.dependencies.push(dependency);
            frame.tokens.insert(token);
            added += 1;
        }
        Ok(added)
    }

    /// Own contributions in registration order, then referenced multi tokens, then the ancestors' contributions
    fn multi_dependencies(&mut self, token: &TokenKey, own: &[Contribution], multis: &[TokenKey]) -> Vec<Dependency> {
        let mut dependencies = Vec::with_capacity(own.len() + multis.len() + 1);

        for contribution in own {
            match contribution {
                Contribution::Transparent(proto) => dependencies.push(Dependency::Proto(*proto)),
                Contribution::Single(target) => {
                    let dependency = self
                        .lookup(target)
                        .unwrap_or_else(|| Dependency::Proto(self.auto_create(target.clone())));
                    dependencies.push(dependency);
                }
            }
        }
        for target in multis {
            let dependency = self
                .lookup(target)
                .unwrap_or_else(|| Dependency::Proto(self.auto_create(target.clone())));
            dependencies.push(dependency);
        }
        if let Some(value) = self.upstream.and_then(|upstream| upstream.find_node(token)) {
            debug!("Ancestor contributions appended");
            dependencies.push(Dependency::Upstream {
                token: token.clone(),
                value,
            });
        }

        dependencies
    }

    /// Local node first, then the ancestors
    fn lookup(&self, token: &TokenKey) -> Option<Dependency> {
        if let Some(proto) = self.registry.find(token) {
            return Some(Dependency::Proto(proto));
        }
        let value = self.upstream?.find_node(token)?;
        debug!(token = token.name(), "Resolved by an ancestor");
        Some(Dependency::Upstream {
            token: token.clone(),
            value,
        })
    }

    fn auto_create(&mut self, token: TokenKey) -> ProtoId {
        debug!(token = token.name(), "Bare node created");
        self.registry.insert(ProtoNode::empty(token))
    }

    /// Path from the repeated node through the visiting stack back to itself
    fn cycle(&self, proto: ProtoId) -> ResolveErrorKind {
        let start = self.stack.iter().position(|frame| frame.proto == proto).unwrap_or(0);

        let mut path: Vec<TokenKey> = self.stack[start..]
            .iter()
            .filter_map(|frame| self.registry.get(frame.proto).and_then(ProtoNode::token).cloned())
            .collect();
        if let Some(token) = self.registry.get(proto).and_then(ProtoNode::token) {
            path.push(token.clone());
        }

        let err = ResolveErrorKind::CircularDependency {
            path: TokenPath(path.into_boxed_slice()),
        };
        error!("{}", err);
        err
    }
}
