use alloc::{sync::Arc, vec::Vec};
use core::{any::type_name, mem};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    any::{downcast, Instance, Resolved, TypeInfo},
    class::{ClassRegistry, Injectable},
    config::Config,
    diagnostics::{deliver, BootstrapReport, DiagnosticsSink},
    errors::{BootstrapErrorKind, GetErrorKind, ProvideErrorKind, ResolveErrorKind},
    middleware::{self, Middleware},
    provider::{ProviderSet, Registration},
    registry::Registry,
    resolver::{Resolver, Upstream},
    token::{MultiToken, Token, TokenKey},
    tree::Tree,
};

enum Build {
    Pending,
    Ready(Arc<Tree>),
    Failed,
}

enum State {
    Accepting(Registry),
    Bootstrapped(Build),
}

/// Marks a bootstrap as failed when dropped armed, unwinding included
struct PendingBuild<'a> {
    state: &'a Mutex<State>,
    armed: bool,
}

impl Drop for PendingBuild<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = State::Bootstrapped(Build::Failed);
        }
    }
}

struct ContainerInner {
    state: Mutex<State>,
    parent: Option<Container>,
    classes: ClassRegistry,
    middlewares: Vec<Arc<dyn Middleware>>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
    config: Config,
}

/// IoC container.
///
/// Accepts registrations until [`Container::bootstrap`] is called once,
/// after which it's read-only and answers [`Container::get`] from the instantiated tree.
/// Clones share the same state.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[inline]
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::builder().config(config).build()
    }

    #[inline]
    #[must_use]
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    /// Creates a child container builder.
    /// The child inherits the class registry and config, and asks this container for tokens it can't resolve.
    #[inline]
    #[must_use]
    pub fn enter(&self) -> ContainerBuilder {
        ContainerBuilder {
            config: self.inner.config,
            classes: self.inner.classes.clone(),
            middlewares: Vec::new(),
            sink: None,
            parent: Some(self.clone()),
        }
    }

    /// Creates a child container, see [`Self::enter`]
    #[inline]
    #[must_use]
    pub fn child(&self) -> Container {
        self.enter().build()
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[inline]
    #[must_use]
    pub fn classes(&self) -> &ClassRegistry {
        &self.inner.classes
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Bootstrapped(Build::Ready(_)))
    }

    /// Registers a provider.
    ///
    /// # Errors
    /// - [`ProvideErrorKind::Bootstrapped`] once [`Self::bootstrap`] was called
    /// - The registration rules errors, see [`ProvideErrorKind`]
    pub fn provide(&self, registration: impl Into<Registration>) -> Result<&Self, ProvideErrorKind> {
        let staged = match &*self.inner.state.lock() {
            State::Accepting(registry) => registry.stage(registration.into(), &self.inner.classes)?,
            State::Bootstrapped(_) => return Err(bootstrapped()),
        };

        // Dry runs call user code, which may use this container
        let staged = staged.trace(self.inner.config.catch_scan_panics);

        match &mut *self.inner.state.lock() {
            State::Accepting(registry) => registry.commit(staged)?,
            State::Bootstrapped(_) => return Err(bootstrapped()),
        }
        Ok(self)
    }

    /// Registers a bare token.
    ///
    /// # Errors
    /// - [`ProvideErrorKind::Bootstrapped`] once [`Self::bootstrap`] was called
    /// - [`ProvideErrorKind::Duplicate`] if the token is already registered
    pub fn declare(&self, token: impl Into<TokenKey>) -> Result<&Self, ProvideErrorKind> {
        match &mut *self.inner.state.lock() {
            State::Accepting(registry) => registry.declare(token.into())?,
            State::Bootstrapped(_) => return Err(bootstrapped()),
        }
        Ok(self)
    }

    /// Provides every registration of `providers` in order, stopping at the first error
    ///
    /// # Errors
    /// Same as [`Self::provide`]
    pub fn include(&self, providers: ProviderSet) -> Result<&Self, ProvideErrorKind> {
        for registration in providers {
            self.provide(registration)?;
        }
        Ok(self)
    }

    /// Resolves the registrations into a tree and instantiates every node.
    ///
    /// # Errors
    /// - [`BootstrapErrorKind::DoubleBootstrap`] if called more than once
    /// - [`BootstrapErrorKind::Resolve`] if the graph has a cycle or a required dependency is missing
    /// - [`BootstrapErrorKind::Factory`] if a factory or a middleware fails
    ///
    /// Any failure leaves the container unusable.
    pub fn bootstrap(&self) -> Result<(), BootstrapErrorKind> {
        let span = info_span!("bootstrap", container = self.inner.config.name);
        let _guard = span.enter();

        let registry = {
            let mut state = self.inner.state.lock();
            match mem::replace(&mut *state, State::Bootstrapped(Build::Pending)) {
                State::Accepting(registry) => registry,
                previous @ State::Bootstrapped(_) => {
                    *state = previous;
                    let err = BootstrapErrorKind::DoubleBootstrap;
                    warn!("{}", err);
                    return Err(err);
                }
            }
        };

        let mut pending = PendingBuild {
            state: &self.inner.state,
            armed: true,
        };
        let started = Instant::now();
        match self.build(registry) {
            Ok(tree) => {
                let report = BootstrapReport {
                    container: self.inner.config.name,
                    total_nodes: tree.len(),
                    unused_nodes: tree.unused_nodes(),
                    repeated_injections: tree.repeated_injections(),
                    duration: started.elapsed(),
                };
                *self.inner.state.lock() = State::Bootstrapped(Build::Ready(Arc::new(tree)));
                pending.armed = false;
                info!(nodes = report.total_nodes, "Bootstrapped");

                if let Some(sink) = &self.inner.sink {
                    deliver(sink.as_ref(), &report);
                }
                Ok(())
            }
            Err(err) => {
                error!("{}", err);
                Err(err)
            }
        }
    }

    fn build(&self, registry: Registry) -> Result<Tree, BootstrapErrorKind> {
        let upstream = self.inner.parent.as_ref().map(|parent| parent as &dyn Upstream);
        let chain = self.middleware_chain();
        Resolver::new(registry, upstream, &chain).resolve()
    }

    /// Global middlewares, then the ancestors' from the root down, then the local ones
    fn middleware_chain(&self) -> Vec<Arc<dyn Middleware>> {
        let mut containers = Vec::new();
        let mut current = Some(self);
        while let Some(container) = current {
            containers.push(container);
            current = container.inner.parent.as_ref();
        }

        let mut chain = middleware::global();
        for container in containers.into_iter().rev() {
            chain.extend(container.inner.middlewares.iter().cloned());
        }
        chain
    }

    fn tree(&self) -> Result<Arc<Tree>, GetErrorKind> {
        match &*self.inner.state.lock() {
            State::Bootstrapped(Build::Ready(tree)) => Ok(tree.clone()),
            State::Bootstrapped(Build::Failed) => Err(GetErrorKind::BootstrapFailed),
            State::Accepting(_) | State::Bootstrapped(Build::Pending) => Err(GetErrorKind::NotBootstrapped),
        }
    }

    /// Value of `token` in this container or, if missing, in its ancestors.
    ///
    /// An unbootstrapped container answers nothing.
    #[must_use]
    pub fn find_node(&self, token: &TokenKey) -> Option<Resolved> {
        let tree = self.tree().ok()?;
        match tree.value_of(token) {
            Some(value) => Some(value.clone()),
            None => self.inner.parent.as_ref()?.find_node(token),
        }
    }

    fn lookup(&self, token: &TokenKey) -> Result<Option<Resolved>, GetErrorKind> {
        let tree = self.tree().map_err(|err| {
            warn!("{}", err);
            err
        })?;

        if let Some(value) = tree.value_of(token) {
            debug!("Found locally");
            return Ok(Some(value.clone()));
        }
        debug!("Not found locally");
        Ok(self.inner.parent.as_ref().and_then(|parent| parent.find_node(token)))
    }

    /// Gets the value of a single token.
    ///
    /// # Errors
    /// - [`GetErrorKind::NotBootstrapped`] before [`Self::bootstrap`] succeeded
    /// - [`GetErrorKind::BootstrapFailed`] if bootstrap failed
    /// - [`ResolveErrorKind::NotFound`] if nothing in the chain of containers provides the token
    pub fn get<T: Send + Sync + 'static>(&self, token: &Token<T>) -> Result<Arc<T>, GetErrorKind> {
        let span = info_span!("get", token = token.name(), container = self.inner.config.name);
        let _guard = span.enter();

        match self.lookup(token.key())? {
            Some(Resolved::Single(instance)) => downcast_instance(token.key(), instance),
            Some(Resolved::Multi(_)) => Err(incorrect_type(token.key(), "single value")),
            None => {
                let err = GetErrorKind::Resolve(ResolveErrorKind::NotFound {
                    token: token.key().clone(),
                    requester: None,
                });
                warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Gets every contribution of a multi token, in order. A token without contributions yields an empty `Vec`.
    ///
    /// # Errors
    /// - [`GetErrorKind::NotBootstrapped`] before [`Self::bootstrap`] succeeded
    /// - [`GetErrorKind::BootstrapFailed`] if bootstrap failed
    pub fn get_multi<T: Send + Sync + 'static>(&self, token: &MultiToken<T>) -> Result<Vec<Arc<T>>, GetErrorKind> {
        let span = info_span!("get", token = token.name(), container = self.inner.config.name, multi = true);
        let _guard = span.enter();

        match self.lookup(token.key())? {
            Some(Resolved::Multi(instances)) => instances
                .into_iter()
                .map(|instance| downcast_instance(token.key(), instance))
                .collect(),
            Some(Resolved::Single(_)) => Err(incorrect_type(token.key(), "multi value")),
            None => {
                debug!("No contributions");
                Ok(Vec::new())
            }
        }
    }

    /// Gets the value of the token the class registry associates with `C`.
    ///
    /// # Errors
    /// - [`GetErrorKind::UnknownClass`] if `C` isn't in the class registry
    /// - Same as [`Self::get`]
    pub fn get_class<C: Injectable>(&self) -> Result<Arc<C>, GetErrorKind> {
        let Some(token) = self.inner.classes.token_of::<C>() else {
            let err = GetErrorKind::UnknownClass {
                class: TypeInfo::of::<C>(),
            };
            warn!("{}", err);
            return Err(err);
        };
        self.get(&token)
    }
}

impl Upstream for Container {
    #[inline]
    fn find_node(&self, token: &TokenKey) -> Option<Resolved> {
        Container::find_node(self, token)
    }
}

fn bootstrapped() -> ProvideErrorKind {
    let err = ProvideErrorKind::Bootstrapped;
    warn!("{}", err);
    err
}

fn downcast_instance<T: Send + Sync + 'static>(token: &TokenKey, instance: Instance) -> Result<Arc<T>, GetErrorKind> {
    downcast::<T>(instance).ok_or_else(|| incorrect_type(token, type_name::<T>()))
}

fn incorrect_type(token: &TokenKey, expected: &'static str) -> GetErrorKind {
    let err = GetErrorKind::Resolve(ResolveErrorKind::IncorrectType {
        token: token.clone(),
        expected,
    });
    error!("{}", err);
    err
}

/// Builder of a [`Container`]
pub struct ContainerBuilder {
    config: Config,
    classes: ClassRegistry,
    middlewares: Vec<Arc<dyn Middleware>>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
    parent: Option<Container>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            classes: ClassRegistry::new(),
            middlewares: Vec::new(),
            sink: None,
            parent: None,
        }
    }
}

impl ContainerBuilder {
    #[inline]
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[inline]
    #[must_use]
    pub fn classes(mut self, classes: ClassRegistry) -> Self {
        self.classes = classes;
        self
    }

    /// Appends `middleware` to the local chain, inside the ancestors' middlewares
    #[inline]
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    #[inline]
    #[must_use]
    pub fn diagnostics(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    #[must_use]
    pub fn build(self) -> Container {
        debug!(container = self.config.name, child = self.parent.is_some(), "Container created");
        Container {
            inner: Arc::new(ContainerInner {
                state: Mutex::new(State::Accepting(Registry::new(self.config.catch_scan_panics))),
                parent: self.parent,
                classes: self.classes,
                middlewares: self.middlewares,
                sink: self.sink,
                config: self.config,
            }),
        }
    }
}
