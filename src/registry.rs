use alloc::{collections::BTreeMap, vec::Vec};
use tracing::{debug, debug_span, warn};

use crate::{
    class::ClassRegistry,
    context::{scan, Trace},
    errors::ProvideErrorKind,
    instantiator::{boxed_alias, BoxedCloneFactory},
    provider::{AliasTarget, Payload, Registration, Target},
    token::TokenKey,
};

pub(crate) type ProtoId = usize;

/// Own contribution of a multi token
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Contribution {
    /// Aliased single token
    Single(TokenKey),
    /// Inline supplier, see [`ProtoNode::Transparent`]
    Transparent(ProtoId),
}

/// Registration-time node of the dependency graph
#[derive(Clone)]
pub(crate) enum ProtoNode {
    Single {
        token: TokenKey,
        factory: Option<BoxedCloneFactory>,
        /// Dry run of the factory, repeated injections included
        trace: Trace,
    },
    Multi {
        token: TokenKey,
        own: Vec<Contribution>,
        multis: Vec<TokenKey>,
    },
    /// Anonymous node of one inline supplier of a multi token
    Transparent {
        owner: TokenKey,
        factory: BoxedCloneFactory,
        trace: Trace,
    },
}

impl ProtoNode {
    #[inline]
    pub(crate) fn empty(token: TokenKey) -> Self {
        if token.is_multi() {
            ProtoNode::Multi {
                token,
                own: Vec::new(),
                multis: Vec::new(),
            }
        } else {
            ProtoNode::Single {
                token,
                factory: None,
                trace: Trace::default(),
            }
        }
    }

    /// Addressable token of the node, `None` for transparent nodes
    #[inline]
    pub(crate) fn token(&self) -> Option<&TokenKey> {
        match self {
            ProtoNode::Single { token, .. } | ProtoNode::Multi { token, .. } => Some(token),
            ProtoNode::Transparent { .. } => None,
        }
    }

    #[inline]
    pub(crate) const fn is_transparent(&self) -> bool {
        matches!(self, ProtoNode::Transparent { .. })
    }
}

enum Action {
    Declare,
    Factory(BoxedCloneFactory),
    Contribute(BoxedCloneFactory),
    MultiAlias(TokenKey),
}

/// Registration that passed the registration rules, waiting for its dry run and commit.
///
/// Tracing runs user code, so it happens between [`Registry::stage`] and [`Registry::commit`]
/// without access to the registry.
pub(crate) struct Staged {
    token: TokenKey,
    action: Action,
    trace: Trace,
}

impl Staged {
    /// Dry-runs the factory of the registration, if any
    #[must_use]
    pub(crate) fn trace(mut self, catch_panics: bool) -> Self {
        if let Action::Factory(factory) | Action::Contribute(factory) = &self.action {
            let span = debug_span!("scan", token = self.token.name());
            let _guard = span.enter();

            self.trace = scan(factory, Some(&self.token), BTreeMap::new(), catch_panics);
            debug!(injections = self.trace.injections.len(), blocked = self.trace.blocked, "Factory traced");
        }
        self
    }
}

/// Arena of proto nodes accumulated before bootstrap
#[derive(Clone, Default)]
pub(crate) struct Registry {
    protos: Vec<ProtoNode>,
    index: BTreeMap<TokenKey, ProtoId>,
    catch_scan_panics: bool,
}

impl Registry {
    #[inline]
    #[must_use]
    pub(crate) const fn new(catch_scan_panics: bool) -> Self {
        Self {
            protos: Vec::new(),
            index: BTreeMap::new(),
            catch_scan_panics,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.protos.len()
    }

    #[inline]
    pub(crate) fn get(&self, id: ProtoId) -> Option<&ProtoNode> {
        self.protos.get(id)
    }

    #[inline]
    pub(crate) fn find(&self, token: &TokenKey) -> Option<ProtoId> {
        self.index.get(token).copied()
    }

    #[inline]
    pub(crate) const fn catch_scan_panics(&self) -> bool {
        self.catch_scan_panics
    }

    /// Pushes a node, indexing it by its token if it has one
    pub(crate) fn insert(&mut self, proto: ProtoNode) -> ProtoId {
        let id = self.protos.len();
        if let Some(token) = proto.token() {
            self.index.insert(token.clone(), id);
        }
        self.protos.push(proto);
        id
    }

    /// Stages, traces and commits one provider
    ///
    /// # Errors
    /// Errors of [`Self::stage`] and [`Self::commit`]
    #[cfg(test)]
    pub(crate) fn add(&mut self, registration: Registration, classes: &ClassRegistry) -> Result<(), ProvideErrorKind> {
        let staged = self.stage(registration, classes)?.trace(self.catch_scan_panics);
        self.commit(staged)
    }

    /// Applies the registration rules for one provider without running any user code.
    ///
    /// # Errors
    /// - [`ProvideErrorKind::InvalidCtor`] if a bare class isn't in the class registry
    /// - [`ProvideErrorKind::InvalidProvider`] if more than one payload was set
    /// - [`ProvideErrorKind::InvalidAlias`] and [`ProvideErrorKind::LoopAlias`] for bad alias targets
    /// - [`ProvideErrorKind::Duplicate`] and [`ProvideErrorKind::DuplicateFactory`] if the slot is taken
    pub(crate) fn stage(&self, registration: Registration, classes: &ClassRegistry) -> Result<Staged, ProvideErrorKind> {
        let Registration { target, mut payloads } = registration;

        let token = match target {
            Target::Token(token) => token,
            Target::Class(class) => match classes.key_of(&class) {
                Some(token) => token.clone(),
                None => {
                    let err = ProvideErrorKind::InvalidCtor { class };
                    warn!("{}", err);
                    return Err(err);
                }
            },
        };

        if payloads.len() > 1 {
            let err = ProvideErrorKind::InvalidProvider {
                token,
                payloads: payloads.len(),
            };
            warn!("{}", err);
            return Err(err);
        }

        let action = match payloads.pop() {
            None => Action::Declare,
            Some(payload) => self.action(&token, payload, classes)?,
        };
        self.check_slot(&token, &action)?;

        Ok(Staged {
            token,
            action,
            trace: Trace::default(),
        })
    }

    fn action(&self, token: &TokenKey, payload: Payload, classes: &ClassRegistry) -> Result<Action, ProvideErrorKind> {
        let factory = match payload {
            Payload::Alias(target) => {
                let target = match target {
                    AliasTarget::Token(target) => target,
                    AliasTarget::Class(class) => match classes.key_of(&class) {
                        Some(target) => target.clone(),
                        None => {
                            let err = ProvideErrorKind::InvalidAlias {
                                token: token.clone(),
                                target: class.name,
                            };
                            warn!("{}", err);
                            return Err(err);
                        }
                    },
                };
                if target == *token {
                    let err = ProvideErrorKind::LoopAlias { token: token.clone() };
                    warn!("{}", err);
                    return Err(err);
                }
                if token.is_multi() {
                    return Ok(Action::MultiAlias(target));
                }
                if target.is_multi() {
                    let err = ProvideErrorKind::InvalidAlias {
                        token: token.clone(),
                        target: target.name(),
                    };
                    warn!("{}", err);
                    return Err(err);
                }
                boxed_alias(target)
            }
            Payload::Value(factory) | Payload::Factory(factory) | Payload::Class(factory) => factory,
        };

        if token.is_multi() {
            Ok(Action::Contribute(factory))
        } else {
            Ok(Action::Factory(factory))
        }
    }

    fn check_slot(&self, token: &TokenKey, action: &Action) -> Result<(), ProvideErrorKind> {
        let proto = self.find(token).and_then(|id| self.protos.get(id));
        let err = match (action, proto) {
            (Action::Declare, Some(_)) => ProvideErrorKind::Duplicate { token: token.clone() },
            (Action::Factory(_), Some(ProtoNode::Single { factory: Some(_), .. })) => {
                ProvideErrorKind::DuplicateFactory { token: token.clone() }
            }
            _ => return Ok(()),
        };
        warn!("{}", err);
        Err(err)
    }

    /// Attaches a staged registration.
    ///
    /// # Errors
    /// [`ProvideErrorKind::Duplicate`] and [`ProvideErrorKind::DuplicateFactory`] if the slot
    /// was taken while the registration was traced
    pub(crate) fn commit(&mut self, staged: Staged) -> Result<(), ProvideErrorKind> {
        let Staged { token, action, trace } = staged;
        self.check_slot(&token, &action)?;

        match action {
            Action::Declare => {
                debug!(token = token.name(), "Declared");
                self.insert(ProtoNode::empty(token));
            }
            Action::Factory(factory) => self.set_factory(token, factory, trace),
            Action::Contribute(factory) => self.add_transparent(token, factory, trace),
            Action::MultiAlias(target) => self.add_multi_alias(token, target),
        }
        Ok(())
    }

    /// Registers a bare token.
    ///
    /// # Errors
    /// Returns [`ProvideErrorKind::Duplicate`] if the token already has a node
    pub(crate) fn declare(&mut self, token: TokenKey) -> Result<(), ProvideErrorKind> {
        self.commit(Staged {
            token,
            action: Action::Declare,
            trace: Trace::default(),
        })
    }

    fn set_factory(&mut self, token: TokenKey, factory: BoxedCloneFactory, trace: Trace) {
        let id = match self.find(&token) {
            Some(id) => id,
            None => self.insert(ProtoNode::empty(token.clone())),
        };

        if let ProtoNode::Single {
            factory: slot,
            trace: traced,
            ..
        } = &mut self.protos[id]
        {
            debug!(token = token.name(), injections = trace.injections.len(), "Factory attached");
            *slot = Some(factory);
            *traced = trace;
        }
    }

    fn multi_entry(&mut self, token: &TokenKey) -> ProtoId {
        match self.find(token) {
            Some(id) => id,
            None => self.insert(ProtoNode::empty(token.clone())),
        }
    }

    fn add_transparent(&mut self, owner: TokenKey, factory: BoxedCloneFactory, trace: Trace) {
        let multi = self.multi_entry(&owner);
        debug!(token = owner.name(), injections = trace.injections.len(), "Contribution added");

        let transparent = self.insert(ProtoNode::Transparent { owner, factory, trace });
        if let ProtoNode::Multi { own, .. } = &mut self.protos[multi] {
            own.push(Contribution::Transparent(transparent));
        }
    }

    fn add_multi_alias(&mut self, token: TokenKey, target: TokenKey) {
        let multi = self.multi_entry(&token);
        let ProtoNode::Multi { own, multis, .. } = &mut self.protos[multi] else {
            return;
        };

        if target.is_multi() {
            if !multis.contains(&target) {
                debug!(target = target.name(), "Multi alias added");
                multis.push(target);
            }
        } else {
            let contribution = Contribution::Single(target);
            if !own.contains(&contribution) {
                debug!("Single alias added");
                own.push(contribution);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Contribution, ProtoNode, Registry};
    use crate::{
        class::{ClassRegistry, Injectable},
        context::inject,
        errors::{InstantiateErrorKind, ProvideErrorKind},
        provider::Provider,
        token::{MultiToken, Token},
    };

    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU8, Ordering};
    use tracing_test::traced_test;

    struct Clock;

    impl Injectable for Clock {
        fn construct() -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    fn registry() -> Registry {
        Registry::new(true)
    }

    #[test]
    #[traced_test]
    fn test_declare_then_supply() {
        let classes = ClassRegistry::new();
        let port = Token::<u16>::new("PORT");
        let mut registry = registry();

        registry.add(Provider::new(&port).into(), &classes).unwrap();
        assert!(matches!(
            registry.add(Provider::new(&port).into(), &classes),
            Err(ProvideErrorKind::Duplicate { .. })
        ));

        registry.add(Provider::new(&port).use_value(80).into(), &classes).unwrap();
        assert!(matches!(
            registry.add(Provider::new(&port).use_value(81).into(), &classes),
            Err(ProvideErrorKind::DuplicateFactory { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_factory_injections_traced() {
        let classes = ClassRegistry::new();
        let port = Token::<u16>::new("PORT");
        let url = Token::<u32>::new("URL");
        let mut registry = registry();

        registry
            .add(
                Provider::new(&url)
                    .use_factory({
                        let port = port.clone();
                        move || Ok(u32::from(*inject(&port)?))
                    })
                    .into(),
                &classes,
            )
            .unwrap();

        let id = registry.find(url.key()).unwrap();
        let Some(ProtoNode::Single { trace, factory, .. }) = registry.get(id) else {
            panic!("expected a single node");
        };
        assert!(factory.is_some());
        assert!(trace.blocked);
        assert_eq!(trace.injections.len(), 1);
        assert_eq!(&trace.injections[0].token, port.key());
    }

    #[test]
    #[traced_test]
    fn test_duplicate_factory_isnt_traced() {
        let classes = ClassRegistry::new();
        let port = Token::<u16>::new("PORT");
        let runs = Arc::new(AtomicU8::new(0));
        let mut registry = registry();

        registry.add(Provider::new(&port).use_value(80).into(), &classes).unwrap();
        assert!(matches!(
            registry.stage(
                Provider::new(&port)
                    .use_factory({
                        let runs = runs.clone();
                        move || Ok(u16::from(runs.fetch_add(1, Ordering::SeqCst)))
                    })
                    .into(),
                &classes,
            ),
            Err(ProvideErrorKind::DuplicateFactory { .. })
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[traced_test]
    fn test_commit_rechecks_the_slot() {
        let classes = ClassRegistry::new();
        let port = Token::<u16>::new("PORT");
        let mut registry = registry();

        let first = registry.stage(Provider::new(&port).use_value(80).into(), &classes).unwrap();
        let second = registry.stage(Provider::new(&port).use_value(81).into(), &classes).unwrap();

        registry.commit(first.trace(true)).unwrap();
        assert!(matches!(
            registry.commit(second.trace(true)),
            Err(ProvideErrorKind::DuplicateFactory { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_alias_rules() {
        let classes = ClassRegistry::new();
        let port = Token::<u16>::new("PORT");
        let ports = MultiToken::<u16>::new("PORTS");
        let mut registry = registry();

        assert!(matches!(
            registry.add(Provider::new(&port).use_alias(&port).into(), &classes),
            Err(ProvideErrorKind::LoopAlias { .. })
        ));
        assert!(matches!(
            registry.add(Provider::new(&port).use_alias(&ports).into(), &classes),
            Err(ProvideErrorKind::InvalidAlias { .. })
        ));
        assert!(matches!(
            registry.add(Provider::new(&ports).use_alias(&ports).into(), &classes),
            Err(ProvideErrorKind::LoopAlias { .. })
        ));
        assert!(matches!(
            registry.add(Provider::new(&port).use_value(1).use_factory(|| Ok(2)).into(), &classes),
            Err(ProvideErrorKind::InvalidProvider { payloads: 2, .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_multi_contributions_keep_order() {
        let classes = ClassRegistry::new();
        let port = Token::<u16>::new("PORT");
        let ports = MultiToken::<u16>::new("PORTS");
        let extra = MultiToken::<u16>::new("EXTRA");
        let mut registry = registry();

        registry.add(Provider::new(&ports).use_value(1).into(), &classes).unwrap();
        registry.add(Provider::new(&ports).use_alias(&port).into(), &classes).unwrap();
        registry.add(Provider::new(&ports).use_alias(&port).into(), &classes).unwrap();
        registry.add(Provider::new(&ports).use_alias(&extra).into(), &classes).unwrap();
        registry.add(Provider::new(&ports).use_factory(|| Ok(2)).into(), &classes).unwrap();

        let id = registry.find(ports.key()).unwrap();
        let Some(ProtoNode::Multi { own, multis, .. }) = registry.get(id) else {
            panic!("expected a multi node");
        };
        assert_eq!(own.len(), 3);
        assert!(matches!(own[0], Contribution::Transparent(_)));
        assert_eq!(own[1], Contribution::Single(port.key().clone()));
        assert!(matches!(own[2], Contribution::Transparent(_)));
        assert_eq!(multis, &[extra.key().clone()]);
    }

    #[test]
    #[traced_test]
    fn test_class_registration() {
        let clock = Token::<Clock>::new("CLOCK");
        let mut registry = registry();

        assert!(matches!(
            registry.add(Provider::<Clock>::class().into(), &ClassRegistry::new()),
            Err(ProvideErrorKind::InvalidCtor { .. })
        ));
        assert!(matches!(
            registry.add(Provider::new(&Token::<Clock>::new("OTHER")).use_alias_class().into(), &ClassRegistry::new()),
            Err(ProvideErrorKind::InvalidAlias { .. })
        ));

        let classes = ClassRegistry::new().register(&clock);
        registry.add(Provider::<Clock>::class().into(), &classes).unwrap();
        assert!(registry.find(clock.key()).is_some());
    }
}
