use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::{any::type_name, cell::RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::{
    any::{downcast, Instance, Resolved},
    errors::{InstantiateErrorKind, ResolveErrorKind},
    instantiator::BoxedCloneFactory,
    service::{service_fn, BoxCloneService, Service as _},
    token::{MultiToken, Token, TokenKey},
};

/// Injection call observed inside a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub token: TokenKey,
    pub optional: bool,
}

/// Injections observed by one dry run of a factory
#[derive(Debug, Clone, Default)]
pub(crate) struct Trace {
    pub(crate) injections: Vec<Injection>,
    /// The run requested a required value the dry run couldn't answer,
    /// so injections after that call may be missing
    pub(crate) blocked: bool,
}

impl Trace {
    /// Injections of a token the run already requested
    pub(crate) fn repeated(&self) -> usize {
        let mut seen: Vec<&TokenKey> = Vec::with_capacity(self.injections.len());
        for Injection { token, .. } in &self.injections {
            if !seen.contains(&token) {
                seen.push(token);
            }
        }
        self.injections.len() - seen.len()
    }
}

/// Answers injections of a running factory.
///
/// `Ok(None)` means the token was traced as optional and nothing provides it.
pub(crate) type BoxedCloneResolver = BoxCloneService<Injection, Option<Resolved>, ResolveErrorKind>;

#[must_use]
pub(crate) fn boxed_resolver<F>(resolver: F) -> BoxedCloneResolver
where
    F: FnMut(Injection) -> Result<Option<Resolved>, ResolveErrorKind> + Clone + Send + Sync + 'static,
{
    BoxCloneService::new(service_fn(resolver))
}

enum Answer {
    Live(BoxedCloneResolver),
    Scanned(Option<Resolved>),
}

struct Session {
    requester: Option<TokenKey>,
    /// `None` while scanning
    resolver: Option<BoxedCloneResolver>,
    /// Values a dry run may hand out
    known: BTreeMap<TokenKey, Resolved>,
    injections: Vec<Injection>,
    blocked: bool,
}

impl Session {
    fn answer(&mut self, token: &TokenKey, optional: bool) -> Result<Answer, ResolveErrorKind> {
        self.injections.push(Injection {
            token: token.clone(),
            optional,
        });

        if let Some(resolver) = &self.resolver {
            return Ok(Answer::Live(resolver.clone()));
        }
        if let Some(value) = self.known.get(token) {
            return Ok(Answer::Scanned(Some(value.clone())));
        }
        if optional || token.is_multi() {
            return Ok(Answer::Scanned(None));
        }
        self.blocked = true;
        Err(ResolveErrorKind::Scanning { token: token.clone() })
    }
}

thread_local! {
    static SESSION: RefCell<Option<Session>> = const { RefCell::new(None) };
}

/// Makes a session current for the thread and puts the suspended one back on drop.
struct SessionGuard {
    previous: Option<Option<Session>>,
}

impl SessionGuard {
    fn enter(session: Session) -> Self {
        debug!(
            requester = session.requester.as_ref().map(TokenKey::name),
            scanning = session.resolver.is_none(),
            "Session opened"
        );
        let previous = SESSION.with(|slot| slot.replace(Some(session)));
        if previous.is_some() {
            debug!("Enclosing session suspended");
        }
        Self { previous: Some(previous) }
    }

    fn finish(mut self) -> Trace {
        let previous = self.previous.take().flatten();
        let current = SESSION.with(|slot| slot.replace(previous));
        debug!("Session closed");
        current.map_or_else(Trace::default, |session| Trace {
            injections: session.injections,
            blocked: session.blocked,
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            SESSION.with(|slot| slot.replace(previous));
            debug!("Session closed");
        }
    }
}

/// Dry-runs `factory` with no resolver bound and returns every injection it requested.
///
/// Injections of tokens in `known` are answered with those values, other required single
/// injections fail with [`ResolveErrorKind::Scanning`] and mark the trace as blocked.
/// Errors of the run are discarded. Panics are discarded too when `catch_panics` is set.
pub(crate) fn scan(
    factory: &BoxedCloneFactory,
    requester: Option<&TokenKey>,
    known: BTreeMap<TokenKey, Resolved>,
    catch_panics: bool,
) -> Trace {
    let guard = SessionGuard::enter(Session {
        requester: requester.cloned(),
        resolver: None,
        known,
        injections: Vec::new(),
        blocked: false,
    });

    let mut factory = factory.clone();
    if catch_panics {
        match catch_unwind(AssertUnwindSafe(|| factory.call(()))) {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(%err, "Scan run failed, error discarded"),
            Err(_) => debug!("Scan run panicked, panic discarded"),
        }
    } else if let Err(err) = factory.call(()) {
        debug!(%err, "Scan run failed, error discarded");
    }

    guard.finish()
}

/// Runs `factory` for real, answering each injection with `resolver`
pub(crate) fn instantiate(
    mut factory: BoxedCloneFactory,
    requester: Option<TokenKey>,
    resolver: BoxedCloneResolver,
) -> Result<Instance, InstantiateErrorKind> {
    let guard = SessionGuard::enter(Session {
        requester,
        resolver: Some(resolver),
        known: BTreeMap::new(),
        injections: Vec::new(),
        blocked: false,
    });
    let result = factory.call(());
    drop(guard);
    result
}

/// Records an injection of `token` in the current session and answers it.
///
/// While scanning, known tokens are answered with their values, other required single
/// injections fail with [`ResolveErrorKind::Scanning`] and everything else answers `None`.
pub(crate) fn inject_key(token: &TokenKey, optional: bool) -> Result<Option<Resolved>, ResolveErrorKind> {
    let answer = SESSION.with(|slot| match slot.borrow_mut().as_mut() {
        Some(session) => session.answer(token, optional),
        None => {
            let err = ResolveErrorKind::OutsideContext { token: token.clone() };
            warn!("{}", err);
            Err(err)
        }
    })?;

    match answer {
        Answer::Live(mut resolver) => resolver.call(Injection {
            token: token.clone(),
            optional,
        }),
        Answer::Scanned(value) => Ok(value),
    }
}

fn downcast_single<T: Send + Sync + 'static>(token: &TokenKey, instance: Instance) -> Result<Arc<T>, ResolveErrorKind> {
    downcast::<T>(instance).ok_or_else(|| ResolveErrorKind::IncorrectType {
        token: token.clone(),
        expected: type_name::<T>(),
    })
}

/// Injects the value of `token`.
///
/// # Errors
/// Fails outside of an injection context, while scanning, and when nothing provides the token.
pub fn inject<T: Send + Sync + 'static>(token: &Token<T>) -> Result<Arc<T>, ResolveErrorKind> {
    let key = token.key();
    match inject_key(key, false)? {
        Some(Resolved::Single(instance)) => downcast_single(key, instance),
        Some(Resolved::Multi(_)) => Err(ResolveErrorKind::IncorrectType {
            token: key.clone(),
            expected: "single value",
        }),
        None => {
            let err = ResolveErrorKind::NotFound {
                token: key.clone(),
                requester: requester().ok().flatten(),
            };
            warn!("{}", err);
            Err(err)
        }
    }
}

/// Injects the value of `token`, or `None` when nothing provides it.
///
/// # Errors
/// Fails outside of an injection context.
pub fn inject_optional<T: Send + Sync + 'static>(token: &Token<T>) -> Result<Option<Arc<T>>, ResolveErrorKind> {
    let key = token.key();
    match inject_key(key, true)? {
        Some(Resolved::Single(instance)) => downcast_single(key, instance).map(Some),
        Some(Resolved::Multi(_)) => Err(ResolveErrorKind::IncorrectType {
            token: key.clone(),
            expected: "single value",
        }),
        None => Ok(None),
    }
}

/// Injects every contribution of `token` in order. A token with no contributions yields an empty `Vec`.
///
/// # Errors
/// Fails outside of an injection context.
pub fn inject_multi<T: Send + Sync + 'static>(token: &MultiToken<T>) -> Result<Vec<Arc<T>>, ResolveErrorKind> {
    let key = token.key();
    match inject_key(key, false)? {
        Some(Resolved::Multi(instances)) => instances.into_iter().map(|instance| downcast_single(key, instance)).collect(),
        Some(Resolved::Single(_)) => Err(ResolveErrorKind::IncorrectType {
            token: key.clone(),
            expected: "multi value",
        }),
        None => Ok(Vec::new()),
    }
}

/// Token whose factory is running in the current session.
///
/// # Errors
/// Fails with [`ResolveErrorKind::CalledUtilsOutsideContext`] outside of a session.
pub fn requester() -> Result<Option<TokenKey>, ResolveErrorKind> {
    SESSION.with(|slot| match slot.borrow().as_ref() {
        Some(session) => Ok(session.requester.clone()),
        None => Err(ResolveErrorKind::CalledUtilsOutsideContext { util: "requester" }),
    })
}

/// Whether the current session is a dry run.
///
/// # Errors
/// Fails with [`ResolveErrorKind::CalledUtilsOutsideContext`] outside of a session.
pub fn is_scanning() -> Result<bool, ResolveErrorKind> {
    SESSION.with(|slot| match slot.borrow().as_ref() {
        Some(session) => Ok(session.resolver.is_none()),
        None => Err(ResolveErrorKind::CalledUtilsOutsideContext { util: "is_scanning" }),
    })
}

#[cfg(test)]
mod tests {
    use super::{boxed_resolver, inject, inject_multi, inject_optional, instantiate, is_scanning, requester, scan, Injection};
    use crate::{
        any::{downcast, Instance, Resolved},
        errors::{InstantiateErrorKind, ResolveErrorKind},
        instantiator::boxed_factory,
        token::{MultiToken, Token},
    };

    use alloc::{collections::BTreeMap, sync::Arc, vec, vec::Vec};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_scan_records_every_injection() {
        let port = Token::<u16>::new("PORT");
        let host = Token::<&'static str>::new("HOST");
        let plugins = MultiToken::<u8>::new("PLUGINS");

        let factory = boxed_factory({
            let (port, host, plugins) = (port.clone(), host.clone(), plugins.clone());
            move || {
                assert!(is_scanning()?);
                assert!(inject_multi(&plugins)?.is_empty());
                assert!(inject_optional(&host)?.is_none());
                let _ = inject(&port);
                let port = inject(&port)?;
                Ok(*port)
            }
        });

        let trace = scan(&factory, None, BTreeMap::new(), true);
        assert!(trace.blocked);
        assert_eq!(trace.repeated(), 1);
        assert_eq!(
            trace.injections,
            [
                Injection { token: plugins.key().clone(), optional: false },
                Injection { token: host.key().clone(), optional: true },
                Injection { token: port.key().clone(), optional: false },
                Injection { token: port.key().clone(), optional: false },
            ]
        );
    }

    #[test]
    #[traced_test]
    fn test_scan_discards_panics() {
        let port = Token::<u16>::new("PORT");
        let factory = boxed_factory({
            let port = port.clone();
            move || -> Result<u16, InstantiateErrorKind> {
                let _ = inject_optional(&port)?;
                panic!("factory panicked");
            }
        });

        let trace = scan(&factory, None, BTreeMap::new(), true);
        assert_eq!(trace.injections.len(), 1);
        assert!(!trace.blocked);
        assert!(requester().is_err());
    }

    #[test]
    #[traced_test]
    fn test_scan_propagates_panics_and_restores_session() {
        let factory = boxed_factory(|| -> Result<u16, InstantiateErrorKind> { panic!("factory panicked") });

        let result = catch_unwind(AssertUnwindSafe(|| scan(&factory, None, BTreeMap::new(), false)));
        assert!(result.is_err());
        assert!(matches!(
            requester(),
            Err(ResolveErrorKind::CalledUtilsOutsideContext { util: "requester" })
        ));
    }

    #[test]
    #[traced_test]
    fn test_scan_answers_known_values() {
        let first = Token::<u16>::new("FIRST");
        let second = Token::<u16>::new("SECOND");

        let factory = boxed_factory({
            let (first, second) = (first.clone(), second.clone());
            move || {
                let first = inject(&first)?;
                let second = inject(&second)?;
                Ok(*first + *second)
            }
        });

        let trace = scan(&factory, None, BTreeMap::new(), true);
        assert!(trace.blocked);
        assert_eq!(trace.injections.len(), 1);

        let known = BTreeMap::from([(first.key().clone(), Resolved::Single(Arc::new(1u16) as Instance))]);
        let trace = scan(&factory, None, known, true);
        assert!(trace.blocked);
        assert_eq!(trace.injections.len(), 2);
        assert_eq!(&trace.injections[1].token, second.key());

        let known = BTreeMap::from([
            (first.key().clone(), Resolved::Single(Arc::new(1u16) as Instance)),
            (second.key().clone(), Resolved::Single(Arc::new(2u16) as Instance)),
        ]);
        let trace = scan(&factory, None, known, true);
        assert!(!trace.blocked);
        assert_eq!(trace.injections.len(), 2);
    }

    #[test]
    #[traced_test]
    fn test_injections_outside_context() {
        let port = Token::<u16>::new("PORT");

        assert!(matches!(inject(&port), Err(ResolveErrorKind::OutsideContext { .. })));
        assert!(matches!(
            requester(),
            Err(ResolveErrorKind::CalledUtilsOutsideContext { util: "requester" })
        ));
        assert!(matches!(
            is_scanning(),
            Err(ResolveErrorKind::CalledUtilsOutsideContext { util: "is_scanning" })
        ));
    }

    #[test]
    #[traced_test]
    fn test_instantiate_uses_resolver() {
        let port = Token::<u16>::new("PORT");
        let service = Token::<u32>::new("SERVICE");

        let resolver = boxed_resolver(|injection| {
            assert!(!injection.optional);
            Ok(Some(Resolved::Single(Arc::new(8080u16))))
        });
        let factory = boxed_factory({
            let (port, service) = (port.clone(), service.clone());
            move || {
                assert!(!is_scanning()?);
                assert_eq!(requester()?, Some(service.key().clone()));
                Ok(u32::from(*inject(&port)?))
            }
        });

        let instance = instantiate(factory, Some(service.key().clone()), resolver).unwrap();
        assert_eq!(*downcast::<u32>(instance).unwrap(), 8080);
        assert!(requester().is_err());
    }

    #[test]
    #[traced_test]
    fn test_nested_instantiate_restores_enclosing_session() {
        let outer = Token::<u8>::new("OUTER");
        let inner = Token::<u8>::new("INNER");

        let inner_factory = boxed_factory({
            let inner = inner.clone();
            move || {
                assert_eq!(requester()?, Some(inner.key().clone()));
                Ok(1u8)
            }
        });
        let outer_factory = boxed_factory({
            let outer = outer.clone();
            move || {
                let resolver = boxed_resolver(|_| Ok(None));
                let value = instantiate(inner_factory.clone(), Some(inner.key().clone()), resolver)?;
                assert_eq!(requester()?, Some(outer.key().clone()));
                Ok(*downcast::<u8>(value).unwrap() + 1)
            }
        });

        let resolver = boxed_resolver(|_| Ok(None));
        let value = instantiate(outer_factory, Some(outer.key().clone()), resolver).unwrap();
        assert_eq!(*downcast::<u8>(value).unwrap(), 2);
    }

    #[test]
    #[traced_test]
    fn test_inject_multi_downcasts_in_order() {
        let plugins = MultiToken::<u8>::new("PLUGINS");

        let resolver = boxed_resolver(|_| Ok(Some(Resolved::Multi(vec![Arc::new(1u8) as Instance, Arc::new(2u8)]))));
        let factory = boxed_factory({
            let plugins = plugins.clone();
            move || Ok(inject_multi(&plugins)?.iter().map(|value| **value).collect::<Vec<_>>())
        });

        let instance = instantiate(factory, None, resolver).unwrap();
        assert_eq!(*downcast::<Vec<u8>>(instance).unwrap(), [1, 2]);
    }
}
