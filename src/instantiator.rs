use alloc::sync::Arc;
use tracing::debug;

use crate::{
    any::{Instance, Resolved},
    class::Injectable,
    context,
    dependency_resolver::DependencyResolver,
    errors::{InstantiateErrorKind, ResolveErrorKind},
    service::{service_fn, BoxCloneService},
    token::TokenKey,
};

/// Erased factory every provider payload compiles to.
pub(crate) type BoxedCloneFactory = BoxCloneService<(), Instance, InstantiateErrorKind>;

#[must_use]
pub(crate) fn boxed_factory<T, F>(mut factory: F) -> BoxedCloneFactory
where
    T: Send + Sync + 'static,
    F: FnMut() -> Result<T, InstantiateErrorKind> + Clone + Send + Sync + 'static,
{
    BoxCloneService::new(service_fn(move |()| -> Result<Instance, InstantiateErrorKind> {
        let dependency = factory()?;
        Ok(Arc::new(dependency) as Instance)
    }))
}

#[must_use]
pub(crate) fn boxed_factory_with<Deps, T, F>(dependencies: Deps, mut factory: F) -> BoxedCloneFactory
where
    Deps: DependencyResolver + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: FnMut(Deps::Output) -> Result<T, InstantiateErrorKind> + Clone + Send + Sync + 'static,
{
    BoxCloneService::new(service_fn(move |()| -> Result<Instance, InstantiateErrorKind> {
        let dependencies = dependencies.resolve()?;
        let dependency = factory(dependencies)?;
        Ok(Arc::new(dependency) as Instance)
    }))
}

/// Factory returning the same shared value on every call
#[must_use]
pub(crate) fn boxed_value<T: Send + Sync + 'static>(value: T) -> BoxedCloneFactory {
    let value: Instance = Arc::new(value);
    BoxCloneService::new(service_fn(move |()| Ok::<_, InstantiateErrorKind>(value.clone())))
}

#[must_use]
pub(crate) fn boxed_class<C: Injectable>() -> BoxedCloneFactory {
    boxed_factory(C::construct)
}

/// Factory that injects `target` and hands back its instance unchanged, so the alias shares it.
#[must_use]
pub(crate) fn boxed_alias(target: TokenKey) -> BoxedCloneFactory {
    BoxCloneService::new(service_fn(move |()| -> Result<Instance, InstantiateErrorKind> {
        match context::inject_key(&target, false)? {
            Some(Resolved::Single(instance)) => {
                debug!(alias = target.name(), "Alias resolved");
                Ok(instance)
            }
            Some(Resolved::Multi(_)) => Err(ResolveErrorKind::IncorrectType {
                token: target.clone(),
                expected: "single value",
            }
            .into()),
            None => Err(ResolveErrorKind::NotFound {
                token: target.clone(),
                requester: None,
            }
            .into()),
        }
    }))
}
