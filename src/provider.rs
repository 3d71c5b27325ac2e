use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::{
    any::TypeInfo,
    class::Injectable,
    dependency_resolver::DependencyResolver,
    errors::InstantiateErrorKind,
    instantiator::{boxed_class, boxed_factory, boxed_factory_with, boxed_value, BoxedCloneFactory},
    token::{TokenKey, TypedToken},
};

/// Slot a registration targets
#[derive(Clone)]
pub(crate) enum Target {
    Token(TokenKey),
    /// Looked up in the class registry when provided
    Class(TypeInfo),
}

#[derive(Clone)]
pub(crate) enum AliasTarget {
    Token(TokenKey),
    Class(TypeInfo),
}

#[derive(Clone)]
pub(crate) enum Payload {
    Value(BoxedCloneFactory),
    Factory(BoxedCloneFactory),
    Class(BoxedCloneFactory),
    Alias(AliasTarget),
}

impl Payload {
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Payload::Value(_) => "value",
            Payload::Factory(_) => "factory",
            Payload::Class(_) => "class",
            Payload::Alias(_) => "alias",
        }
    }
}

/// Type-erased registration accepted by [`crate::Container::provide`].
///
/// A registration without a payload declares its token.
#[derive(Clone)]
pub struct Registration {
    pub(crate) target: Target,
    pub(crate) payloads: Vec<Payload>,
}

/// Typed builder of a [`Registration`] for a slot holding `T`.
///
/// Works for both token kinds: a single token accepts one supplier,
/// a multi token collects every supplier in registration order.
///
/// ```ignore
/// let config = Token::<Config>::new("CONFIG");
/// container.provide(Provider::new(&config).use_value(Config::default()))?;
/// ```
pub struct Provider<T> {
    registration: Registration,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Provider<T> {
    #[inline]
    #[must_use]
    pub fn new<K: TypedToken<T>>(token: &K) -> Self {
        Self {
            registration: Registration {
                target: Target::Token(token.key().clone()),
                payloads: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    /// Shares `value` as the instance
    #[inline]
    #[must_use]
    pub fn use_value(self, value: T) -> Self {
        self.with_payload(Payload::Value(boxed_value(value)))
    }

    /// Builds the instance with `factory`, which requests its dependencies with [`crate::inject`] and friends.
    #[inline]
    #[must_use]
    pub fn use_factory<F>(self, factory: F) -> Self
    where
        F: FnMut() -> Result<T, InstantiateErrorKind> + Clone + Send + Sync + 'static,
    {
        self.with_payload(Payload::Factory(boxed_factory(factory)))
    }

    /// Builds the instance with `factory` from the resolved `dependencies`
    #[inline]
    #[must_use]
    pub fn use_factory_with<Deps, F>(self, dependencies: Deps, factory: F) -> Self
    where
        Deps: DependencyResolver + Clone + Send + Sync + 'static,
        F: FnMut(Deps::Output) -> Result<T, InstantiateErrorKind> + Clone + Send + Sync + 'static,
    {
        self.with_payload(Payload::Factory(boxed_factory_with(dependencies, factory)))
    }

    /// Shares the instance of `target`
    #[inline]
    #[must_use]
    pub fn use_alias<K: TypedToken<T>>(self, target: &K) -> Self {
        self.with_payload(Payload::Alias(AliasTarget::Token(target.key().clone())))
    }

    #[inline]
    fn with_payload(mut self, payload: Payload) -> Self {
        self.registration.payloads.push(payload);
        self
    }
}

impl<T: Injectable> Provider<T> {
    /// Builds the instance with [`Injectable::construct`]
    #[inline]
    #[must_use]
    pub fn use_class(self) -> Self {
        self.with_payload(Payload::Class(boxed_class::<T>()))
    }

    /// Shares the instance of the token `T` is registered under in the class registry
    #[inline]
    #[must_use]
    pub fn use_alias_class(self) -> Self {
        self.with_payload(Payload::Alias(AliasTarget::Class(TypeInfo::of::<T>())))
    }

    /// Registers `T` under the token the class registry associates with it
    #[inline]
    #[must_use]
    pub fn class() -> Self {
        Self {
            registration: Registration {
                target: Target::Class(TypeInfo::of::<T>()),
                payloads: Vec::from([Payload::Class(boxed_class::<T>())]),
            },
            _marker: PhantomData,
        }
    }
}

impl<T> From<Provider<T>> for Registration {
    #[inline]
    fn from(provider: Provider<T>) -> Self {
        provider.registration
    }
}

/// Ordered group of registrations, provided together with [`crate::Container::include`]
#[derive(Clone, Default)]
pub struct ProviderSet {
    registrations: Vec<Registration>,
}

impl ProviderSet {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn add(mut self, registration: impl Into<Registration>) -> Self {
        self.registrations.push(registration.into());
        self
    }

    /// Appends every registration of `other` after the current ones
    #[inline]
    #[must_use]
    pub fn extend(mut self, other: ProviderSet) -> Self {
        self.registrations.extend(other.registrations);
        self
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl IntoIterator for ProviderSet {
    type Item = Registration;
    type IntoIter = alloc::vec::IntoIter<Registration>;

    fn into_iter(self) -> Self::IntoIter {
        self.registrations.into_iter()
    }
}
