use alloc::collections::BTreeMap;
use tracing::debug;

use crate::{
    any::TypeInfo,
    errors::InstantiateErrorKind,
    token::{Token, TokenKey},
};

/// Type that knows how to build itself inside an injection context.
///
/// Dependencies are requested from the body of [`Injectable::construct`] with
/// [`crate::inject`] and friends, the same way a factory does.
pub trait Injectable: Send + Sync + Sized + 'static {
    fn construct() -> Result<Self, InstantiateErrorKind>;
}

/// Identity map from class types to the tokens they are provided under.
///
/// It's used whenever a class is registered or requested without an explicit token.
#[derive(Clone, Default)]
pub struct ClassRegistry {
    tokens: BTreeMap<TypeInfo, TokenKey>,
}

impl ClassRegistry {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { tokens: BTreeMap::new() }
    }

    /// Associates the class `C` with `token`, replacing the previous association
    #[must_use]
    pub fn register<C: Injectable>(mut self, token: &Token<C>) -> Self {
        let class = TypeInfo::of::<C>();
        debug!(class = class.short_name(), token = token.name(), "Class registered");
        self.tokens.insert(class, token.key().clone());
        self
    }

    #[inline]
    #[must_use]
    pub fn is_injectable<C: 'static>(&self) -> bool {
        self.tokens.contains_key(&TypeInfo::of::<C>())
    }

    #[inline]
    #[must_use]
    pub fn token_of<C: Injectable>(&self) -> Option<Token<C>> {
        self.tokens.get(&TypeInfo::of::<C>()).cloned().map(Token::from_key)
    }

    #[inline]
    pub(crate) fn key_of(&self, class: &TypeInfo) -> Option<&TokenKey> {
        self.tokens.get(class)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassRegistry, Injectable};
    use crate::{errors::InstantiateErrorKind, token::Token};

    struct Clock;

    impl Injectable for Clock {
        fn construct() -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    struct Unregistered;

    impl Injectable for Unregistered {
        fn construct() -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let token = Token::<Clock>::new("CLOCK");
        let registry = ClassRegistry::new().register(&token);

        assert!(registry.is_injectable::<Clock>());
        assert!(!registry.is_injectable::<Unregistered>());
        assert_eq!(registry.token_of::<Clock>(), Some(token));
        assert!(registry.token_of::<Unregistered>().is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_replaces() {
        let first = Token::<Clock>::new("CLOCK");
        let second = Token::<Clock>::new("CLOCK");
        let registry = ClassRegistry::new().register(&first).register(&second);

        assert_eq!(registry.token_of::<Clock>(), Some(second));
        assert_eq!(registry.len(), 1);
    }
}
