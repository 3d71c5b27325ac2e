use alloc::sync::Arc;
use core::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};

use crate::{
    errors::InstantiateErrorKind,
    instantiator::{boxed_factory, BoxedCloneFactory},
};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Single,
    Multi,
}

struct TokenInner {
    id: u64,
    name: &'static str,
    kind: TokenKind,
    fallback: Option<BoxedCloneFactory>,
}

/// Type-erased token identity.
///
/// Equality, ordering and hashing use the id allocated when the token was created,
/// so two tokens with the same name are still different dependency slots.
#[derive(Clone)]
pub struct TokenKey {
    inner: Arc<TokenInner>,
}

impl TokenKey {
    fn new(name: &'static str, kind: TokenKind, fallback: Option<BoxedCloneFactory>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id: NEXT_TOKEN_ID.fetch_add(1, AtomicOrdering::Relaxed),
                name,
                kind,
                fallback,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.inner.kind
    }

    #[inline]
    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.inner.kind == TokenKind::Multi
    }

    #[inline]
    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.inner.fallback.is_some()
    }

    #[inline]
    pub(crate) fn fallback(&self) -> Option<&BoxedCloneFactory> {
        self.inner.fallback.as_ref()
    }
}

impl PartialEq for TokenKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for TokenKey {}

impl PartialOrd for TokenKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TokenKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.id.cmp(&other.inner.id)
    }
}

impl Hash for TokenKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl Debug for TokenKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKey")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl Display for TokenKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.inner.name)
    }
}

/// Identity of a single-value dependency slot holding a `T`.
pub struct Token<T> {
    key: TokenKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Token<T> {
    #[inline]
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self::from_key(TokenKey::new(name, TokenKind::Single, None))
    }

    /// Creates a token which builds its value with `fallback` when no provider supplies one.
    ///
    /// The fallback is used for bare declarations and for injections of the token that no container in the chain registers.
    #[inline]
    #[must_use]
    pub fn with_fallback<F>(name: &'static str, fallback: F) -> Self
    where
        F: FnMut() -> Result<T, InstantiateErrorKind> + Clone + Send + Sync + 'static,
    {
        Self::from_key(TokenKey::new(name, TokenKind::Single, Some(boxed_factory(fallback))))
    }
}

impl<T> Token<T> {
    #[inline]
    pub(crate) const fn from_key(key: TokenKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.key.name()
    }
}

/// Identity of a multi-value dependency slot collecting `T`s.
pub struct MultiToken<T> {
    key: TokenKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> MultiToken<T> {
    #[inline]
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            key: TokenKey::new(name, TokenKind::Multi, None),
            _marker: PhantomData,
        }
    }
}

impl<T> MultiToken<T> {
    #[inline]
    #[must_use]
    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.key.name()
    }
}

macro_rules! impl_token_traits {
    ($token:ident) => {
        impl<T> Clone for $token<T> {
            fn clone(&self) -> Self {
                Self {
                    key: self.key.clone(),
                    _marker: PhantomData,
                }
            }
        }

        impl<T> PartialEq for $token<T> {
            fn eq(&self, other: &Self) -> bool {
                self.key == other.key
            }
        }

        impl<T> Eq for $token<T> {}

        impl<T> Debug for $token<T> {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($token)).field(&self.key).finish()
            }
        }

        impl<T> Display for $token<T> {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.key, f)
            }
        }

        impl<T> TypedToken<T> for $token<T> {
            #[inline]
            fn key(&self) -> &TokenKey {
                &self.key
            }
        }

        impl<T> From<&$token<T>> for TokenKey {
            #[inline]
            fn from(token: &$token<T>) -> Self {
                token.key.clone()
            }
        }
    };
}

impl_token_traits!(Token);
impl_token_traits!(MultiToken);

/// Tokens of either kind whose slot holds `T`
pub trait TypedToken<T> {
    fn key(&self) -> &TokenKey;
}

#[cfg(test)]
mod tests {
    use super::{MultiToken, Token, TokenKey, TokenKind};

    use alloc::{collections::BTreeSet, format};

    #[test]
    fn test_same_name_distinct_identity() {
        let first = Token::<u8>::new("PORT");
        let second = Token::<u8>::new("PORT");

        assert_ne!(first, second);
        assert_eq!(first, first.clone());
        assert_eq!(first.name(), second.name());
    }

    #[test]
    fn test_key_kind() {
        let single = Token::<u8>::new("SINGLE");
        let multi = MultiToken::<u8>::new("MULTI");

        assert_eq!(single.key().kind(), TokenKind::Single);
        assert!(multi.key().is_multi());
        assert!(!single.key().has_fallback());
        assert!(Token::<u8>::with_fallback("FALLBACK", || Ok(1)).key().has_fallback());
    }

    #[test]
    fn test_key_ordering_follows_creation() {
        let first = TokenKey::from(&Token::<u8>::new("FIRST"));
        let second = TokenKey::from(&Token::<u8>::new("SECOND"));

        assert!(first < second);

        let set = BTreeSet::from([second.clone(), first.clone(), first.clone()]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.into_iter().next(), Some(first));
    }

    #[test]
    fn test_display_uses_name() {
        let token = Token::<u8>::new("CONFIG");
        assert_eq!(format!("{token}"), "CONFIG");
    }
}
