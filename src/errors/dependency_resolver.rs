use alloc::{boxed::Box, vec::Vec};
use core::fmt::{self, Display, Formatter};

use crate::token::TokenKey;

#[derive(thiserror::Error, Debug, Clone)]
pub enum ResolveErrorKind {
    #[error("No provider found for `{token}`{}", fmt_requester(.requester.as_ref()))]
    NotFound { token: TokenKey, requester: Option<TokenKey> },
    #[error("Circular dependency detected: {path}")]
    CircularDependency { path: TokenPath },
    #[error(
        "Injection of `{token}`{} wasn't observed while scanning the factory. \
        Conditional injections must be requested on every run",
        fmt_requester(.requester.as_ref())
    )]
    Untracked { token: TokenKey, requester: Option<TokenKey> },
    #[error("Injection of `{token}` requested outside of an injection context")]
    OutsideContext { token: TokenKey },
    #[error("`{util}` called outside of an injection context")]
    CalledUtilsOutsideContext { util: &'static str },
    #[error("`{token}` isn't available while scanning a factory")]
    Scanning { token: TokenKey },
    #[error("Incorrect instance type for `{token}`, expected: {expected}")]
    IncorrectType { token: TokenKey, expected: &'static str },
}

fn fmt_requester(requester: Option<&TokenKey>) -> alloc::string::String {
    match requester {
        Some(requester) => alloc::format!(" (requested by `{requester}`)"),
        None => alloc::string::String::new(),
    }
}

/// Token chain of a dependency cycle, starting and ending with the repeated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPath(pub(crate) Box<[TokenKey]>);

impl TokenPath {
    #[inline]
    #[must_use]
    pub fn tokens(&self) -> &[TokenKey] {
        &self.0
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(TokenKey::name).collect()
    }
}

impl Display for TokenPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (index, token) in self.0.iter().enumerate() {
            if index != 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}
