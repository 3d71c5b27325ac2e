use alloc::{sync::Arc, vec::Vec};
use core::fmt::{self, Debug, Formatter};
use tracing::debug_span;

use crate::{
    context::{inject, inject_multi, inject_optional},
    errors::ResolveErrorKind,
    token::{MultiToken, Token},
};

/// Typed list of dependencies a factory requests inside its session.
///
/// Tuples request every element before reporting the first failure,
/// so a dry run observes the whole list even though the values aren't available yet.
pub trait DependencyResolver {
    type Output;

    /// # Errors
    /// Fails like the injection primitive behind the dependency
    fn resolve(&self) -> Result<Self::Output, ResolveErrorKind>;
}

impl<T: Send + Sync + 'static> DependencyResolver for Token<T> {
    type Output = Arc<T>;

    #[inline]
    fn resolve(&self) -> Result<Self::Output, ResolveErrorKind> {
        let span = debug_span!("resolve", token = self.name());
        let _guard = span.enter();

        inject(self)
    }
}

impl<T: Send + Sync + 'static> DependencyResolver for MultiToken<T> {
    type Output = Vec<Arc<T>>;

    #[inline]
    fn resolve(&self) -> Result<Self::Output, ResolveErrorKind> {
        let span = debug_span!("resolve", token = self.name(), multi = true);
        let _guard = span.enter();

        inject_multi(self)
    }
}

/// Dependency on `token` that resolves to `None` when nothing provides it
pub struct Optional<T>(pub Token<T>);

impl<T> Clone for Optional<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Debug for Optional<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Optional").field(&self.0).finish()
    }
}

impl<T: Send + Sync + 'static> DependencyResolver for Optional<T> {
    type Output = Option<Arc<T>>;

    #[inline]
    fn resolve(&self) -> Result<Self::Output, ResolveErrorKind> {
        let span = debug_span!("resolve", token = self.0.name(), optional = true);
        let _guard = span.enter();

        inject_optional(&self.0)
    }
}

macro_rules! impl_dependency_resolver {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case)]
        impl<$($ty,)*> DependencyResolver for ($($ty,)*)
        where
            $( $ty: DependencyResolver, )*
        {
            type Output = ($($ty::Output,)*);

            #[inline]
            fn resolve(&self) -> Result<Self::Output, ResolveErrorKind> {
                let ($($ty,)*) = self;
                $( let $ty = $ty.resolve(); )*
                Ok(($($ty?,)*))
            }
        }
    };
}

all_the_tuples!(impl_dependency_resolver);
