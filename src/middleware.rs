use alloc::{sync::Arc, vec::Vec};
use parking_lot::{const_rwlock, RwLock};
use tracing::debug;

use crate::{any::Resolved, errors::InstantiateErrorKind, token::TokenKey};

/// Node whose instantiation is intercepted
#[derive(Debug, Clone, Copy)]
pub enum NodeTarget<'a> {
    Single(&'a TokenKey),
    Multi(&'a TokenKey),
    /// Inline contribution to the `owner` multi token
    Transparent { owner: &'a TokenKey },
}

impl NodeTarget<'_> {
    /// Token of the node, or the owning multi token for a transparent one
    #[inline]
    #[must_use]
    pub fn token(&self) -> &TokenKey {
        match self {
            NodeTarget::Single(token) | NodeTarget::Multi(token) | NodeTarget::Transparent { owner: token } => *token,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_transparent(&self) -> bool {
        matches!(self, NodeTarget::Transparent { .. })
    }
}

/// Interceptor around the instantiation of every node.
///
/// Returning an error aborts the bootstrap of the container.
pub trait Middleware: Send + Sync + 'static {
    /// # Errors
    /// Fails when the interceptor or the rest of the chain fails
    fn call(&self, target: &NodeTarget<'_>, next: Next<'_>) -> Result<Resolved, InstantiateErrorKind>;
}

/// Rest of the chain, ending with the instantiation itself
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    target: &'a NodeTarget<'a>,
    instantiate: &'a mut dyn FnMut() -> Result<Resolved, InstantiateErrorKind>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        chain: &'a [Arc<dyn Middleware>],
        target: &'a NodeTarget<'a>,
        instantiate: &'a mut dyn FnMut() -> Result<Resolved, InstantiateErrorKind>,
    ) -> Self {
        Self {
            chain,
            target,
            instantiate,
        }
    }

    /// # Errors
    /// Fails when the rest of the chain fails
    pub fn run(self) -> Result<Resolved, InstantiateErrorKind> {
        match self.chain.split_first() {
            Some((middleware, rest)) => middleware.call(self.target, Next::new(rest, self.target, self.instantiate)),
            None => (self.instantiate)(),
        }
    }
}

static GLOBAL: RwLock<Vec<Arc<dyn Middleware>>> = const_rwlock(Vec::new());

/// Adds `middleware` to every container of the process, outside of their own chains
pub fn register_global(middleware: impl Middleware) {
    debug!("Global middleware registered");
    GLOBAL.write().push(Arc::new(middleware));
}

#[inline]
pub(crate) fn global() -> Vec<Arc<dyn Middleware>> {
    GLOBAL.read().clone()
}

#[cfg(test)]
mod tests {
    use super::{Middleware, Next, NodeTarget};
    use crate::{any::Resolved, errors::InstantiateErrorKind, token::Token};

    use alloc::{sync::Arc, vec::Vec};
    use parking_lot::Mutex;

    struct Record {
        label: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Record {
        fn call(&self, _target: &NodeTarget<'_>, next: Next<'_>) -> Result<Resolved, InstantiateErrorKind> {
            self.calls.lock().push(self.label);
            let resolved = next.run();
            self.calls.lock().push(self.label);
            resolved
        }
    }

    struct Refuse;

    impl Middleware for Refuse {
        fn call(&self, target: &NodeTarget<'_>, _next: Next<'_>) -> Result<Resolved, InstantiateErrorKind> {
            Err(anyhow::anyhow!("`{}` refused", target.token()).into())
        }
    }

    #[test]
    fn test_chain_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = Vec::from([
            Arc::new(Record {
                label: "outer",
                calls: calls.clone(),
            }) as Arc<dyn Middleware>,
            Arc::new(Record {
                label: "inner",
                calls: calls.clone(),
            }),
        ]);

        let token = Token::<u8>::new("TOKEN");
        let target = NodeTarget::Single(token.key());
        let mut instantiate = || -> Result<Resolved, InstantiateErrorKind> {
            calls.lock().push("instantiate");
            Ok(Resolved::Multi(Vec::new()))
        };

        Next::new(&chain, &target, &mut instantiate).run().unwrap();
        assert_eq!(*calls.lock(), ["outer", "inner", "instantiate", "inner", "outer"]);
    }

    #[test]
    fn test_chain_short_circuits() {
        let chain: Vec<Arc<dyn Middleware>> = Vec::from([Arc::new(Refuse) as Arc<dyn Middleware>]);
        let owner = Token::<u8>::new("OWNER");
        let target = NodeTarget::Transparent { owner: owner.key() };
        let mut instantiated = false;
        let mut instantiate = || -> Result<Resolved, InstantiateErrorKind> {
            instantiated = true;
            Ok(Resolved::Multi(Vec::new()))
        };

        let err = Next::new(&chain, &target, &mut instantiate).run().unwrap_err();
        assert!(err.to_string().contains("OWNER"));
        assert!(target.is_transparent());
        assert!(!instantiated);
    }
}
