use super::{dependency_resolver::ResolveErrorKind, instantiator::InstantiateErrorKind};
use crate::{any::TypeInfo, token::TokenKey};

#[derive(thiserror::Error, Debug)]
pub enum BootstrapErrorKind {
    #[error("Container is already bootstrapped")]
    DoubleBootstrap,
    #[error(transparent)]
    Resolve(#[from] ResolveErrorKind),
    #[error("Factory of `{token}` failed: {source}")]
    Factory {
        token: TokenKey,
        #[source]
        source: anyhow::Error,
    },
}

impl BootstrapErrorKind {
    pub(crate) fn from_instantiate(token: TokenKey, err: InstantiateErrorKind) -> Self {
        match err {
            InstantiateErrorKind::Resolve(err) => Self::Resolve(err),
            InstantiateErrorKind::Custom(source) => Self::Factory { token, source },
        }
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum GetErrorKind {
    #[error("Container isn't bootstrapped")]
    NotBootstrapped,
    #[error("Container bootstrap failed, the container is unusable")]
    BootstrapFailed,
    #[error("Class `{}` isn't registered in the class registry", .class.name)]
    UnknownClass { class: TypeInfo },
    #[error(transparent)]
    Resolve(#[from] ResolveErrorKind),
}
