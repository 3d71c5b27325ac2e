use crate::{any::TypeInfo, token::TokenKey};

#[derive(thiserror::Error, Debug, Clone)]
pub enum ProvideErrorKind {
    #[error("`{token}` is already declared")]
    Duplicate { token: TokenKey },
    #[error("`{token}` already has a provider")]
    DuplicateFactory { token: TokenKey },
    #[error("Class `{}` isn't registered as injectable", .class.name)]
    InvalidCtor { class: TypeInfo },
    #[error("Provider for `{token}` must have exactly one of value, factory, class or alias, got {payloads}")]
    InvalidProvider { token: TokenKey, payloads: usize },
    #[error("`{token}` can't alias `{target}`")]
    InvalidAlias { token: TokenKey, target: &'static str },
    #[error("`{token}` is aliased to itself")]
    LoopAlias { token: TokenKey },
    #[error("Container is already bootstrapped, providers can't be added")]
    Bootstrapped,
}
