use super::dependency_resolver::ResolveErrorKind;

/// Error type of factories.
///
/// Injection failures convert into it, so `?` works on injections inside a factory body.
#[derive(thiserror::Error, Debug)]
pub enum InstantiateErrorKind {
    #[error(transparent)]
    Resolve(#[from] ResolveErrorKind),
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
}
