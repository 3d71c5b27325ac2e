mod container;
mod dependency_resolver;
mod instantiator;
mod registry;

pub use container::{BootstrapErrorKind, GetErrorKind};
pub use dependency_resolver::{ResolveErrorKind, TokenPath};
pub use instantiator::InstantiateErrorKind;
pub use registry::ProvideErrorKind;
