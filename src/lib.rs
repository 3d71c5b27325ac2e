extern crate alloc;

#[macro_use]
pub(crate) mod macros;

pub(crate) mod any;
pub(crate) mod class;
pub(crate) mod config;
pub(crate) mod container;
pub(crate) mod context;
pub(crate) mod dependency_resolver;
pub(crate) mod diagnostics;
pub(crate) mod errors;
pub(crate) mod instantiator;
pub(crate) mod middleware;
pub(crate) mod provider;
pub(crate) mod registry;
pub(crate) mod resolver;
pub(crate) mod service;
pub(crate) mod token;
pub(crate) mod tree;

pub use any::{Instance, Resolved, TypeInfo};
pub use class::{ClassRegistry, Injectable};
pub use config::Config;
pub use container::{Container, ContainerBuilder};
pub use context::{inject, inject_multi, inject_optional, is_scanning, requester, Injection};
pub use dependency_resolver::{DependencyResolver, Optional};
pub use diagnostics::{BootstrapReport, DiagnosticsSink};
pub use errors::{BootstrapErrorKind, GetErrorKind, InstantiateErrorKind, ProvideErrorKind, ResolveErrorKind, TokenPath};
pub use middleware::{register_global as register_global_middleware, Middleware, Next, NodeTarget};
pub use provider::{Provider, ProviderSet, Registration};
pub use token::{MultiToken, Token, TokenKey, TokenKind, TypedToken};
