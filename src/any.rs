use alloc::{sync::Arc, vec::Vec};
use core::{
    any::{type_name, Any, TypeId},
    cmp::Ordering,
};

/// Type-erased shared instance produced by a factory.
pub type Instance = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub name: &'static str,
    pub id: TypeId,
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl TypeInfo {
    #[inline]
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    #[inline]
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit_once("::").map_or(self.name, |(_, name)| name)
    }
}

/// Cached value of an instantiated node
#[derive(Debug, Clone)]
pub enum Resolved {
    Single(Instance),
    Multi(Vec<Instance>),
}

impl Resolved {
    /// Appends the value to a multi-value array, splicing nested arrays one level.
    pub(crate) fn extend_into(&self, values: &mut Vec<Instance>) {
        match self {
            Resolved::Single(instance) => values.push(instance.clone()),
            Resolved::Multi(instances) => values.extend(instances.iter().cloned()),
        }
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Option<Arc<T>> {
    instance.downcast::<T>().ok()
}
