use std::{
    any::{type_name, TypeId},
    sync::Arc,
};

use dashmap::DashMap;

use super::{HasTypeMeta, KubeObject, ResourceDescriptor, TypeMeta};

/// Memoized [`ResourceDescriptor`]s keyed by resource type.
///
/// A descriptor is computed the first time its type is looked up and kept
/// for the lifetime of the registry; entries are never evicted. Lookups and
/// insertions only lock the shard holding the type, and racing first
/// lookups converge on one stored descriptor.
///
/// Create one registry per process and share it by reference or [`Arc`].
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    descriptors: DashMap<TypeId, Arc<ResourceDescriptor>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptor_for<T: KubeObject>(&self) -> Arc<ResourceDescriptor> {
        let id = TypeId::of::<T>();
        if let Some(descriptor) = self.descriptors.get(&id) {
            return Arc::clone(descriptor.value());
        }

        // computed outside the shard lock; a concurrent winner is kept instead
        let descriptor = Arc::new(ResourceDescriptor::of::<T>());
        if !descriptor.has_type_meta() {
            log::debug!("{} declares no kind or apiVersion", type_name::<T>());
        }
        Arc::clone(self.descriptors.entry(id).or_insert(descriptor).value())
    }

    /// Whether the descriptor of `T` has already been computed.
    pub fn contains<T: KubeObject>(&self) -> bool {
        self.descriptors.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Builds a default `T` with `kind` and `apiVersion` filled in from its descriptor.
    ///
    /// Both stay unset when `T` declares no metadata.
    pub fn create<T: KubeObject + HasTypeMeta + Default>(&self) -> T {
        let descriptor = self.descriptor_for::<T>();
        let mut object = T::default();
        if descriptor.has_type_meta() {
            *object.type_meta_mut() = TypeMeta {
                kind: Some(descriptor.kind().to_owned()),
                api_version: Some(descriptor.api_version().to_owned()),
            };
        }
        object
    }
}
