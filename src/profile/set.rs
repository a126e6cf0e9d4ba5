use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use super::{resolve_all, ConnectionProfile, PodIdentity};
use crate::{
    config::KubeConfig,
    error::{Error, Result},
};

/// Named connection profiles shared by the whole process.
///
/// Profiles can be registered from any thread; lookups hand out cheap
/// [`Arc`] clones.
#[derive(Debug, Default)]
pub struct ProfileSet {
    profiles: RwLock<BTreeMap<String, Arc<ConnectionProfile>>>,
}

impl ProfileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one profile per resolvable context of `config`, named after the context.
    ///
    /// Contexts that fail to resolve are skipped and returned.
    pub fn from_kube_config(
        config: &KubeConfig,
        default_namespace: &str,
    ) -> (Self, Vec<(String, Error)>) {
        let set = Self::new();
        let bulk = resolve_all(config, default_namespace);
        for (name, profile) in bulk.resolved {
            set.insert(name, profile);
        }
        (set, bulk.failed)
    }

    /// Registers the pod service account profile under `name`.
    pub fn insert_pod_identity(
        &self,
        name: impl Into<String>,
        identity: &PodIdentity,
        default_namespace: &str,
    ) -> Result<Arc<ConnectionProfile>> {
        let profile = Arc::new(identity.resolve(default_namespace)?);
        self.profiles.write().insert(name.into(), Arc::clone(&profile));
        Ok(profile)
    }

    /// Registers `profile`, returning the one previously held under `name`.
    pub fn insert(
        &self,
        name: impl Into<String>,
        profile: ConnectionProfile,
    ) -> Option<Arc<ConnectionProfile>> {
        let name = name.into();
        log::debug!("registering connection profile '{name}'");
        self.profiles.write().insert(name, Arc::new(profile))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ConnectionProfile>> {
        self.profiles.read().get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}
