//! Routing declarations for the `k8s-openapi` built-in resource types.

use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, Job},
        coordination::v1::Lease,
        core::v1::{
            ConfigMap, Endpoints, Event, Namespace, Node, PersistentVolume,
            PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount,
        },
        networking::v1::{Ingress, NetworkPolicy},
        rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
        storage::v1::StorageClass,
    },
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    ClusterResourceScope, NamespaceResourceScope, Resource,
};

use super::{ApiRoute, DeclaredType, KubeObject, OperationKind::*};

/// Scopes the standard route set can be derived for.
pub trait RouteScope {
    const NAMESPACED: bool;
}

impl RouteScope for NamespaceResourceScope {
    const NAMESPACED: bool = true;
}

impl RouteScope for ClusterResourceScope {
    const NAMESPACED: bool = false;
}

/// The declared kind and API version of a `k8s-openapi` type.
pub fn openapi_declared_type<K: Resource>() -> DeclaredType {
    DeclaredType {
        kind: K::KIND,
        api_version: K::API_VERSION,
    }
}

/// The standard REST routes the API server exposes for `K`.
///
/// Namespaced resources are listable and watchable across all namespaces
/// as well as within one.
pub fn openapi_routes<K>() -> Vec<ApiRoute>
where
    K: Resource,
    K::Scope: RouteScope,
{
    let prefix = if K::GROUP.is_empty() {
        format!("api/{}", K::VERSION)
    } else {
        format!("apis/{}/{}", K::GROUP, K::VERSION)
    };
    let plural = K::URL_PATH_SEGMENT;

    if <K::Scope as RouteScope>::NAMESPACED {
        vec![
            ApiRoute::new(format!("{prefix}/{plural}"), &[List]),
            ApiRoute::new(format!("{prefix}/watch/{plural}"), &[WatchList]),
            ApiRoute::new(
                format!("{prefix}/namespaces/{{namespace}}/{plural}"),
                &[Create, DeleteCollection, List],
            ),
            ApiRoute::new(
                format!("{prefix}/namespaces/{{namespace}}/{plural}/{{name}}"),
                &[Delete, Get, Patch, Update],
            ),
            ApiRoute::new(
                format!("{prefix}/namespaces/{{namespace}}/{plural}/{{name}}/{{subresource}}"),
                &[Get, Patch, Update],
            ),
            ApiRoute::new(
                format!("{prefix}/watch/namespaces/{{namespace}}/{plural}"),
                &[WatchList],
            ),
            ApiRoute::new(
                format!("{prefix}/watch/namespaces/{{namespace}}/{plural}/{{name}}"),
                &[Watch],
            ),
        ]
    } else {
        vec![
            ApiRoute::new(format!("{prefix}/{plural}"), &[Create, DeleteCollection, List]),
            ApiRoute::new(
                format!("{prefix}/{plural}/{{name}}"),
                &[Delete, Get, Patch, Update],
            ),
            ApiRoute::new(
                format!("{prefix}/{plural}/{{name}}/{{subresource}}"),
                &[Get, Patch, Update],
            ),
            ApiRoute::new(format!("{prefix}/watch/{plural}"), &[WatchList]),
            ApiRoute::new(format!("{prefix}/watch/{plural}/{{name}}"), &[Watch]),
        ]
    }
}

macro_rules! openapi_objects {
    ($($ty:ty),* $(,)?) => {
        $(
            impl KubeObject for $ty {
                fn declared_type() -> Option<DeclaredType> {
                    Some(openapi_declared_type::<Self>())
                }

                fn api_routes() -> Vec<ApiRoute> {
                    openapi_routes::<Self>()
                }
            }
        )*
    };
}

openapi_objects!(
    ConfigMap,
    Endpoints,
    Event,
    Namespace,
    Node,
    PersistentVolume,
    PersistentVolumeClaim,
    Pod,
    Secret,
    Service,
    ServiceAccount,
    DaemonSet,
    Deployment,
    ReplicaSet,
    StatefulSet,
    CronJob,
    Job,
    Lease,
    Ingress,
    NetworkPolicy,
    ClusterRole,
    ClusterRoleBinding,
    Role,
    RoleBinding,
    StorageClass,
    CustomResourceDefinition,
);
