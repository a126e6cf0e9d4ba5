//! Turns typed operations into concrete request targets.

use std::{any::type_name, collections::BTreeMap, sync::Arc};

use url::Url;

use crate::{
    error::{Error, Result},
    profile::ConnectionProfile,
    resource::{KubeObject, OperationKind, ResourceDescriptor, ResourceRegistry, UrlTemplate},
};

pub const NAMESPACE_PARAM: &str = "namespace";
pub const NAME_PARAM: &str = "name";
pub const SUBRESOURCE_PARAM: &str = "subresource";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// How a patch body is interpreted by the API server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PatchStrategy {
    /// RFC 6902 JSON patch.
    Json,
    /// RFC 7386 JSON merge patch.
    Merge,
    #[default]
    StrategicMerge,
    /// Server-side apply.
    Apply,
}

impl PatchStrategy {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json-patch+json",
            Self::Merge => "application/merge-patch+json",
            Self::StrategicMerge => "application/strategic-merge-patch+json",
            Self::Apply => "application/apply-patch+yaml",
        }
    }
}

/// Values for template placeholders plus optional query parameters.
///
/// Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    values: BTreeMap<String, String>,
    query: Vec<(String, String)>,
    patch_strategy: Option<PatchStrategy>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(self, namespace: impl Into<String>) -> Self {
        self.param(NAMESPACE_PARAM, namespace)
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.param(NAME_PARAM, name)
    }

    pub fn subresource(self, subresource: impl Into<String>) -> Self {
        self.param(SUBRESOURCE_PARAM, subresource)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Appends a query parameter, e.g. `resourceVersion` to resume a watch.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Overrides [`PatchStrategy::default`] for patch requests.
    pub fn patch_strategy(mut self, strategy: PatchStrategy) -> Self {
        self.patch_strategy = Some(strategy);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// A fully built request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub url: Url,
    pub verb: HttpVerb,
    /// The response is a stream of watch events.
    pub streaming: bool,
    /// Set for patch requests only.
    pub patch_strategy: Option<PatchStrategy>,
}

impl RequestTarget {
    /// Content type of the request body, if the operation sends one.
    pub fn content_type(&self) -> Option<&'static str> {
        match (self.verb, self.patch_strategy) {
            (HttpVerb::Patch, Some(strategy)) => Some(strategy.content_type()),
            (HttpVerb::Post | HttpVerb::Put, _) => Some("application/json"),
            _ => None,
        }
    }
}

/// Transport verb and streaming flag of `operation`.
pub fn request_semantics(operation: OperationKind) -> (HttpVerb, bool) {
    use OperationKind::*;

    let verb = match operation {
        Get | List | Watch | WatchList => HttpVerb::Get,
        Create => HttpVerb::Post,
        Update => HttpVerb::Put,
        Patch => HttpVerb::Patch,
        Delete | DeleteCollection => HttpVerb::Delete,
    };
    (verb, operation.is_streaming())
}

/// Builds request targets from the descriptors of a shared [`ResourceRegistry`].
#[derive(Debug, Clone, Default)]
pub struct RequestRouter {
    registry: Arc<ResourceRegistry>,
}

impl RequestRouter {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn build_request<T: KubeObject>(
        &self,
        profile: &ConnectionProfile,
        operation: OperationKind,
        params: &PathParams,
    ) -> Result<RequestTarget> {
        let descriptor = self.registry.descriptor_for::<T>();
        build_request(&descriptor, profile, operation, params).map_err(|err| match err {
            Error::UnsupportedOperation { kind, operation } if kind.is_empty() => {
                Error::UnsupportedOperation {
                    kind: type_name::<T>().to_owned(),
                    operation,
                }
            }
            err => err,
        })
    }
}

/// Selects the most specific template of `descriptor` that `params` can fill
/// and expands it against the profile endpoint.
pub fn build_request(
    descriptor: &ResourceDescriptor,
    profile: &ConnectionProfile,
    operation: OperationKind,
    params: &PathParams,
) -> Result<RequestTarget> {
    let lookup = |key: &str| params.get(key);
    let template = select_template(descriptor.templates(operation), lookup).ok_or_else(|| {
        Error::UnsupportedOperation {
            kind: descriptor.kind().to_owned(),
            operation,
        }
    })?;
    // `.` and `..` would be dropped from the path, widening the target
    for param in template.params() {
        if let Some(value @ ("." | "..")) = lookup(param) {
            return Err(Error::InvalidPathParam {
                param: param.clone(),
                value: value.to_owned(),
            });
        }
    }
    let segments = template
        .expand(lookup)
        .ok_or_else(|| Error::UnsupportedOperation {
            kind: descriptor.kind().to_owned(),
            operation,
        })?;

    let mut url = profile.endpoint().clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| Error::InvalidEndpoint {
            endpoint: profile.endpoint().to_string(),
            reason: "endpoint cannot carry a path".into(),
        })?
        .pop_if_empty()
        .extend(&segments);
    if !params.query.is_empty() {
        url.query_pairs_mut().extend_pairs(&params.query);
    }

    let (verb, streaming) = request_semantics(operation);
    let patch_strategy = (operation == OperationKind::Patch)
        .then(|| params.patch_strategy.unwrap_or_default());

    log::debug!("{} {} ({:?} {})", verb.as_str(), url, operation, descriptor.kind());
    Ok(RequestTarget {
        url,
        verb,
        streaming,
        patch_strategy,
    })
}

fn select_template<'t, 'a>(
    templates: &'t [UrlTemplate],
    lookup: impl Fn(&str) -> Option<&'a str> + Copy,
) -> Option<&'t UrlTemplate> {
    let mut best: Option<&UrlTemplate> = None;
    for template in templates {
        if !template.is_satisfied_by(lookup) {
            continue;
        }
        // earlier declarations win ties
        if best.map_or(true, |best| template.params().len() > best.params().len()) {
            best = Some(template);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::{core::v1::Pod, rbac::v1::ClusterRole};

    use super::*;
    use crate::resource::{ApiRoute, DeclaredType};

    fn profile(endpoint: &str) -> ConnectionProfile {
        ConnectionProfile::new(endpoint.parse().unwrap(), "default").unwrap()
    }

    fn router() -> RequestRouter {
        RequestRouter::new(Arc::new(ResourceRegistry::new()))
    }

    struct Legacy;

    impl KubeObject for Legacy {
        fn declared_type() -> Option<DeclaredType> {
            Some(DeclaredType {
                kind: "RoleBinding",
                api_version: "rbac.authorization.k8s.io/v1beta1",
            })
        }

        fn api_routes() -> Vec<ApiRoute> {
            use OperationKind::*;
            vec![
                ApiRoute::new("apis/rbac.authorization.k8s.io/v1beta1/rolebindings", &[List]),
                ApiRoute::new("apis/rbac.authorization.k8s.io/v1beta1/watch/rolebindings", &[WatchList]),
                ApiRoute::new(
                    "apis/rbac.authorization.k8s.io/v1beta1/namespaces/{namespace}/rolebindings",
                    &[Create, DeleteCollection, List],
                ),
                ApiRoute::new(
                    "apis/rbac.authorization.k8s.io/v1beta1/namespaces/{namespace}/rolebindings/{name}",
                    &[Delete, Get, Patch, Update],
                ),
            ]
        }
    }

    struct Opaque;
    impl KubeObject for Opaque {}

    #[test]
    fn namespace_required_operations_fail_without_one() {
        let err = router()
            .build_request::<Pod>(&profile("https://10.0.0.1:6443"), OperationKind::Create, &PathParams::new())
            .unwrap_err();
        match err {
            Error::UnsupportedOperation { kind, operation } => {
                assert_eq!(kind, "Pod");
                assert_eq!(operation, OperationKind::Create);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn substitutes_namespace_without_leftover_placeholders() {
        let target = router()
            .build_request::<Pod>(
                &profile("https://10.0.0.1:6443"),
                OperationKind::Create,
                &PathParams::new().namespace("kube-system"),
            )
            .unwrap();
        assert_eq!(
            target.url.as_str(),
            "https://10.0.0.1:6443/api/v1/namespaces/kube-system/pods"
        );
        assert!(!target.url.as_str().contains('{'));
        assert_eq!(target.verb, HttpVerb::Post);
        assert!(!target.streaming);
        assert_eq!(target.content_type(), Some("application/json"));
    }

    #[test]
    fn most_specific_template_wins() {
        let router = router();
        let endpoint = profile("https://10.0.0.1:6443");

        let all = router
            .build_request::<Pod>(&endpoint, OperationKind::List, &PathParams::new())
            .unwrap();
        assert_eq!(all.url.path(), "/api/v1/pods");

        let scoped = router
            .build_request::<Pod>(&endpoint, OperationKind::List, &PathParams::new().namespace("web"))
            .unwrap();
        assert_eq!(scoped.url.path(), "/api/v1/namespaces/web/pods");

        let status = router
            .build_request::<Pod>(
                &endpoint,
                OperationKind::Get,
                &PathParams::new().namespace("web").name("api-0").subresource("status"),
            )
            .unwrap();
        assert_eq!(status.url.path(), "/api/v1/namespaces/web/pods/api-0/status");
    }

    #[test]
    fn values_are_escaped_as_path_segments() {
        let target = router()
            .build_request::<Pod>(
                &profile("https://10.0.0.1:6443"),
                OperationKind::Get,
                &PathParams::new().namespace("a/b").name("x y?"),
            )
            .unwrap();
        assert_eq!(target.url.path(), "/api/v1/namespaces/a%2Fb/pods/x%20y%3F");
    }

    #[test]
    fn dot_segments_are_rejected() {
        let profile = profile("https://10.0.0.1:6443");
        for operation in [OperationKind::Delete, OperationKind::Get] {
            for value in [".", ".."] {
                let params = PathParams::new().namespace("default").name(value);
                match router().build_request::<Pod>(&profile, operation, &params) {
                    Err(Error::InvalidPathParam { param, value: rejected }) => {
                        assert_eq!(param, NAME_PARAM);
                        assert_eq!(rejected, value);
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
        }

        let params = PathParams::new().namespace("..");
        assert!(matches!(
            router().build_request::<Pod>(&profile, OperationKind::List, &params),
            Err(Error::InvalidPathParam { .. })
        ));

        let params = PathParams::new().namespace("default").name("..web");
        let target = router()
            .build_request::<Pod>(&profile, OperationKind::Delete, &params)
            .unwrap();
        assert_eq!(target.url.path(), "/api/v1/namespaces/default/pods/..web");
    }

    #[test]
    fn endpoint_paths_are_preserved() {
        let target = router()
            .build_request::<ClusterRole>(
                &profile("https://rancher.example.com/k8s/clusters/c-1/"),
                OperationKind::Get,
                &PathParams::new().name("admin"),
            )
            .unwrap();
        assert_eq!(
            target.url.as_str(),
            "https://rancher.example.com/k8s/clusters/c-1/apis/rbac.authorization.k8s.io/v1/clusterroles/admin"
        );
    }

    #[test]
    fn watches_stream_and_carry_query_parameters() {
        let target = router()
            .build_request::<Pod>(
                &profile("https://10.0.0.1:6443"),
                OperationKind::WatchList,
                &PathParams::new()
                    .namespace("default")
                    .query("resourceVersion", "1042")
                    .query("labelSelector", "app=web"),
            )
            .unwrap();
        assert_eq!(target.verb, HttpVerb::Get);
        assert!(target.streaming);
        assert_eq!(
            target.url.as_str(),
            "https://10.0.0.1:6443/api/v1/watch/namespaces/default/pods?resourceVersion=1042&labelSelector=app%3Dweb"
        );
    }

    #[test]
    fn patches_carry_a_strategy() {
        let router = router();
        let endpoint = profile("https://10.0.0.1:6443");
        let params = PathParams::new().namespace("default").name("web");

        let target = router
            .build_request::<Pod>(&endpoint, OperationKind::Patch, &params)
            .unwrap();
        assert_eq!(target.verb, HttpVerb::Patch);
        assert_eq!(target.patch_strategy, Some(PatchStrategy::StrategicMerge));

        let target = router
            .build_request::<Pod>(
                &endpoint,
                OperationKind::Patch,
                &params.clone().patch_strategy(PatchStrategy::Merge),
            )
            .unwrap();
        assert_eq!(target.content_type(), Some("application/merge-patch+json"));

        let target = router
            .build_request::<Pod>(&endpoint, OperationKind::Delete, &params)
            .unwrap();
        assert_eq!(target.verb, HttpVerb::Delete);
        assert_eq!(target.patch_strategy, None);
        assert_eq!(target.content_type(), None);
    }

    #[test]
    fn custom_declarations_route_like_builtins() {
        let target = router()
            .build_request::<Legacy>(
                &profile("https://10.0.0.1:6443"),
                OperationKind::Update,
                &PathParams::new().namespace("ops").name("viewers"),
            )
            .unwrap();
        assert_eq!(
            target.url.path(),
            "/apis/rbac.authorization.k8s.io/v1beta1/namespaces/ops/rolebindings/viewers"
        );
        assert_eq!(target.verb, HttpVerb::Put);

        let unsupported = router().build_request::<Legacy>(
            &profile("https://10.0.0.1:6443"),
            OperationKind::Watch,
            &PathParams::new().namespace("ops").name("viewers"),
        );
        assert!(matches!(unsupported, Err(Error::UnsupportedOperation { .. })));
    }

    #[test]
    fn undeclared_types_are_reported_by_type_name() {
        let err = router()
            .build_request::<Opaque>(&profile("https://10.0.0.1:6443"), OperationKind::Get, &PathParams::new())
            .unwrap_err();
        match err {
            Error::UnsupportedOperation { kind, .. } => assert!(kind.ends_with("Opaque"), "{kind}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_values_count_as_absent() {
        let params = PathParams::new().namespace("");
        assert_eq!(params.get(NAMESPACE_PARAM), None);
        let target = router()
            .build_request::<Pod>(&profile("https://10.0.0.1:6443"), OperationKind::List, &params)
            .unwrap();
        assert_eq!(target.url.path(), "/api/v1/pods");
    }

    #[test]
    fn verbs_follow_operations() {
        use OperationKind::*;
        assert_eq!(request_semantics(Get), (HttpVerb::Get, false));
        assert_eq!(request_semantics(List), (HttpVerb::Get, false));
        assert_eq!(request_semantics(Watch), (HttpVerb::Get, true));
        assert_eq!(request_semantics(WatchList), (HttpVerb::Get, true));
        assert_eq!(request_semantics(Create), (HttpVerb::Post, false));
        assert_eq!(request_semantics(Update), (HttpVerb::Put, false));
        assert_eq!(request_semantics(Patch), (HttpVerb::Patch, false));
        assert_eq!(request_semantics(Delete), (HttpVerb::Delete, false));
        assert_eq!(request_semantics(DeleteCollection), (HttpVerb::Delete, false));
    }
}
