//! Fully resolved connection profiles.

use std::fmt;

use url::Url;

use crate::{
    config::{CaCertificate, ClientCertificate, Context, KubeConfig},
    error::{Error, Result},
};

mod pod;
pub use pod::*;
mod set;
pub use set::*;

/// Namespace used when callers have no preference.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Everything needed to reach and authenticate against one API server.
///
/// Profiles are immutable once built and can be shared freely between threads.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    endpoint: Url,
    namespace: String,
    context_namespace: Option<String>,
    client_certificate: Option<ClientCertificate>,
    ca_certificate: Option<CaCertificate>,
    bearer_token: Option<String>,
    allow_insecure: bool,
}

/// The credential a transport should present first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ClientCertificate,
    BearerToken,
    None,
}

impl ConnectionProfile {
    /// A profile with no credentials.
    pub fn new(endpoint: Url, namespace: impl Into<String>) -> Result<Self> {
        let namespace = validate_namespace(namespace.into())?;
        validate_endpoint(&endpoint)?;
        Ok(Self {
            endpoint,
            namespace,
            context_namespace: None,
            client_certificate: None,
            ca_certificate: None,
            bearer_token: None,
            allow_insecure: false,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_client_certificate(mut self, certificate: ClientCertificate) -> Self {
        self.client_certificate = Some(certificate);
        self
    }

    pub fn with_ca_certificate(mut self, certificate: CaCertificate) -> Self {
        self.ca_certificate = Some(certificate);
        self
    }

    pub fn with_context_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.context_namespace = Some(namespace.into());
        self
    }

    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    /// Resolves `context`, or the document's current context, into a profile.
    ///
    /// A blank `context` counts as not given.
    ///
    /// `default_namespace` becomes the profile namespace. The context's own
    /// namespace is kept in [`context_namespace`](Self::context_namespace).
    pub fn from_kube_config(
        config: &KubeConfig,
        context: Option<&str>,
        default_namespace: &str,
    ) -> Result<Self> {
        let name = context
            .filter(|name| !name.trim().is_empty())
            .or_else(|| config.current_context())
            .ok_or(Error::MissingContext)?;
        let context = config
            .context(name)
            .ok_or_else(|| Error::UnknownContext(name.to_owned()))?;
        Self::from_context(config, context, default_namespace)
    }

    /// Resolves one context of `config`.
    pub fn from_context(
        config: &KubeConfig,
        context: &Context,
        default_namespace: &str,
    ) -> Result<Self> {
        log::debug!("resolving kube config context '{}'", context.name);

        let cluster = config
            .cluster(&context.cluster)
            .ok_or_else(|| Error::UnknownCluster {
                context: context.name.clone(),
                cluster: context.cluster.clone(),
            })?;
        let user = config.user(&context.user).ok_or_else(|| Error::UnknownUser {
            context: context.name.clone(),
            user: context.user.clone(),
        })?;

        let base_dir = config.base_dir();
        let mut profile = Self::new(cluster.server.clone(), default_namespace)?;
        profile.context_namespace = context.namespace.clone();
        profile.client_certificate = user.resolve_client_certificate(base_dir)?;
        profile.ca_certificate = cluster.resolve_ca_certificate(base_dir)?;
        profile.bearer_token = user.resolve_bearer_token(base_dir)?;
        profile.allow_insecure = cluster.insecure_skip_tls_verify;

        if profile.allow_insecure {
            log::warn!(
                "context '{}' disables TLS verification for {}",
                context.name,
                profile.endpoint
            );
        }
        Ok(profile)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The namespace requests default to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The namespace declared by the source context or pod, if any.
    pub fn context_namespace(&self) -> Option<&str> {
        self.context_namespace.as_deref()
    }

    pub fn client_certificate(&self) -> Option<&ClientCertificate> {
        self.client_certificate.as_ref()
    }

    pub fn ca_certificate(&self) -> Option<&CaCertificate> {
        self.ca_certificate.as_ref()
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn is_insecure_allowed(&self) -> bool {
        self.allow_insecure
    }

    /// A client certificate dominates a bearer token when both are present.
    pub fn credential_kind(&self) -> CredentialKind {
        if self.client_certificate.is_some() {
            CredentialKind::ClientCertificate
        } else if self.bearer_token.is_some() {
            CredentialKind::BearerToken
        } else {
            CredentialKind::None
        }
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("endpoint", &self.endpoint.as_str())
            .field("namespace", &self.namespace)
            .field("context_namespace", &self.context_namespace)
            .field("client_certificate", &self.client_certificate)
            .field("ca_certificate", &self.ca_certificate.is_some())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("allow_insecure", &self.allow_insecure)
            .finish()
    }
}

/// Resolves every context of `config` lazily, in document order.
///
/// Each item is independent; dropping the iterator early stops the batch.
pub fn resolve_each<'a>(
    config: &'a KubeConfig,
    default_namespace: &'a str,
) -> impl Iterator<Item = (&'a str, Result<ConnectionProfile>)> + 'a {
    config.contexts().iter().map(move |context| {
        let profile = ConnectionProfile::from_context(config, context, default_namespace);
        (context.name.as_str(), profile)
    })
}

/// Outcome of resolving every context of a document.
#[derive(Debug, Default)]
pub struct BulkResolution {
    pub resolved: Vec<(String, ConnectionProfile)>,
    pub failed: Vec<(String, Error)>,
}

/// Resolves every context; failures are collected per context, never aborting the batch.
pub fn resolve_all(config: &KubeConfig, default_namespace: &str) -> BulkResolution {
    let mut bulk = BulkResolution::default();
    for (name, profile) in resolve_each(config, default_namespace) {
        match profile {
            Ok(profile) => bulk.resolved.push((name.to_owned(), profile)),
            Err(err) => {
                log::warn!("skipping kube config context '{name}': {err}");
                bulk.failed.push((name.to_owned(), err));
            }
        }
    }
    bulk
}

fn validate_namespace(namespace: String) -> Result<String> {
    if namespace.trim().is_empty() {
        return Err(Error::InvalidNamespace(namespace));
    }
    Ok(namespace)
}

fn validate_endpoint(endpoint: &Url) -> Result<()> {
    match endpoint.scheme() {
        "http" | "https" if endpoint.has_host() => Ok(()),
        "http" | "https" => Err(Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "missing host".into(),
        }),
        scheme => Err(Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}
