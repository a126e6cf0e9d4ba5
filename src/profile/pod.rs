use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use url::Url;

use super::ConnectionProfile;
use crate::{
    config::{ClusterEntry, KubeConfig, Material},
    error::{Error, Result},
};

/// Where the kubelet mounts the pod service account.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
pub const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
pub const SERVICE_PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

/// Inputs for building a profile from the pod's service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIdentity {
    pub token_path: PathBuf,
    pub ca_path: PathBuf,
    pub namespace_path: PathBuf,
    pub host: Option<String>,
    pub port: Option<String>,
}

impl PodIdentity {
    /// Well-known service account paths and the `KUBERNETES_SERVICE_*` variables.
    pub fn from_env() -> Self {
        Self::in_dir(SERVICE_ACCOUNT_DIR)
            .with_endpoint(env::var(SERVICE_HOST_ENV).ok(), env::var(SERVICE_PORT_ENV).ok())
    }

    /// Service account files under `dir`, with no endpoint yet.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            token_path: dir.join("token"),
            ca_path: dir.join("ca.crt"),
            namespace_path: dir.join("namespace"),
            host: None,
            port: None,
        }
    }

    pub fn with_endpoint(mut self, host: Option<String>, port: Option<String>) -> Self {
        self.host = host;
        self.port = port;
        self
    }

    /// Builds the profile, failing with
    /// [`Error::AmbientIdentityUnavailable`] when any input is absent.
    pub fn resolve(&self, default_namespace: &str) -> Result<ConnectionProfile> {
        let unset = |var: &str| Error::AmbientIdentityUnavailable(format!("{var} is not set"));
        let host = non_empty(self.host.as_deref()).ok_or_else(|| unset(SERVICE_HOST_ENV))?;
        let port = non_empty(self.port.as_deref()).ok_or_else(|| unset(SERVICE_PORT_ENV))?;
        let endpoint = endpoint(host, port)?;

        let token = read_required(&self.token_path)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::AmbientIdentityUnavailable(format!(
                "{} is empty",
                self.token_path.display()
            )));
        }
        if !self.ca_path.is_file() {
            return Err(Error::AmbientIdentityUnavailable(format!(
                "{} does not exist",
                self.ca_path.display()
            )));
        }

        let cluster = ClusterEntry {
            name: "in-cluster".into(),
            server: endpoint.clone(),
            certificate_authority: Material {
                data: None,
                file: Some(self.ca_path.clone()),
            },
            insecure_skip_tls_verify: false,
        };
        let ca = cluster.resolve_ca_certificate(None)?;

        let mut profile =
            ConnectionProfile::new(endpoint, default_namespace)?.with_bearer_token(token);
        if let Some(ca) = ca {
            profile = profile.with_ca_certificate(ca);
        }
        if let Ok(namespace) = fs::read_to_string(&self.namespace_path) {
            if let Some(namespace) = non_empty(Some(namespace.trim())) {
                profile = profile.with_context_namespace(namespace);
            }
        }

        log::debug!("resolved pod service account profile for {}", profile.endpoint());
        Ok(profile)
    }
}

impl ConnectionProfile {
    /// Profile for the pod's own service account, see [`PodIdentity::from_env`].
    pub fn from_pod_service_account(default_namespace: &str) -> Result<Self> {
        PodIdentity::from_env().resolve(default_namespace)
    }

    /// Uses the pod service account when running in a cluster, otherwise the
    /// current context of the default kube config.
    pub fn infer(default_namespace: &str) -> Result<Self> {
        match Self::from_pod_service_account(default_namespace) {
            Err(err) if err.is_ambient_unavailable() => {
                log::debug!("{err}; falling back to kube config");
                let config = KubeConfig::load_default()?;
                Self::from_kube_config(&config, None, default_namespace)
            }
            result => result,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn endpoint(host: &str, port: &str) -> Result<Url> {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };
    let raw = format!("https://{host}:{port}");
    Url::parse(&raw).map_err(|err| Error::InvalidEndpoint {
        endpoint: raw,
        reason: err.to_string(),
    })
}

fn read_required(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => {
            Error::AmbientIdentityUnavailable(format!("{} does not exist", path.display()))
        }
        _ => Error::AmbientIdentityUnavailable(format!("{}: {err}", path.display())),
    })
}
