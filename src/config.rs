//! Kube config documents.
//!
//! A [`KubeConfig`] holds the named clusters, users and contexts of a
//! kubeconfig file. References between them are kept as names and are only
//! resolved when a [`ConnectionProfile`](crate::ConnectionProfile) is built,
//! so a document with some broken contexts still loads and its valid
//! contexts still resolve.

use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

mod credentials;
pub use credentials::*;

/// Environment variable listing kube config files, `:`-separated (`;` on Windows).
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// A parsed kube config document.
///
/// The document is immutable; loading the same file again produces an
/// independent value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeConfig {
    clusters: Vec<ClusterEntry>,
    users: Vec<UserIdentity>,
    contexts: Vec<Context>,
    current_context: Option<String>,
    base_dir: Option<PathBuf>,
}

/// A named API endpoint and its trust material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEntry {
    pub name: String,
    pub server: Url,
    pub certificate_authority: Material,
    pub insecure_skip_tls_verify: bool,
}

/// A named credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub name: String,
    pub client_certificate: Material,
    pub client_key: Material,
    /// `token` is the inline form, `tokenFile` the file form.
    pub token: Material,
    /// Exec credential plugins are recognised but never executed.
    pub exec: Option<ExecConfig>,
}

/// A named pairing of a cluster and a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
}

/// An exec credential plugin declaration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub api_version: Option<String>,
}

/// Credential material supplied inline, through a file, or both.
///
/// Inline data wins when both are present. Relative file paths are read
/// relative to the directory of the kube config file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Material {
    pub data: Option<String>,
    pub file: Option<PathBuf>,
}

impl Material {
    fn new(data: Option<String>, file: Option<String>) -> Self {
        Self {
            data: data.filter(|data| !data.trim().is_empty()),
            file: file.filter(|file| !file.trim().is_empty()).map(PathBuf::from),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.file.is_none()
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("data", &self.data.as_ref().map(|_| "<redacted>"))
            .field("file", &self.file)
            .finish()
    }
}

impl KubeConfig {
    /// Reads and parses the kube config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let base_dir = path.parent().map(Path::to_path_buf);
        log::debug!("loading kube config from {}", path.display());
        Self::from_yaml(&text, base_dir)
    }

    /// Loads the file named by [`default_path`](Self::default_path).
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path().ok_or_else(|| {
            Error::ConfigParse("cannot determine the home directory for ~/.kube/config".into())
        })?;
        Self::load(path)
    }

    /// The first entry of `KUBECONFIG`, or `~/.kube/config`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(paths) = env::var_os(KUBECONFIG_ENV) {
            if let Some(first) = env::split_paths(&paths).find(|path| !path.as_os_str().is_empty()) {
                return Some(first);
            }
        }
        dirs::home_dir().map(|home| home.join(".kube").join("config"))
    }

    /// Parses a document held in memory.
    ///
    /// `base_dir` anchors relative credential file references; `None` leaves
    /// them relative to the working directory. JSON documents are accepted.
    pub fn from_yaml(text: &str, base_dir: Option<PathBuf>) -> Result<Self> {
        let raw: RawKubeConfig =
            serde_yaml::from_str(text).map_err(|err| Error::ConfigParse(err.to_string()))?;

        let clusters = raw
            .clusters
            .unwrap_or_default()
            .into_iter()
            .map(RawNamedCluster::into_entry)
            .collect::<Result<Vec<_>>>()?;
        let users = raw
            .users
            .unwrap_or_default()
            .into_iter()
            .map(RawNamedUser::into_identity)
            .collect();
        let contexts = raw
            .contexts
            .unwrap_or_default()
            .into_iter()
            .map(RawNamedContext::into_context)
            .collect();

        Ok(Self {
            clusters,
            users,
            contexts,
            current_context: raw.current_context.filter(|name| !name.is_empty()),
            base_dir,
        })
    }

    pub fn clusters(&self) -> &[ClusterEntry] {
        &self.clusters
    }

    pub fn users(&self) -> &[UserIdentity] {
        &self.users
    }

    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    pub fn current_context(&self) -> Option<&str> {
        self.current_context.as_deref()
    }

    /// Directory that relative credential file paths are read from.
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn cluster(&self, name: &str) -> Option<&ClusterEntry> {
        self.clusters.iter().find(|cluster| cluster.name == name)
    }

    pub fn user(&self, name: &str) -> Option<&UserIdentity> {
        self.users.iter().find(|user| user.name == name)
    }

    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|context| context.name == name)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawKubeConfig {
    clusters: Option<Vec<RawNamedCluster>>,
    users: Option<Vec<RawNamedUser>>,
    contexts: Option<Vec<RawNamedContext>>,
    current_context: Option<String>,
}

#[derive(Deserialize)]
struct RawNamedCluster {
    name: String,
    cluster: Option<RawCluster>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawCluster {
    server: Option<String>,
    certificate_authority: Option<String>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

impl RawNamedCluster {
    fn into_entry(self) -> Result<ClusterEntry> {
        let name = self.name;
        let cluster = self
            .cluster
            .ok_or_else(|| Error::ConfigParse(format!("cluster '{name}' has no cluster section")))?;
        let server = cluster
            .server
            .ok_or_else(|| Error::ConfigParse(format!("cluster '{name}' has no server")))?;
        let server = Url::parse(&server).map_err(|err| {
            Error::ConfigParse(format!("cluster '{name}' has malformed server '{server}': {err}"))
        })?;

        Ok(ClusterEntry {
            name,
            server,
            certificate_authority: Material::new(
                cluster.certificate_authority_data,
                cluster.certificate_authority,
            ),
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        })
    }
}

#[derive(Deserialize)]
struct RawNamedUser {
    name: String,
    #[serde(default)]
    user: RawUser,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawUser {
    client_certificate: Option<String>,
    client_certificate_data: Option<String>,
    client_key: Option<String>,
    client_key_data: Option<String>,
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<String>,
    exec: Option<ExecConfig>,
}

impl RawNamedUser {
    fn into_identity(self) -> UserIdentity {
        let user = self.user;
        UserIdentity {
            name: self.name,
            client_certificate: Material::new(
                user.client_certificate_data,
                user.client_certificate,
            ),
            client_key: Material::new(user.client_key_data, user.client_key),
            token: Material::new(user.token, user.token_file),
            exec: user.exec,
        }
    }
}

#[derive(Deserialize)]
struct RawNamedContext {
    name: String,
    context: RawContext,
}

#[derive(Deserialize)]
struct RawContext {
    cluster: String,
    user: String,
    namespace: Option<String>,
}

impl RawNamedContext {
    fn into_context(self) -> Context {
        Context {
            name: self.name,
            cluster: self.context.cluster,
            user: self.context.user,
            namespace: self.context.namespace.filter(|ns| !ns.is_empty()),
        }
    }
}
