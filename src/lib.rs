//! kube-typed-client is the connection and routing layer of a typed
//! Kubernetes API client.
//!
//! It resolves where and how to connect, either from a kubeconfig document
//! ([`KubeConfig`]) or from the service account mounted into a pod
//! ([`PodIdentity`]), into a [`ConnectionProfile`].
//! Resource types declare their kind, API version and URL templates through
//! [`KubeObject`]; a [`RequestRouter`] turns a typed operation into a
//! concrete [`RequestTarget`] against a profile.
//! Watch responses are decoded into a stream of [`WatchEvent`]s by
//! [`decode_watch`].
//!
//! Sending requests is left to the HTTP stack of the caller's choice.

pub mod config;
pub use config::KubeConfig;
pub mod error;
pub use error::{Error, Result};
pub mod profile;
pub use profile::{ConnectionProfile, PodIdentity, ProfileSet, DEFAULT_NAMESPACE};
pub mod resource;
pub use resource::{KubeObject, OperationKind, ResourceDescriptor, ResourceRegistry};
pub mod router;
pub use router::{PathParams, RequestRouter, RequestTarget};
pub mod watch;
pub use watch::{decode_watch, decode_watch_chunks, WatchEvent};
