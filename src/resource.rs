//! Resource routing metadata.
//!
//! Each resource type declares its kind, API version and the URL templates
//! serving each [`OperationKind`] by implementing [`KubeObject`]. The
//! [`ResourceRegistry`] turns those declarations into memoized
//! [`ResourceDescriptor`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod builtin;
pub use builtin::*;
mod registry;
pub use registry::*;
mod template;
pub use template::*;

/// Operations a resource can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    Get,
    List,
    /// Watch a single named object.
    Watch,
    /// Watch a collection.
    WatchList,
    Create,
    Update,
    Patch,
    Delete,
    DeleteCollection,
}

impl OperationKind {
    pub const ALL: [Self; 9] = [
        Self::Get,
        Self::List,
        Self::Watch,
        Self::WatchList,
        Self::Create,
        Self::Update,
        Self::Patch,
        Self::Delete,
        Self::DeleteCollection,
    ];

    /// Whether the response is a stream of watch events rather than one object.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Watch | Self::WatchList)
    }

    /// Whether the request carries a body.
    pub fn has_body(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Patch)
    }
}

/// Declared `kind` and `apiVersion` of a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclaredType {
    pub kind: &'static str,
    pub api_version: &'static str,
}

/// One URL template and the operations it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRoute {
    pub template: UrlTemplate,
    pub operations: Vec<OperationKind>,
}

impl ApiRoute {
    pub fn new(template: impl Into<String>, operations: &[OperationKind]) -> Self {
        Self {
            template: UrlTemplate::new(template),
            operations: operations.to_vec(),
        }
    }
}

/// Routing declarations of a resource type.
///
/// Types that declare nothing still get a descriptor, with an empty kind,
/// an empty API version and no operations.
pub trait KubeObject: 'static {
    fn declared_type() -> Option<DeclaredType> {
        None
    }

    fn api_routes() -> Vec<ApiRoute> {
        Vec::new()
    }
}

/// The resolved routing metadata of one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    kind: String,
    api_version: String,
    templates: BTreeMap<OperationKind, Vec<UrlTemplate>>,
}

impl ResourceDescriptor {
    pub fn new(declared: Option<DeclaredType>, routes: Vec<ApiRoute>) -> Self {
        let mut templates = BTreeMap::<OperationKind, Vec<UrlTemplate>>::new();
        for route in routes {
            for operation in route.operations {
                let slot = templates.entry(operation).or_default();
                if !slot.contains(&route.template) {
                    slot.push(route.template.clone());
                }
            }
        }

        let (kind, api_version) = declared
            .map(|declared| (declared.kind.to_owned(), declared.api_version.to_owned()))
            .unwrap_or_default();
        Self {
            kind,
            api_version,
            templates,
        }
    }

    /// Builds the descriptor from the declarations of `T`.
    pub fn of<T: KubeObject>() -> Self {
        Self::new(T::declared_type(), T::api_routes())
    }

    /// Empty when the type declares no metadata.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Empty when the type declares no metadata.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn has_type_meta(&self) -> bool {
        !self.kind.is_empty() || !self.api_version.is_empty()
    }

    /// Templates serving `operation`, in declaration order.
    pub fn templates(&self, operation: OperationKind) -> &[UrlTemplate] {
        self.templates
            .get(&operation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn supports(&self, operation: OperationKind) -> bool {
        !self.templates(operation).is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = OperationKind> + '_ {
        self.templates.keys().copied()
    }
}

/// The `kind` / `apiVersion` pair carried by serialized objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Objects that carry their own [`TypeMeta`].
pub trait HasTypeMeta {
    fn type_meta(&self) -> &TypeMeta;

    fn type_meta_mut(&mut self) -> &mut TypeMeta;
}

/// Clears `kind` and `apiVersion`, e.g. before embedding the object in a list.
pub fn strip_type_meta<T: HasTypeMeta>(mut object: T) -> T {
    *object.type_meta_mut() = TypeMeta::default();
    object
}
