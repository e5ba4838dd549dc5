//! `[namespace/]name` object keys.
//!
//! Cluster-scoped objects are keyed by name alone; namespaced objects by
//! `namespace/name`. The same format is used for work-queue keys and for the
//! value of the Node → Machine linkage annotation.

use crate::error::ControllerError;
use kube::Resource;

/// Builds the key of an object, or `None` if it has no name.
pub fn object_key<K: Resource>(obj: &K) -> Option<String> {
    let meta = obj.meta();
    let name = meta.name.as_deref()?;
    Some(match meta.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}/{name}"),
        _ => name.to_string(),
    })
}

/// Splits a key into `(namespace, name)`.
///
/// A key without `/` yields an empty namespace. More than one `/` is malformed.
pub fn split_object_key(key: &str) -> Result<(&str, &str), ControllerError> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => Ok(("", name)),
        (Some(namespace), Some(name), None) => Ok((namespace, name)),
        _ => Err(ControllerError::MalformedKey(key.to_string())),
    }
}
