//! Image reference normalization and registry credential lookup.
//!
//! Unqualified image names belong to the default public registry and are
//! rewritten to their fully qualified form. Qualified names trigger a
//! best-effort lookup of their registry host in the user's credential file;
//! any failure there degrades to an unauthenticated pull.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

/// Namespace prefixed onto unqualified image names.
const DEFAULT_REGISTRY_NAMESPACE: &str = "docker.io/library/";

/// One entry of the per-user registry credential file.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthEntry {
    /// Opaque base64 auth blob, forwarded to the engine as-is.
    #[serde(default)]
    pub auth: Option<String>,
}

/// Credential file shape with the entries nested under `auths`.
#[derive(Debug, Deserialize)]
struct WrappedAuthFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// A resolved image reference: the fully qualified name plus any auth token
/// found for its registry host.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub name: String,
    pub auth_token: Option<String>,
}

/// Normalize an image name: names without a namespace segment get the
/// default public-registry prefix, everything else passes through unchanged.
pub fn normalize_image(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("{}{}", DEFAULT_REGISTRY_NAMESPACE, name)
    }
}

/// Default per-user credential file location.
pub fn default_credential_path(home: &Path) -> PathBuf {
    home.join(".docker").join("config.json")
}

/// Resolve an image name against the credential file at `credential_path`.
///
/// Unqualified names skip the lookup entirely. A missing, unreadable, or
/// malformed credential file yields no credentials; the pull proceeds
/// unauthenticated and the engine rejects it if the image is private.
pub fn resolve_image(name: &str, credential_path: &Path) -> ImageRef {
    if !name.contains('/') {
        return ImageRef {
            name: normalize_image(name),
            auth_token: None,
        };
    }

    let host = name.split('/').next().unwrap_or_default();
    let auth_token = std::fs::read_to_string(credential_path)
        .ok()
        .and_then(|data| parse_credential_file(&data))
        .and_then(|mut auths| auths.remove(host))
        .and_then(|entry| entry.auth);

    if auth_token.is_some() {
        debug!("found registry credentials for {}", host);
    } else {
        debug!("no registry credentials for {}", host);
    }

    ImageRef {
        name: name.to_string(),
        auth_token,
    }
}

/// Parse the credential file, accepting both the `auths`-wrapped and the
/// flat host-to-entry shapes.
fn parse_credential_file(data: &str) -> Option<HashMap<String, AuthEntry>> {
    if let Ok(wrapped) = serde_json::from_str::<WrappedAuthFile>(data) {
        if !wrapped.auths.is_empty() {
            return Some(wrapped.auths);
        }
    }

    serde_json::from_str(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_name_gets_default_prefix() {
        assert_eq!(normalize_image("alpine"), "docker.io/library/alpine");
        assert_eq!(normalize_image("app:tag"), "docker.io/library/app:tag");
    }

    #[test]
    fn qualified_name_passes_through() {
        assert_eq!(
            normalize_image("registry.example.com/app:tag"),
            "registry.example.com/app:tag"
        );
        assert_eq!(normalize_image("library/alpine"), "library/alpine");
    }

    #[test]
    fn unqualified_name_skips_credential_lookup() {
        // The path does not exist; an attempted lookup would matter only for
        // qualified names anyway.
        let resolved = resolve_image("app:tag", Path::new("/nonexistent/config.json"));
        assert_eq!(resolved.name, "docker.io/library/app:tag");
        assert_eq!(resolved.auth_token, None);
    }

    #[test]
    fn flat_credential_file_matches_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"registry.example.com": {"auth": "XYZ"}}"#).unwrap();

        let resolved = resolve_image("registry.example.com/app:tag", &path);
        assert_eq!(resolved.name, "registry.example.com/app:tag");
        assert_eq!(resolved.auth_token, Some("XYZ".to_string()));
    }

    #[test]
    fn wrapped_credential_file_matches_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"auths": {"registry.example.com": {"auth": "XYZ", "email": "a@b.c"}}}"#,
        )
        .unwrap();

        let resolved = resolve_image("registry.example.com/app:tag", &path);
        assert_eq!(resolved.auth_token, Some("XYZ".to_string()));
    }

    #[test]
    fn host_mismatch_yields_no_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"auths": {"other.example.com": {"auth": "XYZ"}}}"#).unwrap();

        let resolved = resolve_image("registry.example.com/app:tag", &path);
        assert_eq!(resolved.auth_token, None);
    }

    #[test]
    fn malformed_credential_file_yields_no_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json at all").unwrap();

        let resolved = resolve_image("registry.example.com/app:tag", &path);
        assert_eq!(resolved.auth_token, None);
    }

    #[test]
    fn missing_credential_file_yields_no_credentials() {
        let resolved = resolve_image(
            "registry.example.com/app:tag",
            Path::new("/nonexistent/config.json"),
        );
        assert_eq!(resolved.auth_token, None);
    }

    #[test]
    fn default_credential_path_is_under_home() {
        let path = default_credential_path(Path::new("/home/dev"));
        assert_eq!(path, PathBuf::from("/home/dev/.docker/config.json"));
    }
}
