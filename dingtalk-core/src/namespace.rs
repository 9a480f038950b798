//! Per-project route namespace.
//!
//! Every route this crate mounts lives under `/<id>/...`, where `id` is
//! derived from the project's working directory. Two projects served from
//! the same machine therefore never share proxy or client paths, and the
//! same project keeps its paths across restarts.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

pub const LEGACY_PICKER_PATH: &str = "/__chrome_devtools";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// 8 lowercase hex characters taken from the SHA-256 of the absolute path.
    pub fn from_dir(path: &Path) -> Self {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        let mut hasher = Sha256::new();
        hasher.update(absolute.as_os_str().as_encoded_bytes());
        let digest = hasher.finalize();

        Namespace(hex::encode(&digest[..4]))
    }

    pub fn current() -> std::io::Result<Self> {
        Ok(Self::from_dir(&std::env::current_dir()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Route strings derived once from the namespace and reused for the whole session.
#[derive(Debug, Clone)]
pub struct Routes {
    pub namespace: Namespace,
    pub proxy_prefix: String,
    pub client_asset: String,
    pub devtools_picker: String,
    pub devtools_list: String,
    pub open_dingtalk: String,
}

impl Routes {
    pub fn new(namespace: Namespace, base: &str) -> Self {
        let id = namespace.as_str();
        let devtools_picker = format!("/{}/__chrome_devtools", id);
        Self {
            proxy_prefix: format!("/{}/__chii_proxy", id),
            client_asset: format!("/{}/__chii_client.js", id),
            devtools_list: format!("{}/list", devtools_picker),
            devtools_picker,
            open_dingtalk: format!("{}open-dingtalk", base),
            namespace,
        }
    }

    /// Returns the path to forward upstream when `path` falls under the proxy prefix.
    ///
    /// The prefix is removed exactly once and only on a segment boundary, so
    /// `/<id>/__chii_proxyx` is not a match.
    pub fn strip_proxy_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.proxy_prefix.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn routes() -> Routes {
        Routes::new(Namespace::from_dir(Path::new("/work/app")), "/")
    }

    #[test]
    fn test_namespace_shape() {
        let ns = Namespace::from_dir(Path::new("/work/app"));
        assert_eq!(ns.as_str().len(), 8);
        assert!(ns
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_namespace_is_stable() {
        let a = Namespace::from_dir(Path::new("/work/app"));
        let b = Namespace::from_dir(&PathBuf::from("/work/app"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_namespace_differs_per_directory() {
        let a = Namespace::from_dir(Path::new("/work/app-one"));
        let b = Namespace::from_dir(Path::new("/work/app-two"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_routes_are_namespaced() {
        let routes = routes();
        let id = routes.namespace.to_string();
        assert_eq!(routes.proxy_prefix, format!("/{}/__chii_proxy", id));
        assert_eq!(routes.client_asset, format!("/{}/__chii_client.js", id));
        assert_eq!(routes.devtools_picker, format!("/{}/__chrome_devtools", id));
        assert_eq!(routes.open_dingtalk, "/open-dingtalk");
    }

    #[test]
    fn test_strip_proxy_prefix() {
        let routes = routes();
        let targets = format!("{}/targets", routes.proxy_prefix);
        assert_eq!(routes.strip_proxy_prefix(&targets), Some("/targets"));

        // Prefix appearing twice is only removed once
        let doubled = format!("{0}{0}/x", routes.proxy_prefix);
        assert_eq!(
            routes.strip_proxy_prefix(&doubled),
            Some(&doubled[routes.proxy_prefix.len()..])
        );

        assert_eq!(routes.strip_proxy_prefix(&routes.proxy_prefix), Some("/"));
        assert_eq!(routes.strip_proxy_prefix("/unrelated/path"), None);
        let glued = format!("{}x/targets", routes.proxy_prefix);
        assert_eq!(routes.strip_proxy_prefix(&glued), None);
    }
}
