//! Process-wide state shared by every component.
//!
//! One [`Session`] is created by the composition root and handed to routes
//! and middleware as [`SharedSession`]. Each lazily populated slot is a
//! once-cell, so a value is either absent or fully initialised.

use crate::bridge::{BridgeLauncher, BridgeManager, ChiiLauncher};
use crate::config::Config;
use crate::inject::ModuleEntry;
use crate::namespace::{Namespace, Routes};
use crate::proxy::ProxyHandle;
use reqwest::Client;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;
use url::Url;

pub type SharedSession = Arc<Session>;

pub struct Session {
    pub config: Config,
    pub routes: Routes,
    pub bridge: BridgeManager,
    pub module_entry: ModuleEntry,
    client: Client,
    proxy: OnceLock<ProxyHandle>,
    target_url: OnceLock<Url>,
}

impl Session {
    pub fn new(
        config: Config,
        namespace: Namespace,
        launcher: Arc<dyn BridgeLauncher>,
    ) -> Result<Self, reqwest::Error> {
        // Upstreams are always local; never route them through an env proxy
        let client = Client::builder().no_proxy().build()?;
        let routes = Routes::new(namespace, &config.normalized_base());

        Ok(Self {
            config,
            routes,
            bridge: BridgeManager::new(launcher),
            module_entry: ModuleEntry::new(),
            client,
            proxy: OnceLock::new(),
            target_url: OnceLock::new(),
        })
    }

    /// Session for a project rooted at `cwd`, launching the real chii bridge.
    pub fn for_project(config: Config, cwd: &Path) -> Result<Self, reqwest::Error> {
        let launcher = ChiiLauncher::new(
            config.chii.command.clone(),
            cwd.to_path_buf(),
            Duration::from_millis(config.chii.ready_timeout_ms),
        );
        Self::new(config, Namespace::from_dir(cwd), Arc::new(launcher))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The bridge proxy, created on first use once the bridge port is known.
    ///
    /// Returns `None` while the bridge has not started; callers treat that
    /// as "not ready" and pass the request on.
    pub fn proxy(&self) -> Option<&ProxyHandle> {
        if let Some(proxy) = self.proxy.get() {
            return Some(proxy);
        }
        let port = self.bridge.port()?;
        Some(self.proxy.get_or_init(|| {
            info!(
                "Proxying {} (HTTP and WebSocket upgrades) to chii on port {}",
                self.routes.proxy_prefix, port
            );
            ProxyHandle::new(port, self.client.clone())
        }))
    }

    /// Records the page DingTalk should open. Only the first value is kept.
    pub fn set_target_url(&self, url: Url) {
        let _ = self.target_url.set(url);
    }

    pub fn target_url(&self) -> Option<&Url> {
        self.target_url.get()
    }
}
