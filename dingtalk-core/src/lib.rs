pub mod bridge;
mod command;
pub mod config;
pub mod deeplink;
pub mod error;
pub mod host;
pub mod http_handlers;
pub mod inject;
pub mod namespace;
pub mod picker;
pub mod proxy;
pub mod server;
pub mod session;

pub use bridge::{BridgeLauncher, BridgeManager, ChiiLauncher};
pub use config::{load_config, Config, DEFAULT_CONFIG_FILE};
pub use error::{BridgeError, ConfigError, ProxyError};
pub use host::{HostKind, InjectionStrategy};
pub use namespace::{Namespace, Routes};
pub use server::{
    attach, bind_http_server, gateway_router, serve_http_server_with_shutdown, serve_session,
};
pub use session::{Session, SharedSession};
