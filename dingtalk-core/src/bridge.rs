//! Lifecycle of the chii remote-debugging bridge.
//!
//! The bridge is started lazily the first time something needs it and then
//! lives as long as the process. [`BridgeManager::ensure_started`] is
//! single-flight: callers racing on the first start all await the same
//! in-flight launch and observe the same port.

use crate::command::create_bridge_command;
use crate::error::BridgeError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Child;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Starts a bridge listening on the given port.
///
/// Returns the child process when the launcher spawned one, so the manager
/// can terminate it on shutdown.
#[async_trait]
pub trait BridgeLauncher: Send + Sync + 'static {
    async fn launch(&self, port: u16) -> Result<Option<Child>, BridgeError>;
}

pub struct ChiiLauncher {
    command: String,
    cwd: PathBuf,
    ready_timeout: Duration,
}

impl ChiiLauncher {
    pub fn new(command: impl Into<String>, cwd: PathBuf, ready_timeout: Duration) -> Self {
        Self {
            command: command.into(),
            cwd,
            ready_timeout,
        }
    }
}

#[async_trait]
impl BridgeLauncher for ChiiLauncher {
    async fn launch(&self, port: u16) -> Result<Option<Child>, BridgeError> {
        let mut command = create_bridge_command(&self.command, port, &self.cwd)?;

        info!("Starting chii bridge: {} (port {})", self.command, port);
        let mut child = command.spawn().map_err(BridgeError::Spawn)?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("chii: {}", line);
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("chii stderr: {}", line);
                }
            });
        }

        wait_until_listening(&mut child, port, self.ready_timeout).await?;
        Ok(Some(child))
    }
}

/// Polls the bridge port until it accepts connections.
///
/// An early exit of the child is an error. Running out of time is not: the
/// port is still returned and requests in the meantime get the proxy's
/// error response.
async fn wait_until_listening(
    child: &mut Child,
    port: u16,
    timeout: Duration,
) -> Result<(), BridgeError> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(BridgeError::Exited(status));
        }

        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            debug!("chii bridge accepting connections on port {}", port);
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            warn!(
                "chii bridge did not accept connections on port {} within {:?}",
                port, timeout
            );
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Binds an ephemeral port on loopback and releases it for the bridge to use.
pub async fn find_available_port() -> Result<u16, BridgeError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(BridgeError::Port)?;
    let port = listener.local_addr().map_err(BridgeError::Port)?.port();
    drop(listener);
    Ok(port)
}

pub struct BridgeManager {
    launcher: Arc<dyn BridgeLauncher>,
    port: OnceCell<u16>,
    child: Mutex<Option<Child>>,
}

impl BridgeManager {
    pub fn new(launcher: Arc<dyn BridgeLauncher>) -> Self {
        Self {
            launcher,
            port: OnceCell::new(),
            child: Mutex::new(None),
        }
    }

    pub async fn ensure_started(&self) -> Result<u16, BridgeError> {
        self.port
            .get_or_try_init(|| async {
                let port = find_available_port().await?;
                let child = self.launcher.launch(port).await?;
                if let Ok(mut slot) = self.child.lock() {
                    *slot = child;
                }
                info!("chii bridge port: {}", port);
                Ok::<u16, BridgeError>(port)
            })
            .await
            .copied()
    }

    /// Port of the running bridge, `None` while it has not been started.
    pub fn port(&self) -> Option<u16> {
        self.port.get().copied()
    }

    /// Kills the bridge process if this manager spawned one.
    pub fn shutdown(&self) {
        let child = self.child.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut child) = child {
            info!("Stopping chii bridge");
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill chii bridge: {}", e);
            }
        }
    }
}

impl Drop for BridgeManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLauncher {
        launches: AtomicUsize,
    }

    #[async_trait]
    impl BridgeLauncher for CountingLauncher {
        async fn launch(&self, _port: u16) -> Result<Option<Child>, BridgeError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for concurrent callers
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(None)
        }
    }

    struct FailingLauncher;

    #[async_trait]
    impl BridgeLauncher for FailingLauncher {
        async fn launch(&self, _port: u16) -> Result<Option<Child>, BridgeError> {
            Err(BridgeError::NotFound("chii".to_string()))
        }
    }

    #[tokio::test]
    async fn test_ensure_started_is_idempotent() {
        let launcher = Arc::new(CountingLauncher {
            launches: AtomicUsize::new(0),
        });
        let manager = BridgeManager::new(launcher.clone());
        assert_eq!(manager.port(), None);

        let first = manager.ensure_started().await.unwrap();
        for _ in 0..5 {
            assert_eq!(manager.ensure_started().await.unwrap(), first);
        }

        assert_eq!(manager.port(), Some(first));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_launch() {
        let launcher = Arc::new(CountingLauncher {
            launches: AtomicUsize::new(0),
        });
        let manager = Arc::new(BridgeManager::new(launcher.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_started().await.unwrap() })
            })
            .collect();

        let mut ports = Vec::new();
        for handle in handles {
            ports.push(handle.await.unwrap());
        }

        assert!(ports.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_bridge_unstarted() {
        let manager = BridgeManager::new(Arc::new(FailingLauncher));
        let err = manager.ensure_started().await.unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
        assert_eq!(manager.port(), None);
    }

    #[tokio::test]
    async fn test_find_available_port() {
        let port = find_available_port().await.unwrap();
        assert_ne!(port, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exiting_early_is_an_error() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .unwrap();
        let port = find_available_port().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = wait_until_listening(&mut child, port, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(BridgeError::Exited(_))));
    }
}
