//! The proxy: supervisor, endpoint connection, and client acceptor glued
//! into one run loop

pub mod endpoint;
pub mod relay;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::common::{config::Config, Error, Result};
use crate::supervisor::{LaunchOptions, ProcessSupervisor};

use endpoint::{EndpointConnection, EndpointState};
use relay::RelayRegistry;
use server::AppState;

/// Everything needed to supervise one debug target and serve its clients
pub struct Proxy {
    config: Config,
    supervisor: Arc<ProcessSupervisor>,
    registry: Arc<RelayRegistry>,
    endpoint: Arc<EndpointConnection>,
}

impl Proxy {
    pub fn new(config: Config, script: PathBuf, script_args: Vec<String>) -> Result<Self> {
        let runtime = config.runtime_path()?;
        let options = LaunchOptions {
            runtime,
            runtime_args: config.target.runtime_args.clone(),
            script,
            script_args,
            inspect_port: config.target.inspect_port,
            cwd: None,
            env: Vec::new(),
        };
        let registry = Arc::new(RelayRegistry::new());
        Ok(Self {
            supervisor: Arc::new(ProcessSupervisor::new(options)),
            endpoint: Arc::new(EndpointConnection::new(registry.clone())),
            registry,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<RelayRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Spawn the target, wait for its endpoint, connect, and serve clients
    /// until the target goes away or the process is interrupted
    pub async fn run(&self) -> Result<()> {
        self.spawn_and_connect(false).await?;

        let listen = format!(
            "{}:{}",
            self.config.proxy.listen_host, self.config.proxy.listen_port
        );
        let listener = TcpListener::bind(&listen).await?;
        tracing::info!(addr = %listen, "proxy listening");

        let app = server::router(AppState {
            registry: self.registry.clone(),
        });

        tokio::select! {
            result = async { axum::serve(listener, app).await } => {
                result.map_err(Error::from)?;
            }
            result = self.watch_target() => {
                result?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
            }
        }

        if self.supervisor.is_running() {
            let _ = self.supervisor.kill().await;
        }
        Ok(())
    }

    async fn spawn_and_connect(&self, respawn: bool) -> Result<()> {
        if respawn {
            self.supervisor.restart().await?;
        } else {
            self.supervisor.start()?;
        }
        let discovery = Duration::from_secs(self.config.timeouts.discovery_secs);
        let endpoint_addr = self.supervisor.wait_ready(discovery).await?;
        self.endpoint.connect(&endpoint_addr).await?;
        Ok(())
    }

    /// Watch the endpoint connection and apply the restart policy when it
    /// closes. Returns when the proxy should stop serving.
    async fn watch_target(&self) -> Result<()> {
        let mut state = self.endpoint.state();
        loop {
            if state.changed().await.is_err() {
                return Ok(());
            }
            if *state.borrow_and_update() != EndpointState::Closed {
                continue;
            }
            if !self.config.proxy.restart_on_close {
                tracing::info!("debug target connection closed, stopping proxy");
                return Ok(());
            }
            tracing::info!("debug target connection closed, restarting target");
            if let Err(e) = self.spawn_and_connect(true).await {
                tracing::error!(error = %e, "target restart failed");
                return Err(e);
            }
        }
    }
}
