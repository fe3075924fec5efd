use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::config::ConfigSource;
use crate::agent::host::{HostAdapter, StandaloneHost};
use crate::commands::dispatcher::FAREWELL;
use crate::commands::{Dispatcher, Lifecycle, LifecycleFuture};
use crate::monitoring::Telemetry;
use crate::transport::http_polling::ApiClient;

/// One activation's worth of running loops and the signal they watch.
struct Generation {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Controller state. `epoch` moves on every activate, deactivate and
/// shutdown so an activation still awaiting its version report can tell
/// it was superseded.
#[derive(Default)]
struct State {
    epoch: u64,
    activating: bool,
    generation: Option<Generation>,
}

impl State {
    /// Advance the epoch and raise the stop signal of whatever is running.
    /// Returns the retired generation and whether anything was live.
    fn retire(&mut self) -> (Option<Generation>, bool) {
        self.epoch += 1;
        let pending = std::mem::take(&mut self.activating);
        let generation = self.generation.take();
        if let Some(g) = &generation {
            g.shutdown.cancel();
        }
        let live = pending || generation.is_some();
        (generation, live)
    }
}

/// Lifecycle controller: validates configuration, reports the version,
/// and owns the telemetry loops of the current activation.
pub struct Agent {
    host: Arc<dyn HostAdapter>,
    source: ConfigSource,
    started_at: OnceLock<(DateTime<Utc>, Instant)>,
    state: Mutex<State>,
    this: Weak<Agent>,
}

impl Agent {
    pub fn new(host: Arc<dyn HostAdapter>, source: ConfigSource) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            host,
            source,
            started_at: OnceLock::new(),
            state: Mutex::new(State::default()),
            this: this.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate configuration, send the version report and start the loops.
    ///
    /// On a configuration error nothing is started and the agent stays inert.
    /// A deactivate or shutdown that lands while the version report is in
    /// flight wins: the loops are never started.
    pub async fn activate(&self) -> Result<()> {
        let config = self
            .source
            .load()
            .inspect_err(|e| error!(error = %e, "configuration not found"))?;
        let settings = config
            .api_settings()
            .inspect_err(|e| error!(error = %e, "invalid configuration"))?;
        let api = ApiClient::new(&settings, config.request_timeout())?;

        let epoch = {
            let mut state = self.state();
            if state.retire().1 {
                warn!("replacing an already active generation");
            }
            state.activating = true;
            state.epoch
        };

        let (_, started) = *self.started_at.get_or_init(|| (Utc::now(), Instant::now()));
        let version = format!("{} | ynmweb: {}", self.host.version(), crate::VERSION);
        info!(endpoint = %settings.url, version = %version, "activating");
        // best effort; failure is already logged by the client
        api.send_version(&version).await;

        let mut state = self.state();
        if state.epoch != epoch {
            info!("activation superseded, loops not started");
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let lifecycle: Weak<dyn Lifecycle> = self.this.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            api.clone(),
            self.host.clone(),
            lifecycle,
            shutdown.clone(),
            config.die_grace(),
        ));
        let telemetry = Telemetry {
            api,
            host: self.host.clone(),
            started,
        };
        let tasks = telemetry.spawn_all(dispatcher, config.intervals, &shutdown);

        info!(loops = tasks.len(), "agent active");
        state.activating = false;
        if let Some(displaced) = state.generation.replace(Generation { shutdown, tasks }) {
            displaced.shutdown.cancel();
        }
        Ok(())
    }

    /// Raise the stop signal of the current generation, or cancel an
    /// activation in progress. Returns `false` if nothing was running.
    /// Does not wait for the loops to exit.
    pub fn deactivate(&self) -> bool {
        let (_, live) = self.state().retire();
        if live {
            info!("agent deactivated");
        }
        live
    }

    /// Deactivate, wait for the loops to wind down, then disconnect the host.
    pub async fn shutdown(&self) {
        let (generation, _) = self.state().retire();
        if let Some(generation) = generation {
            for task in generation.tasks {
                let _ = task.await;
            }
        }
        if let Err(e) = self.host.quit(FAREWELL) {
            error!(error = %format!("{e:#}"), "disconnect failed");
        }
        info!("agent stopped");
    }

    pub fn is_active(&self) -> bool {
        self.state().generation.is_some()
    }

    /// Number of loops of the current generation that are still running.
    pub fn running_loops(&self) -> usize {
        self.state()
            .generation
            .as_ref()
            .map(|g| g.tasks.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }

    /// Stop signal of the current generation, if active.
    pub fn shutdown_signal(&self) -> Option<CancellationToken> {
        self.state().generation.as_ref().map(|g| g.shutdown.clone())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().map(|(at, _)| *at)
    }

    /// Stop the current loops, then activate again from freshly loaded
    /// configuration. A bad reload leaves the agent inert.
    pub async fn rehash(&self) -> Result<()> {
        info!("rehash requested");
        self.deactivate();
        self.activate().await
    }
}

impl Lifecycle for Agent {
    fn reload(&self) -> LifecycleFuture<'_> {
        Box::pin(async move {
            if let Err(e) = self.rehash().await {
                error!(error = %format!("{e:#}"), "rehash failed, agent inert");
            }
        })
    }
}

/// Run the agent against an in-process host until Ctrl+C.
pub async fn run(config_path: PathBuf) -> Result<()> {
    let source = ConfigSource::File(config_path.clone());
    let channels = source.load().map(|c| c.channels).unwrap_or_default();
    let host: Arc<dyn HostAdapter> = Arc::new(StandaloneHost::new(channels));

    let agent = Agent::new(host, source);
    info!(config = %config_path.display(), "agent starting");

    if let Err(e) = agent.activate().await {
        warn!(error = %format!("{e:#}"), "activation failed, staying inert");
    }

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received, stopping agent");

    agent.shutdown().await;
    Ok(())
}
