use anyhow::Result;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::host::HostAdapter;
use crate::transport::http_polling::ApiClient;
use crate::transport::{Acknowledgement, CommandRecord};

pub const CHANNEL_PREFIX: char = '#';
pub const FAREWELL: &str = "Bot shutting down...";

pub type LifecycleFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Hook back into the controller that owns the running loops.
pub trait Lifecycle: Send + Sync {
    /// Stop the current generation of loops and start a fresh one from
    /// reloaded configuration.
    fn reload(&self) -> LifecycleFuture<'_>;
}

/// Commands the remote endpoint can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Rehash,
    Restart,
    Die,
    Join,
    Part,
}

impl FromStr for RemoteCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rehash" => Ok(Self::Rehash),
            "restart" => Ok(Self::Restart),
            "die" => Ok(Self::Die),
            "join" => Ok(Self::Join),
            "part" => Ok(Self::Part),
            _ => Err(()),
        }
    }
}

/// What happened to a single command record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Acked(Acknowledgement),
    Ignored,
}

/// Run a host primitive, turning errors and panics into a message.
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "host adapter panicked".to_string())
}

pub struct Dispatcher {
    api: ApiClient,
    host: Arc<dyn HostAdapter>,
    lifecycle: Weak<dyn Lifecycle>,
    shutdown: CancellationToken,
    die_grace: Duration,
}

impl Dispatcher {
    pub fn new(
        api: ApiClient,
        host: Arc<dyn HostAdapter>,
        lifecycle: Weak<dyn Lifecycle>,
        shutdown: CancellationToken,
        die_grace: Duration,
    ) -> Self {
        Self {
            api,
            host,
            lifecycle,
            shutdown,
            die_grace,
        }
    }

    /// Process a fetched batch in order. Each record is handled on its own;
    /// a failing record does not stop the rest.
    pub async fn dispatch(&self, records: Vec<CommandRecord>) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.handle(&record).await);
        }
        outcomes
    }

    pub async fn handle(&self, record: &CommandRecord) -> Outcome {
        let Ok(command) = record.command.parse::<RemoteCommand>() else {
            debug!(command_id = %record.id, command = %record.command, "ignoring unknown command");
            return Outcome::Ignored;
        };

        info!(command_id = %record.id, command = ?command, arguments = %record.arguments, "handling command");

        let ack = match command {
            RemoteCommand::Join => self.channel_action(record, "Add", |ch| self.host.join(ch)),
            RemoteCommand::Part => self.channel_action(record, "Del", |ch| self.host.part(ch)),
            RemoteCommand::Rehash => {
                let ack = Acknowledgement::success(&record.id, "Reloading configuration...");
                self.acknowledge(&ack).await;
                self.rehash().await;
                return Outcome::Acked(ack);
            }
            RemoteCommand::Restart => {
                let ack = Acknowledgement::success(&record.id, "Restarting bot...");
                self.acknowledge(&ack).await;
                if let Err(e) = guarded(|| self.host.restart()) {
                    error!(command_id = %record.id, error = %e, "restart failed");
                }
                return Outcome::Acked(ack);
            }
            RemoteCommand::Die => {
                let ack = Acknowledgement::success(&record.id, "Shutting down bot...");
                self.acknowledge(&ack).await;
                self.die().await;
                return Outcome::Acked(ack);
            }
        };

        self.acknowledge(&ack).await;
        Outcome::Acked(ack)
    }

    fn channel_action(
        &self,
        record: &CommandRecord,
        verb: &str,
        action: impl FnOnce(&str) -> Result<()>,
    ) -> Acknowledgement {
        let channel = record.arguments.as_str();
        if !channel.starts_with(CHANNEL_PREFIX) {
            warn!(command_id = %record.id, channel = %channel, "rejecting invalid channel name");
            return Acknowledgement::failure(&record.id, format!("Invalid channel name: {channel}"));
        }

        match guarded(|| action(channel)) {
            Ok(()) => Acknowledgement::success(&record.id, format!("{verb} {channel}")),
            Err(e) => {
                error!(command_id = %record.id, channel = %channel, error = %e, "host channel action failed");
                Acknowledgement::failure(&record.id, e)
            }
        }
    }

    async fn acknowledge(&self, ack: &Acknowledgement) {
        if self.api.pickup(ack).await.is_none() {
            warn!(command_id = %ack.action, "acknowledgement not confirmed by endpoint");
        }
    }

    async fn rehash(&self) {
        match self.lifecycle.upgrade() {
            Some(lifecycle) => lifecycle.reload().await,
            None => warn!("controller gone, rehash skipped"),
        }
    }

    async fn die(&self) {
        self.shutdown.cancel();
        if let Err(e) = guarded(|| self.host.quit(FAREWELL)) {
            error!(error = %e, "disconnect failed");
        }
        tokio::time::sleep(self.die_grace).await;
        info!("terminating process");
        self.host.terminate(0);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoint", &self.api.url())
            .field("die_grace", &self.die_grace)
            .finish()
    }
}
