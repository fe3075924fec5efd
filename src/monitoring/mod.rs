use anyhow::{bail, Result};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::agent::config::LoopIntervals;
use crate::agent::host::HostAdapter;
use crate::commands::dispatcher::panic_message;
use crate::commands::Dispatcher;
use crate::transport::http_polling::ApiClient;

pub const FETCH_TASK: &str = "fetch";
pub const CHANNELS_TASK: &str = "channels";
pub const ON_TIME_TASK: &str = "on_time";
pub const SERVER_UPTIME_TASK: &str = "server_uptime";

/// Render seconds as `H:MM:SS`, prefixed with `N day(s), ` past 24 hours.
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let rem = total_secs % 86_400;
    let clock = format!("{}:{:02}:{:02}", rem / 3600, rem % 3600 / 60, rem % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

/// Uptime of the machine, as reported by the OS.
pub fn host_uptime() -> Result<Duration> {
    match System::uptime() {
        // sysinfo reports 0 when the counter cannot be read
        0 => bail!("host uptime counter unavailable"),
        secs => Ok(Duration::from_secs(secs)),
    }
}

/// Run `work` every `interval` until `shutdown` fires.
///
/// Errors and panics from an iteration are logged and the loop carries on.
/// The sleep is cut short by cancellation.
pub fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    shutdown: CancellationToken,
    mut work: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let span = info_span!("telemetry", task = name);
    tokio::spawn(
        async move {
            info!(interval_secs = interval.as_secs_f64(), "loop started");
            while !shutdown.is_cancelled() {
                match AssertUnwindSafe(work()).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %format!("{e:#}"), "iteration failed"),
                    Err(payload) => {
                        error!(error = %panic_message(payload.as_ref()), "iteration panicked")
                    }
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("loop stopped");
        }
        .instrument(span),
    )
}

/// Shared inputs for the four periodic tasks.
#[derive(Clone)]
pub struct Telemetry {
    pub api: ApiClient,
    pub host: Arc<dyn HostAdapter>,
    /// Monotonic first-activation instant, immune to wall-clock steps.
    pub started: Instant,
}

impl Telemetry {
    pub async fn push_channels(&self) -> Result<()> {
        let channels = self.host.channels()?.join(",");
        debug!(channels = %channels, "pushing channel list");
        self.api.update_channels(&channels).await;
        Ok(())
    }

    pub async fn push_on_time(&self) -> Result<()> {
        let elapsed = self.started.elapsed().as_secs();
        self.api.update_on_time(&format_duration(elapsed)).await;
        Ok(())
    }

    pub async fn push_server_uptime(&self) -> Result<()> {
        let uptime = self.host.host_uptime()?;
        self.api
            .update_server_uptime(&format_duration(uptime.as_secs()))
            .await;
        Ok(())
    }

    /// Start the fetch, channel, process-uptime and host-uptime loops.
    pub fn spawn_all(
        &self,
        dispatcher: Arc<Dispatcher>,
        intervals: LoopIntervals,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let api = self.api.clone();
        let fetch = spawn_loop(FETCH_TASK, intervals.fetch, shutdown.clone(), move || {
            let api = api.clone();
            let dispatcher = dispatcher.clone();
            async move {
                if let Some(resp) = api.fetch().await {
                    dispatcher.dispatch(resp.commands()).await;
                }
                Ok(())
            }
        });

        let t = self.clone();
        let channels = spawn_loop(CHANNELS_TASK, intervals.channels, shutdown.clone(), move || {
            let t = t.clone();
            async move { t.push_channels().await }
        });

        let t = self.clone();
        let on_time = spawn_loop(ON_TIME_TASK, intervals.on_time, shutdown.clone(), move || {
            let t = t.clone();
            async move { t.push_on_time().await }
        });

        let t = self.clone();
        let server_uptime = spawn_loop(
            SERVER_UPTIME_TASK,
            intervals.server_uptime,
            shutdown.clone(),
            move || {
                let t = t.clone();
                async move { t.push_server_uptime().await }
            },
        );

        vec![fetch, channels, on_time, server_uptime]
    }
}
