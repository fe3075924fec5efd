//! Primitives the agent needs from the chat bot it runs inside.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

use crate::monitoring;

/// Channel, lifecycle and system primitives owned by the bot runtime.
///
/// Implementations are shared between the telemetry tasks, so every method
/// takes `&self`.
pub trait HostAdapter: Send + Sync {
    /// Runtime name and version, reported once per activation.
    fn version(&self) -> String;

    fn join(&self, channel: &str) -> Result<()>;

    fn part(&self, channel: &str) -> Result<()>;

    fn restart(&self) -> Result<()>;

    /// Disconnect from the network with a farewell message.
    fn quit(&self, message: &str) -> Result<()>;

    /// Channels currently joined.
    fn channels(&self) -> Result<Vec<String>>;

    /// Uptime of the machine the bot runs on.
    fn host_uptime(&self) -> Result<Duration> {
        monitoring::host_uptime()
    }

    /// End the process. Only the `die` command reaches this.
    fn terminate(&self, code: i32) {
        std::process::exit(code)
    }
}

/// In-memory host used when the agent runs as its own process.
#[derive(Debug, Default)]
pub struct StandaloneHost {
    channels: Mutex<BTreeSet<String>>,
}

impl StandaloneHost {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: Mutex::new(channels.into_iter().map(Into::into).collect()),
        }
    }

    fn with_channels<T>(&self, f: impl FnOnce(&mut BTreeSet<String>) -> T) -> T {
        let mut guard = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }
}

impl HostAdapter for StandaloneHost {
    fn version(&self) -> String {
        format!("Standalone: {}", crate::VERSION)
    }

    fn join(&self, channel: &str) -> Result<()> {
        if !self.with_channels(|set| set.insert(channel.to_string())) {
            bail!("already in {channel}");
        }
        info!(channel = %channel, "joined channel");
        Ok(())
    }

    fn part(&self, channel: &str) -> Result<()> {
        if !self.with_channels(|set| set.remove(channel)) {
            bail!("not in {channel}");
        }
        info!(channel = %channel, "left channel");
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        let exe = std::env::current_exe()?;
        let args: Vec<String> = std::env::args().skip(1).collect();
        info!(exe = %exe.display(), "restarting process");
        relaunch(&exe, &args)
    }

    fn quit(&self, message: &str) -> Result<()> {
        let left = self.with_channels(std::mem::take);
        warn!(message = %message, channels = left.len(), "disconnecting");
        Ok(())
    }

    fn channels(&self) -> Result<Vec<String>> {
        Ok(self.with_channels(|set| set.iter().cloned().collect()))
    }
}

#[cfg(unix)]
fn relaunch(exe: &Path, args: &[String]) -> Result<()> {
    use std::os::unix::process::CommandExt;
    // exec only returns on failure
    let err = std::process::Command::new(exe).args(args).exec();
    Err(err.into())
}

#[cfg(not(unix))]
fn relaunch(exe: &Path, args: &[String]) -> Result<()> {
    std::process::Command::new(exe).args(args).spawn()?;
    std::process::exit(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_part_track_channels() {
        let host = StandaloneHost::new(["#lobby"]);
        host.join("#dev").unwrap();
        assert_eq!(host.channels().unwrap(), vec!["#dev", "#lobby"]);

        host.part("#lobby").unwrap();
        assert_eq!(host.channels().unwrap(), vec!["#dev"]);
    }

    #[test]
    fn duplicate_join_and_unknown_part_fail() {
        let host = StandaloneHost::new(["#lobby"]);
        let err = host.join("#lobby").unwrap_err();
        assert!(err.to_string().contains("already in #lobby"));

        let err = host.part("#nowhere").unwrap_err();
        assert!(err.to_string().contains("not in #nowhere"));
    }

    #[test]
    fn quit_leaves_every_channel() {
        let host = StandaloneHost::new(["#a", "#b"]);
        host.quit("bye").unwrap();
        assert!(host.channels().unwrap().is_empty());
    }

    #[test]
    fn version_names_the_runtime() {
        assert!(StandaloneHost::default().version().starts_with("Standalone: "));
    }
}
