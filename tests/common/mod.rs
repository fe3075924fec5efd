#![allow(dead_code)]

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockito::Mock;
use ynmweb::agent::config::{Config, LoopIntervals};
use ynmweb::agent::{Agent, ConfigSource, HostAdapter};

/// Host double that records every primitive call and never exits.
#[derive(Default)]
pub struct RecordingHost {
    pub calls: Mutex<Vec<String>>,
    pub channels: Mutex<Vec<String>>,
    pub fail_channels: bool,
    pub panic_channels: bool,
    pub terminated: AtomicUsize,
}

impl RecordingHost {
    pub fn with_channels(channels: &[&str]) -> Self {
        Self {
            channels: Mutex::new(channels.iter().map(|c| c.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn terminations(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl HostAdapter for RecordingHost {
    fn version(&self) -> String {
        "Recording: 0.0.1".into()
    }

    fn join(&self, channel: &str) -> Result<()> {
        self.record(format!("join {channel}"));
        self.channels.lock().unwrap().push(channel.to_string());
        Ok(())
    }

    fn part(&self, channel: &str) -> Result<()> {
        self.record(format!("part {channel}"));
        self.channels.lock().unwrap().retain(|c| c != channel);
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        self.record("restart".into());
        Ok(())
    }

    fn quit(&self, message: &str) -> Result<()> {
        self.record(format!("quit {message}"));
        Ok(())
    }

    fn channels(&self) -> Result<Vec<String>> {
        if self.panic_channels {
            panic!("channel table corrupted");
        }
        if self.fail_channels {
            bail!("channel list unavailable");
        }
        Ok(self.channels.lock().unwrap().clone())
    }

    fn host_uptime(&self) -> Result<Duration> {
        Ok(Duration::from_secs(93_784))
    }

    fn terminate(&self, _code: i32) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn config(url: &str, every: Duration) -> Config {
    Config {
        intervals: LoopIntervals {
            fetch: every,
            channels: every,
            on_time: every,
            server_uptime: every,
        },
        request_timeout_secs: 2.0,
        die_grace_secs: 0.0,
        ..Config::new(url, "s3cret")
    }
}

pub fn agent(host: Arc<RecordingHost>, config: Config) -> Arc<Agent> {
    Agent::new(host, ConfigSource::Static(config))
}

/// Poll until `mock` has seen its expected hits, or give up after ~5s.
pub async fn wait_matched(mock: &Mock) -> bool {
    for _ in 0..250 {
        if mock.matched_async().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
