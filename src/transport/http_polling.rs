use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

use crate::agent::config::ApiSettings;
use crate::transport::{Acknowledgement, FetchResponse};

/// Same-length mask for secrets written to the log.
pub fn mask_secret(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}

/// Form-POST client for the remote control endpoint.
///
/// Every call carries the shared `key` and the `command` name. Failures are
/// logged and surface as `None`; callers retry on their next cycle.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    url: String,
    key: String,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings, timeout: Duration) -> Result<Self> {
        // rustls verifies server certificates by default
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            key: settings.key.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `command` with `params` and return the parsed JSON body.
    pub async fn request(&self, command: &str, params: &[(&str, &str)]) -> Option<Value> {
        match self.try_request(command, params).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!(command = %command, url = %self.url, error = %format!("{e:#}"), "api request failed");
                None
            }
        }
    }

    async fn try_request(&self, command: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 2);
        form.push(("key", self.key.as_str()));
        form.push(("command", command));
        form.extend_from_slice(params);

        debug!(url = %self.url, command = %command, "api request");
        for (name, value) in &form {
            if *name == "key" {
                debug!(param = %name, value = %mask_secret(value), "api request param");
            } else {
                debug!(param = %name, value = %value, "api request param");
            }
        }

        let resp = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .await
            .context("sending request")?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.context("reading response body")?;

        debug!(
            status_code = %status.as_u16(),
            headers = ?headers,
            response_body = %body,
            "api response"
        );

        if !status.is_success() {
            return Err(anyhow!(
                "unexpected status: {} | headers: {:?} | body: {}",
                status,
                headers,
                body
            ));
        }

        serde_json::from_str(&body).context("parsing response json")
    }

    /// Poll for pending commands.
    pub async fn fetch(&self) -> Option<FetchResponse> {
        self.request("fetch", &[]).await.map(FetchResponse::from_value)
    }

    /// Report the outcome of a processed command.
    pub async fn pickup(&self, ack: &Acknowledgement) -> Option<Value> {
        self.request(
            "pickup",
            &[
                ("action", ack.action.as_str()),
                ("success", ack.success_flag()),
                ("message", ack.message.as_str()),
            ],
        )
        .await
    }

    pub async fn send_version(&self, version: &str) -> Option<Value> {
        self.request("version", &[("version", version)]).await
    }

    pub async fn update_channels(&self, channels: &str) -> Option<Value> {
        self.request("updatechannels", &[("channels", channels)]).await
    }

    pub async fn update_on_time(&self, on_time: &str) -> Option<Value> {
        self.request("ontime", &[("on_time", on_time)]).await
    }

    pub async fn update_server_uptime(&self, server_uptime: &str) -> Option<Value> {
        self.request("uptime", &[("server_uptime", server_uptime)]).await
    }
}
