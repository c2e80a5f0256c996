//! Client configuration from environment variables.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use switchboard_shared::{empty_payload, ConnectOption};

const DEFAULT_RETRY_TICK_MS: u64 = 1_000;
const DEFAULT_REQUEST_BUFFER: usize = 64;
const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Period of the retry clock.
    pub tick_interval: Duration,
    /// Capacity of the application request channel.
    pub request_buffer: usize,
    /// Capacity of the classified-event broadcast channel.
    pub event_buffer: usize,
    pub connect_options: Vec<ConnectOption>,
    pub connect_params: Value,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_RETRY_TICK_MS),
            request_buffer: DEFAULT_REQUEST_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
            connect_options: Vec::new(),
            connect_params: empty_payload(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SWITCHBOARD_RETRY_TICK_MS`: retry clock period (default: 1000)
    /// - `SWITCHBOARD_REQUEST_BUFFER`: request channel capacity (default: 64)
    /// - `SWITCHBOARD_EVENT_BUFFER`: event broadcast capacity (default: 256)
    /// - `SWITCHBOARD_HEARTBEAT_MS`: heartbeat interval connect option
    /// - `SWITCHBOARD_TIMEOUT_MS`: socket timeout connect option
    /// - `SWITCHBOARD_VSN`: protocol version connect option
    /// - `SWITCHBOARD_CONNECT_PARAMS`: JSON object sent with `connect`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "SWITCHBOARD_RETRY_TICK_MS")? {
            if ms == 0 {
                bail!("SWITCHBOARD_RETRY_TICK_MS must be greater than zero");
            }
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize>(&lookup, "SWITCHBOARD_REQUEST_BUFFER")? {
            config.request_buffer = size.max(1);
        }
        if let Some(size) = parse_var::<usize>(&lookup, "SWITCHBOARD_EVENT_BUFFER")? {
            config.event_buffer = size.max(1);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "SWITCHBOARD_HEARTBEAT_MS")? {
            config
                .connect_options
                .push(ConnectOption::HeartbeatIntervalMillis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "SWITCHBOARD_TIMEOUT_MS")? {
            config.connect_options.push(ConnectOption::Timeout(ms));
        }
        if let Some(vsn) = lookup("SWITCHBOARD_VSN").filter(|v| !v.trim().is_empty()) {
            config.connect_options.push(ConnectOption::Vsn(vsn.trim().to_string()));
        }

        if let Some(raw) = lookup("SWITCHBOARD_CONNECT_PARAMS") {
            let params: Value = serde_json::from_str(&raw)
                .context("SWITCHBOARD_CONNECT_PARAMS is not valid JSON")?;
            if !params.is_object() {
                bail!("SWITCHBOARD_CONNECT_PARAMS must be a JSON object");
            }
            config.connect_params = params;
        }

        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(None),
    }
}
