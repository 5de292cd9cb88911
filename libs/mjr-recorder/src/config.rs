use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, naming::DEFAULT_TEMP_EXTENSION};

pub const DEFAULT_REMOTE_PORT: u16 = 50625;

/// Settings shared by every recorder created with them. Build this once before
/// the first recorder and pass it to [`crate::Recorder::create`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Temporary extension used while recording, `None` writes canonical names directly.
    pub temp_extension: Option<String>,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    #[default]
    File,
    Remote {
        /// `host:port` or `host`, in which case [`DEFAULT_REMOTE_PORT`] is used.
        endpoint: String,
        #[serde(default)]
        connect_timeout_ms: Option<u64>,
        #[serde(default)]
        write_timeout_ms: Option<u64>,
    },
}

impl RecorderConfig {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        let buf = std::fs::read(path)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    /// Turns temporary names on, using `extension` or `tmp` when none is given.
    pub fn with_temp_names(mut self, extension: Option<&str>) -> Self {
        let extension = match extension {
            Some(ext) => {
                info!(ext, "using temporary extension");
                ext
            }
            None => {
                info!("no temporary extension provided, using {DEFAULT_TEMP_EXTENSION}");
                DEFAULT_TEMP_EXTENSION
            }
        };
        self.temp_extension = Some(extension.trim_start_matches('.').to_string());
        self
    }

    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sink = sink;
        self
    }
}

impl SinkConfig {
    pub fn remote(endpoint: impl Into<String>) -> Self {
        SinkConfig::Remote {
            endpoint: endpoint.into(),
            connect_timeout_ms: None,
            write_timeout_ms: None,
        }
    }
}

/// Appends the default archive port to endpoints that lack one.
pub fn endpoint_with_port(endpoint: &str) -> String {
    let has_port = match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    };
    if has_port {
        endpoint.to_string()
    } else if endpoint.contains(':') && !endpoint.starts_with('[') {
        format!("[{endpoint}]:{DEFAULT_REMOTE_PORT}")
    } else {
        format!("{endpoint}:{DEFAULT_REMOTE_PORT}")
    }
}

pub(crate) fn millis(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|ms| *ms > 0).map(Duration::from_millis)
}
