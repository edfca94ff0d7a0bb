use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Built once at startup and handed to the session manager, dispatcher and
/// fetcher; never mutated afterwards.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub download: DownloadSettings,
    pub log_level: String,
}

/// Broker connection and subscription settings.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Broker URL, e.g. `ssl://broker.example.org:8883`.
    pub server: String,
    /// Topic filter to subscribe to.
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    /// CA bundle used to verify the broker. Without it verification is skipped.
    pub cafile: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub qos: u8,
    pub keep_alive_secs: u64,
    pub connect_retry_secs: u64,
    pub max_reconnect_secs: u64,
    pub disconnect_grace_ms: u64,
    pub max_packet_size: usize,
}

impl BrokerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_secs(self.connect_retry_secs)
    }

    pub fn max_reconnect(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

/// Where and how files are retrieved.
#[derive(Debug, Deserialize, Clone)]
pub struct DownloadSettings {
    pub dir: PathBuf,
    /// Upper bound on fetches running at once, across all notifications.
    pub max_concurrent_fetches: usize,
    pub request_timeout_secs: u64,
    /// How long shutdown waits for the notification being handled.
    pub shutdown_grace_secs: u64,
}

impl DownloadSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub download: Option<PartialDownloadSettings>,
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub server: Option<String>,
    pub topic: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub cafile: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub qos: Option<u8>,
    pub keep_alive_secs: Option<u64>,
    pub connect_retry_secs: Option<u64>,
    pub max_reconnect_secs: Option<u64>,
    pub disconnect_grace_ms: Option<u64>,
    pub max_packet_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialDownloadSettings {
    pub dir: Option<PathBuf>,
    pub max_concurrent_fetches: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

/// Values given on the command line. They win over every other source.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub server: Option<String>,
    pub topic: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cafile: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub download: Option<PathBuf>,
    pub client_id: Option<String>,
    pub max_concurrent_fetches: Option<usize>,
    pub log_level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// `server` and `topic` have no usable default and are left empty so that
/// validation reports them as missing.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                server: String::new(),
                topic: String::new(),
                username: None,
                password: None,
                client_id: "wis2-mqtt-subscriber".to_string(),
                cafile: None,
                cert: None,
                key: None,
                qos: 0,
                keep_alive_secs: 60,
                connect_retry_secs: 5,
                max_reconnect_secs: 60,
                disconnect_grace_ms: 250,
                max_packet_size: 256 * 1024,
            },
            download: DownloadSettings {
                dir: PathBuf::from("downloads"),
                max_concurrent_fetches: 8,
                request_timeout_secs: 300,
                shutdown_grace_secs: 30,
            },
            log_level: "info".to_string(),
        }
    }
}
