//! The `config` module loads the immutable `Settings` used by the whole process.
//!
//! Sources, lowest priority first: built-in defaults, an optional settings
//! file, `WIS2FILES_*` environment variables, and command-line overrides.

mod settings;


use std::path::Path;

use config::{Config, Environment, File};

use crate::utils::error::ConfigError;
use settings::PartialSettings;

pub use settings::{BrokerSettings, DownloadSettings, Overrides, Settings};

/// Environment variable prefix, e.g. `WIS2FILES_BROKER__SERVER`.
pub const ENV_PREFIX: &str = "WIS2FILES";

/// Loads the configuration from the settings file and environment variables
/// and merges it over the default values.
///
/// Without an explicit `path` the optional `config/default` file is used.
pub fn load_config(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("config/default").required(false),
    };

    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

/// Fills every value missing from `partial` with the one from `default`.
fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let broker = partial.broker.unwrap_or_default();
    let download = partial.download.unwrap_or_default();

    Settings {
        broker: BrokerSettings {
            server: broker.server.unwrap_or(default.broker.server),
            topic: broker.topic.unwrap_or(default.broker.topic),
            username: broker.username.or(default.broker.username),
            password: broker.password.or(default.broker.password),
            client_id: broker.client_id.unwrap_or(default.broker.client_id),
            cafile: broker.cafile.or(default.broker.cafile),
            cert: broker.cert.or(default.broker.cert),
            key: broker.key.or(default.broker.key),
            qos: broker.qos.unwrap_or(default.broker.qos),
            keep_alive_secs: broker
                .keep_alive_secs
                .unwrap_or(default.broker.keep_alive_secs),
            connect_retry_secs: broker
                .connect_retry_secs
                .unwrap_or(default.broker.connect_retry_secs),
            max_reconnect_secs: broker
                .max_reconnect_secs
                .unwrap_or(default.broker.max_reconnect_secs),
            disconnect_grace_ms: broker
                .disconnect_grace_ms
                .unwrap_or(default.broker.disconnect_grace_ms),
            max_packet_size: broker
                .max_packet_size
                .unwrap_or(default.broker.max_packet_size),
        },
        download: DownloadSettings {
            dir: download.dir.unwrap_or(default.download.dir),
            max_concurrent_fetches: download
                .max_concurrent_fetches
                .unwrap_or(default.download.max_concurrent_fetches),
            request_timeout_secs: download
                .request_timeout_secs
                .unwrap_or(default.download.request_timeout_secs),
            shutdown_grace_secs: download
                .shutdown_grace_secs
                .unwrap_or(default.download.shutdown_grace_secs),
        },
        log_level: partial.log_level.unwrap_or(default.log_level),
    }
}

impl Settings {
    /// Applies command-line values on top of the loaded settings.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(server) = overrides.server {
            self.broker.server = server;
        }
        if let Some(topic) = overrides.topic {
            self.broker.topic = topic;
        }
        if let Some(client_id) = overrides.client_id {
            self.broker.client_id = client_id;
        }
        if let Some(dir) = overrides.download {
            self.download.dir = dir;
        }
        if let Some(max) = overrides.max_concurrent_fetches {
            self.download.max_concurrent_fetches = max;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        self.broker.username = overrides.username.or(self.broker.username);
        self.broker.password = overrides.password.or(self.broker.password);
        self.broker.cafile = overrides.cafile.or(self.broker.cafile);
        self.broker.cert = overrides.cert.or(self.broker.cert);
        self.broker.key = overrides.key.or(self.broker.key);
        self
    }

    /// Checks required values and ranges. Called once before anything connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let broker = &self.broker;
        if broker.server.trim().is_empty() {
            return Err(ConfigError::Missing("server"));
        }
        if broker.topic.trim().is_empty() {
            return Err(ConfigError::Missing("topic"));
        }
        if broker.client_id.is_empty() || broker.client_id.starts_with(' ') {
            return Err(ConfigError::Invalid {
                key: "clientid",
                message: "must be non-empty and not start with a space".to_string(),
            });
        }
        match (&broker.cert, &broker.key) {
            (Some(_), None) => return Err(ConfigError::Missing("key (cert was given)")),
            (None, Some(_)) => return Err(ConfigError::Missing("cert (key was given)")),
            _ => {}
        }
        if broker.qos > 2 {
            return Err(ConfigError::Invalid {
                key: "qos",
                message: format!("{} is not 0, 1 or 2", broker.qos),
            });
        }
        if broker.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid {
                key: "keep_alive_secs",
                message: "must be at least 5".to_string(),
            });
        }
        if broker.max_reconnect_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "max_reconnect_secs",
                message: "must be positive".to_string(),
            });
        }
        if self.download.max_concurrent_fetches == 0 {
            return Err(ConfigError::Invalid {
                key: "max_concurrent_fetches",
                message: "must be at least 1".to_string(),
            });
        }
        if self.download.dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("download"));
        }
        Ok(())
    }
}
