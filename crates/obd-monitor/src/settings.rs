//! Monitor settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file, then `OBD_MONITOR__*` environment variables
//! (e.g. `OBD_MONITOR__POLLER__PID=13`).

use config::{Config, ConfigError, Environment, File};
use obd_protocol::{ObdProtocol, PollerConfig};
use serde::{Deserialize, Serialize};

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "obd-monitor.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "OBD_MONITOR";

/// Simulated ECU settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EcuSettings {
    /// Answer requests at all; a disabled ECU exercises the timeout path
    pub enabled: bool,
    /// Identifier the ECU answers on
    pub response_id: u16,
    /// Idle engine speed the simulation sweeps up from (rpm, capped at `MAX_IDLE_RPM`)
    pub idle_rpm: u16,
}

impl Default for EcuSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            response_id: 0x7E7,
            idle_rpm: 800,
        }
    }
}

/// Top-level monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bus profile (selects the bit rate)
    pub protocol: ObdProtocol,
    /// Controller input clock (Hz)
    pub clock_hz: u32,
    /// Ready polls before bring-up fails
    pub ready_attempts: u32,
    /// Main loop period (milliseconds)
    pub loop_period_ms: u64,
    /// Maximum log level: trace, debug, info, warn, error
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
    pub poller: PollerConfig,
    pub ecu: EcuSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            protocol: ObdProtocol::default(),
            clock_hz: 16_000_000,
            ready_attempts: 10_000,
            loop_period_ms: 10,
            log_level: "info".to_string(),
            log_json: false,
            poller: PollerConfig::default(),
            ecu: EcuSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings; an explicit `path` must exist, the default file may not
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = File::with_name(path.unwrap_or(DEFAULT_CONFIG_FILE)).required(path.is_some());

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Mutex, MutexGuard};

    // Environment variables are process-wide; loads that read them run one at a time
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("obd-monitor-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let _guard = env_lock();
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.protocol.bit_rate(), 500_000);
        assert_eq!(settings.poller.pid, 0x0C);
        assert_eq!(settings.poller.response_id, Some(0x7E7));
        assert_eq!(settings.poller.response_filter(), (0x7E7, 0x7FF));
        assert!(settings.ecu.enabled);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let _guard = env_lock();
        assert!(Settings::load(Some("/nonexistent/obd-monitor.toml")).is_err());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let _guard = env_lock();
        let path = write_config(
            "monitor.toml",
            "protocol = \"Iso15765_4Can11bit250\"\n\
             loop_period_ms = 5\n\
             [poller]\n\
             pid = 13\n\
             validate_echo = false\n\
             [ecu]\n\
             enabled = false\n",
        );

        let settings = Settings::load(path.to_str()).unwrap();

        assert_eq!(settings.protocol, ObdProtocol::Iso15765_4Can11bit250);
        assert_eq!(settings.loop_period_ms, 5);
        assert_eq!(settings.poller.pid, 13);
        assert!(!settings.poller.validate_echo);
        assert_eq!(settings.poller.request_id, 0x7DF);
        assert!(!settings.ecu.enabled);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_can_select_unfiltered_receive() {
        let _guard = env_lock();
        let path = write_config(
            "unfiltered.toml",
            "[poller]\n\
             pid = 12\n\
             accept_any_response = true\n",
        );

        let settings = Settings::load(path.to_str()).unwrap();

        assert!(settings.poller.accept_any_response);
        assert_eq!(settings.poller.response_filter(), (0, 0));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        let _guard = env_lock();
        std::env::set_var("OBD_MONITOR__POLLER__PID", "13");
        std::env::set_var("OBD_MONITOR__POLLER__ACCEPT_ANY_RESPONSE", "true");

        let result = Settings::load(None);

        std::env::remove_var("OBD_MONITOR__POLLER__PID");
        std::env::remove_var("OBD_MONITOR__POLLER__ACCEPT_ANY_RESPONSE");

        let settings = result.unwrap();
        assert_eq!(settings.poller.pid, 13);
        assert_eq!(settings.poller.response_filter(), (0, 0));
        assert_eq!(settings.poller.request_id, 0x7DF);
    }
}
