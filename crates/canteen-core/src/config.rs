//! Kiosk configuration.
//!
//! Every field has a default matching the GEC6818 board the kiosk ships on,
//! so an empty file (or no file at all) yields a working configuration.
//! Values are layered: defaults, then the TOML file, then environment
//! variables listed in [`env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config_err;
use crate::error::Result;

/// Default broker endpoint.
pub mod endpoints {
    pub const MQTT_HOST: &str = "127.0.0.1";
    pub const MQTT_PORT: u16 = 1883;
}

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_HOST: &str = "CANTEEN_MQTT_HOST";
    pub const MQTT_PORT: &str = "CANTEEN_MQTT_PORT";
    pub const HARDWARE_SIMULATE: &str = "CANTEEN_HARDWARE_SIMULATE";
    pub const TABLE: &str = "CANTEEN_TABLE";
    pub const LOG_JSON: &str = "CANTEEN_LOG_JSON";
}

/// Board constants for the S5P6818 GPIO banks.
pub mod board {
    /// GPIOB bank, carries the urge button.
    pub const GPIOB_PHY_BASE: u64 = 0xC001_B000;
    /// GPIOC bank, carries the buzzer (PWM2 pad driven as plain GPIO).
    pub const GPIOC_PHY_BASE: u64 = 0xC001_C000;
    pub const KEY_PIN: u8 = 30;
    pub const BEEP_PIN: u8 = 14;
    pub const LED_BRIGHTNESS_PATH: &str = "/sys/class/leds/led1/brightness";
}

/// Top-level kiosk configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub mqtt: MqttSettings,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub kiosk: KioskSettings,
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttSettings {
    /// Broker host name or address
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix of the generated client identifier
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Keep-alive interval in seconds, advertised in CONNECT
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,

    /// Give up on a TCP connect that has not completed after this long
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    endpoints::MQTT_HOST.to_string()
}

fn default_port() -> u16 {
    endpoints::MQTT_PORT
}

fn default_client_id_prefix() -> String {
    "GEC6818_".to_string()
}

fn default_keep_alive() -> u16 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Button, buzzer and LED settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Use in-memory registers instead of `/dev/mem`
    #[serde(default)]
    pub simulate: bool,

    #[serde(default = "default_button_base")]
    pub button_base: u64,

    #[serde(default = "default_button_pin")]
    pub button_pin: u8,

    #[serde(default = "default_buzzer_base")]
    pub buzzer_base: u64,

    #[serde(default = "default_buzzer_pin")]
    pub buzzer_pin: u8,

    #[serde(default = "default_led_path")]
    pub led_path: PathBuf,

    #[serde(default = "default_led_off_delay")]
    pub led_off_delay_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    #[serde(default = "default_beep_tick")]
    pub beep_tick_ms: u64,

    /// Number of toggles before the tone is cut off
    #[serde(default = "default_beep_ticks")]
    pub beep_ticks: u32,
}

fn default_button_base() -> u64 {
    board::GPIOB_PHY_BASE
}

fn default_button_pin() -> u8 {
    board::KEY_PIN
}

fn default_buzzer_base() -> u64 {
    board::GPIOC_PHY_BASE
}

fn default_buzzer_pin() -> u8 {
    board::BEEP_PIN
}

fn default_led_path() -> PathBuf {
    PathBuf::from(board::LED_BRIGHTNESS_PATH)
}

fn default_led_off_delay() -> u64 {
    3000
}

fn default_poll_interval() -> u64 {
    50
}

fn default_debounce() -> u64 {
    300
}

fn default_beep_tick() -> u64 {
    1
}

fn default_beep_ticks() -> u32 {
    150
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            button_base: default_button_base(),
            button_pin: default_button_pin(),
            buzzer_base: default_buzzer_base(),
            buzzer_pin: default_buzzer_pin(),
            led_path: default_led_path(),
            led_off_delay_ms: default_led_off_delay(),
            poll_interval_ms: default_poll_interval(),
            debounce_ms: default_debounce(),
            beep_tick_ms: default_beep_tick(),
            beep_ticks: default_beep_ticks(),
        }
    }
}

/// Per-kiosk identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskSettings {
    /// Table number this kiosk serves
    #[serde(default = "default_table")]
    pub table: u32,
}

fn default_table() -> u32 {
    1
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            table: default_table(),
        }
    }
}

impl KioskConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_err!("cannot read {}: {}", path.display(), e))?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from the process environment.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(env_vars::MQTT_HOST) {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup(env_vars::MQTT_PORT) {
            match port.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid {}", env_vars::MQTT_PORT),
            }
        }
        if let Some(simulate) = lookup(env_vars::HARDWARE_SIMULATE) {
            match simulate.parse() {
                Ok(simulate) => self.hardware.simulate = simulate,
                Err(_) => tracing::warn!(
                    value = %simulate,
                    "Ignoring invalid {}",
                    env_vars::HARDWARE_SIMULATE
                ),
            }
        }
        if let Some(table) = lookup(env_vars::TABLE) {
            match table.parse() {
                Ok(table) => self.kiosk.table = table,
                Err(_) => tracing::warn!(value = %table, "Ignoring invalid {}", env_vars::TABLE),
            }
        }
    }

    /// Reject values the hardware or the broker cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.is_empty() {
            return Err(config_err!("mqtt.host must not be empty"));
        }
        if self.mqtt.port == 0 {
            return Err(config_err!("mqtt.port must be non-zero"));
        }
        if self.mqtt.client_id_prefix.is_empty() {
            return Err(config_err!("mqtt.client_id_prefix must not be empty"));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(config_err!("mqtt.connect_timeout_secs must be non-zero"));
        }

        let hw = &self.hardware;
        for (name, pin) in [("button_pin", hw.button_pin), ("buzzer_pin", hw.buzzer_pin)] {
            if pin > 31 {
                return Err(config_err!("hardware.{} {} exceeds a 32-bit register", name, pin));
            }
        }
        for (name, value) in [
            ("poll_interval_ms", hw.poll_interval_ms),
            ("debounce_ms", hw.debounce_ms),
            ("beep_tick_ms", hw.beep_tick_ms),
        ] {
            if value == 0 {
                return Err(config_err!("hardware.{} must be non-zero", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_board() {
        let config = KioskConfig::default();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.connect_timeout_secs, 10);
        assert_eq!(config.hardware.button_base, 0xC001_B000);
        assert_eq!(config.hardware.buzzer_pin, 14);
        assert_eq!(config.hardware.beep_ticks, 150);
        assert_eq!(config.kiosk.table, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = KioskConfig::from_toml_str(
            r#"
            [mqtt]
            host = "10.0.0.5"

            [hardware]
            simulate = true
            button_base = 0xC001B000
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.host, "10.0.0.5");
        assert_eq!(config.mqtt.port, 1883);
        assert!(config.hardware.simulate);
        assert_eq!(config.hardware.debounce_ms, 300);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (env_vars::MQTT_HOST, "broker.local"),
            (env_vars::MQTT_PORT, "not-a-port"),
            (env_vars::TABLE, "7"),
        ]
        .into_iter()
        .collect();

        let mut config = KioskConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.kiosk.table, 7);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = KioskConfig::default();
        config.hardware.button_pin = 32;
        assert!(config.validate().is_err());

        let mut config = KioskConfig::default();
        config.hardware.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = KioskConfig::default();
        config.mqtt.port = 0;
        assert!(config.validate().is_err());

        let mut config = KioskConfig::default();
        config.mqtt.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
