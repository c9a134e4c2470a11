//! Driver configuration.
//!
//! Configuration is read from a YAML file and may be overridden from the
//! command line:
//!
//! ```yaml
//! port: /dev/ttyS1
//! baud_rate: 57600
//! command_timeout_ms: 5000
//! checksum_policy: verify
//! menu_sub_commands:
//!   TEMP_CONTROLLER_SETTING: 0x0A
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

/// What to do with an inbound frame whose checksum does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// Drop the frame without replying; the VMC will poll or resend.
    #[default]
    Verify,
    /// Dispatch the frame regardless of its checksum.
    Trust,
}

/// Configuration for a driver instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Serial device path.
    pub port: String,
    /// Baud rate of the VMC link.
    pub baud_rate: u32,
    /// Read timeout on the transport; bounds how quickly shutdown is noticed.
    pub read_timeout_ms: u64,
    /// Default bound on how long a blocking submitter waits.
    pub command_timeout_ms: u64,
    /// Inbound checksum handling.
    pub checksum_policy: ChecksumPolicy,
    /// Queue REQUEST_INFO_SYNC as soon as the driver starts.
    pub startup_sync: bool,
    /// Menu sub-command name to the byte placed first in a 0x70 payload.
    pub menu_sub_commands: BTreeMap<String, u8>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            port: "/dev/ttyS1".to_string(),
            baud_rate: 57600,
            read_timeout_ms: 50,
            command_timeout_ms: 5000,
            checksum_policy: ChecksumPolicy::Verify,
            startup_sync: true,
            menu_sub_commands: BTreeMap::new(),
        }
    }
}

impl DriverConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> DriverResult<Self> {
        serde_yaml::from_str(text).map_err(|e| DriverError::Config(e.to_string()))
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> DriverResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Default command timeout as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Resolve a menu sub-command name (case-insensitive).
    pub fn menu_sub_command(&self, name: &str) -> DriverResult<u8> {
        self.menu_sub_commands
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
            .ok_or_else(|| DriverError::UnknownSubCommand(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.checksum_policy, ChecksumPolicy::Verify);
        assert!(config.startup_sync);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = DriverConfig::from_yaml_str(
            "port: /dev/ttyUSB0\nchecksum_policy: trust\nmenu_sub_commands:\n  TEMP_CONTROLLER_SETTING: 10\n",
        )
        .unwrap();
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.checksum_policy, ChecksumPolicy::Trust);
        assert_eq!(config.menu_sub_command("temp_controller_setting").unwrap(), 10);
    }

    #[test]
    fn test_unknown_sub_command() {
        let config = DriverConfig::default();
        assert!(matches!(
            config.menu_sub_command("NOPE"),
            Err(DriverError::UnknownSubCommand(name)) if name == "NOPE"
        ));
    }

    #[test]
    fn test_bad_yaml() {
        assert!(matches!(
            DriverConfig::from_yaml_str("baud_rate: fast"),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vmc.yaml");
        std::fs::write(&path, "baud_rate: 9600\nstartup_sync: false\n").unwrap();

        let config = DriverConfig::load(&path).unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert!(!config.startup_sync);

        assert!(matches!(
            DriverConfig::load(dir.path().join("missing.yaml")),
            Err(DriverError::Config(_))
        ));
    }
}
