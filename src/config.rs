//! Configuration file handling for the daemon

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub console: ConsoleConfig,
    pub data: DataConfig,
    pub server: ServerConfig,
    pub intervals: IntervalConfig,
}

impl Config {
    /// Get the config file path for this platform
    pub fn path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "vantage-sync").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load config from file, or create default if it doesn't exist
    pub fn load_or_create() -> Result<Self, Box<dyn Error>> {
        let path = Self::path().ok_or("could not determine config directory")?;

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_with_header()?;
            println!("created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        let path = Self::path().ok_or("could not determine config directory")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        Ok(())
    }

    /// Save config with header comments for new files
    pub fn save_with_header(&self) -> Result<(), Box<dyn Error>> {
        let path = Self::path().ok_or("could not determine config directory")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let header = r#"# vantage-sync configuration file
# https://github.com/ozwaldorf/vantage-sync

"#;
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, format!("{header}{contents}"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Serial device the console is attached to
    pub device: String,
    /// Console line speed
    pub baud: u32,
    /// Rain collector click size ("0.01-in", "0.2-mm" or "0.1-mm"), used
    /// for data-plane rendering until the console reports its setup bits
    pub rain_collector: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".into(),
            baud: 19200,
            rain_collector: "0.01-in".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the archive, backups, packet files and checkpoints
    pub directory: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        let directory = ProjectDirs::from("", "", "vantage-sync")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("vantage-data"));
        Self { directory }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Enable the JSON command ingress
    pub enabled: bool,
    /// Listen address for newline-delimited JSON commands
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:11463".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Delay before retrying a failed console connection
    #[serde(with = "humantime_serde")]
    pub retry: Duration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            retry: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.console.baud, 19200);
        assert_eq!(parsed.console.rain_collector, "0.01-in");
        assert!(parsed.server.enabled);
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let parsed: Config = toml::from_str("[console]\ndevice = \"/dev/ttyS1\"\n").unwrap();
        assert_eq!(parsed.console.device, "/dev/ttyS1");
        assert_eq!(parsed.console.baud, 19200);
        assert_eq!(parsed.intervals.retry, Duration::from_secs(5));
    }
}
