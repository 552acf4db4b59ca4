use std::{env, fmt, fs, path};

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::checks::prober::ProbeConfig;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write config file: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("no usable config path (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),
    #[error("invalid probe base URL {0:?}")]
    InvalidBaseUrl(String),
    #[error("schedule has no check times")]
    NoCheckTimes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub probe: Probe,
    pub schedule: Schedule,
    pub database: Database,
    pub api: Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub concurrent_requests: usize,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Wall-clock check times in the configured timezone, "HH:MM"
    pub check_times: Vec<String>,
    /// Nightly maintenance (database backup) time, "HH:MM"
    pub maintenance_time: String,
    /// IANA timezone name, e.g. "America/New_York"
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub path: path::PathBuf,
    pub backup_dir: path::PathBuf,
    pub backup_keep: usize,
    /// Optional newline-separated TPN roster imported at startup
    pub tpn_file: Option<path::PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    pub bind: String,
    pub port: u16,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/termwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("termwatch/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe: Probe {
                base_url: "https://spinpos.net/spin/GetTerminalStatus".into(),
                timeout_seconds: 30,
                max_retries: 3,
                concurrent_requests: 30,
                jitter_ms: 500,
            },
            schedule: Schedule {
                check_times: vec!["08:00".into(), "14:00".into(), "20:00".into()],
                maintenance_time: "02:00".into(),
                timezone: "America/New_York".into(),
            },
            database: Database {
                path: "./termwatch.db".into(),
                backup_dir: "./backups".into(),
                backup_keep: 7,
                tpn_file: None,
            },
            api: Api { bind: "0.0.0.0".into(), port: 8080 },
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Probe")?;
        write_1(f, "Base URL", &self.probe.base_url)?;
        write_1(f, "Timeout (s)", &self.probe.timeout_seconds)?;
        write_1(f, "Max Retries", &self.probe.max_retries)?;
        write_1(f, "Concurrent Requests", &self.probe.concurrent_requests)?;
        write_title_1(f, "Schedule")?;
        write_1(f, "Check Times", &self.schedule.check_times.join(", "))?;
        write_1(f, "Maintenance Time", &self.schedule.maintenance_time)?;
        write_1(f, "Timezone", &self.schedule.timezone)?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Backup Dir", &self.database.backup_dir.display())?;
        write_title_1(f, "API")?;
        write_1(f, "Bind Address", &self.api.bind)?;
        write_1(f, "Port", &self.api.port)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/termwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::Read)?;
            toml::from_str(raw_string.as_str()).map_err(|err| Error::Parse(err.to_string()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|err| Error::Parse(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::Write)?;
        }

        fs::write(path, config_str).map_err(Error::Write)
    }

    /// Reject configs the engine cannot run with before anything starts.
    pub fn validate(&self) -> Result<(), Error> {
        url::Url::parse(&self.probe.base_url)
            .map_err(|_| Error::InvalidBaseUrl(self.probe.base_url.clone()))?;
        self.schedule.check_times()?;
        self.schedule.maintenance()?;
        self.schedule.tz()?;
        Ok(())
    }
}

impl Probe {
    pub fn to_probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            base_url: self.base_url.clone(),
            timeout_seconds: self.timeout_seconds,
            max_retries: self.max_retries,
            jitter_ms: self.jitter_ms,
            backoff_base_ms: 1000,
        }
    }
}

impl Schedule {
    pub fn check_times(&self) -> Result<Vec<NaiveTime>, Error> {
        if self.check_times.is_empty() {
            return Err(Error::NoCheckTimes);
        }
        self.check_times.iter().map(|time| parse_time_of_day(time)).collect()
    }

    pub fn maintenance(&self) -> Result<NaiveTime, Error> {
        parse_time_of_day(&self.maintenance_time)
    }

    pub fn tz(&self) -> Result<Tz, Error> {
        self.timezone.parse().map_err(|_| Error::InvalidTimezone(self.timezone.clone()))
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime, Error> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| Error::InvalidTime(value.to_string()))
}
