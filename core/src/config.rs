//! Configuration management
//!
//! Configuration is a flat two-level store: sections containing string
//! options. It is shared between the client and every plugin, so all access
//! goes through a mutex. An option holding an empty string is treated
//! exactly like a missing option.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Section holding the server and identity options
pub const SERVER_SECTION: &str = "server";

/// Section holding transport and pacing options
pub const CONNECTION_SECTION: &str = "connection";

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Thread-safe section/option store
#[derive(Debug, Default)]
pub struct ConfigStore {
    sections: Mutex<Sections>,
}

impl ConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text. Every top-level table becomes a
    /// section; scalar values are stored in their string form.
    pub fn from_toml(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut sections = Sections::new();

        for (name, value) in table {
            let toml::Value::Table(options) = value else {
                return Err(Error::Config(format!("'{}' is not a section", name)));
            };
            let section = sections.entry(name.clone()).or_default();
            for (option, value) in options {
                let value = match value {
                    toml::Value::String(s) => s,
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    other => {
                        return Err(Error::Config(format!(
                            "Unsupported value for {}.{}: {}",
                            name, option, other
                        )))
                    }
                };
                section.insert(option, value);
            }
        }

        Ok(Self {
            sections: Mutex::new(sections),
        })
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_toml()?)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Render configuration as TOML text. Every value is written as a string
    /// so that it loads back unchanged.
    pub fn to_toml(&self) -> Result<String> {
        let mut table = toml::Table::new();
        for (name, options) in self.sections.lock().iter() {
            let section = options
                .iter()
                .map(|(option, value)| (option.clone(), toml::Value::String(value.clone())))
                .collect::<toml::Table>();
            table.insert(name.clone(), toml::Value::Table(section));
        }
        Ok(toml::to_string_pretty(&table)?)
    }

    /// Get a string option; `None` if the option is missing or empty
    pub fn get_string(&self, section: &str, option: &str) -> Option<String> {
        self.sections
            .lock()
            .get(section)
            .and_then(|s| s.get(option))
            .filter(|v| !v.is_empty())
            .cloned()
    }

    /// Set a string option, creating the section if needed
    pub fn set_string(&self, section: &str, option: &str, value: &str) {
        self.sections
            .lock()
            .entry(section.to_string())
            .or_default()
            .insert(option.to_string(), value.to_string());
    }

    /// Remove an option. The section itself is kept even if it ends up empty.
    pub fn remove_option(&self, section: &str, option: &str) {
        if let Some(s) = self.sections.lock().get_mut(section) {
            s.remove(option);
        }
    }

    /// Option names of a section; empty if the section does not exist
    pub fn options(&self, section: &str) -> Vec<String> {
        self.sections
            .lock()
            .get(section)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get an integer option
    pub fn get_int(&self, section: &str, option: &str) -> Result<i64> {
        let value = self
            .get_string(section, option)
            .ok_or_else(|| Error::Config(format!("Option {}.{} is not set", section, option)))?;
        value.trim().parse().map_err(|_| {
            Error::Config(format!("Option {}.{} is not an integer: {}", section, option, value))
        })
    }

    /// Set an integer option
    pub fn set_int(&self, section: &str, option: &str, value: i64) {
        self.set_string(section, option, &value.to_string());
    }

    /// Get a boolean option. Accepts `true`/`false`, `yes`/`no` and `1`/`0`.
    pub fn get_bool(&self, section: &str, option: &str) -> Option<bool> {
        match self.get_string(section, option)?.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    fn get_int_or(&self, section: &str, option: &str, default: i64) -> Result<i64> {
        match self.get_string(section, option) {
            Some(_) => self.get_int(section, option),
            None => Ok(default),
        }
    }
}

/// Identity and server address, read from the `server` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// `host:port` to connect to
    pub host: String,
    /// Nickname requested at registration
    pub nick: String,
    /// Ident (user name) sent with USER
    pub ident: String,
    /// Real name sent with USER
    pub realname: String,
    /// Prefix that marks a chat message as a command
    pub trigger: String,
}

impl ServerSettings {
    /// Extract and validate server settings
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        let host = store
            .get_string(SERVER_SECTION, "host")
            .ok_or_else(|| Error::Config("server.host is required".to_string()))?;
        if !host.contains(':') {
            return Err(Error::Config(format!("server.host must be host:port, got {}", host)));
        }

        let nick = store
            .get_string(SERVER_SECTION, "nick")
            .ok_or_else(|| Error::Config("server.nick is required".to_string()))?;
        if nick.contains(' ') {
            return Err(Error::Config(format!("Invalid nickname: {}", nick)));
        }

        let ident = store.get_string(SERVER_SECTION, "ident").unwrap_or_else(|| nick.clone());
        let realname = store.get_string(SERVER_SECTION, "realname").unwrap_or_else(|| nick.clone());
        let trigger = store.get_string(SERVER_SECTION, "trigger").unwrap_or_else(|| "!".to_string());

        Ok(Self {
            host,
            nick,
            ident,
            realname,
            trigger,
        })
    }
}

/// Transport and pacing settings, read from the `connection` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Capacity of the outbound line queue
    pub queue_capacity: usize,
    /// Whether outbound lines are paced
    pub flood_enabled: bool,
    /// Lines that may be sent back to back before pacing starts
    pub flood_burst: u32,
    /// Interval between paced lines
    pub flood_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            queue_capacity: 256,
            flood_enabled: true,
            flood_burst: 5,
            flood_interval: Duration::from_millis(2000),
        }
    }
}

impl ConnectionSettings {
    /// Extract connection settings, falling back to defaults for missing options
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        let defaults = Self::default();
        let section = CONNECTION_SECTION;

        let timeout = store.get_int_or(section, "connect_timeout_secs", defaults.connect_timeout.as_secs() as i64)?;
        let capacity = store.get_int_or(section, "queue_capacity", defaults.queue_capacity as i64)?;
        let burst = store.get_int_or(section, "flood_burst", i64::from(defaults.flood_burst))?;
        let interval = store.get_int_or(section, "flood_interval_ms", defaults.flood_interval.as_millis() as i64)?;

        if timeout <= 0 {
            return Err(Error::Config("connection.connect_timeout_secs must be positive".to_string()));
        }
        if capacity <= 0 {
            return Err(Error::Config("connection.queue_capacity must be positive".to_string()));
        }
        if burst <= 0 || interval < 0 {
            return Err(Error::Config("connection flood settings must be positive".to_string()));
        }

        Ok(Self {
            connect_timeout: Duration::from_secs(timeout as u64),
            queue_capacity: capacity as usize,
            flood_enabled: store.get_bool(section, "flood_enabled").unwrap_or(defaults.flood_enabled),
            flood_burst: u32::try_from(burst)
                .map_err(|_| Error::Config("connection.flood_burst is too large".to_string()))?,
            flood_interval: Duration::from_millis(interval as u64),
        })
    }
}
