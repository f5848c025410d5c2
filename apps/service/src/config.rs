use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config: {0}")]
    ReadFailed(#[source] io::Error),
    #[error("failed to write config: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available ($XDG_CONFIG_HOME and $HOME are unset)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub server: Server,
    pub smtp: Smtp,
    pub alerts: Alerts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

/// Outgoing mail relay. Without credentials alert emails are disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Smtp {
    pub host: String,
    pub port: u16,
    /// Implicit TLS; otherwise STARTTLS is used
    pub secure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Sender address, defaults to the username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alerts {
    /// Rate limit given to jobs created without one
    pub default_rate_limit_minutes: u32,
    /// Rate limit applied to stored jobs whose limit is 0
    pub fallback_rate_limit_minutes: u32,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "autoping.db".into() }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { bind: "127.0.0.1".into(), port: 3001 }
    }
}

impl Default for Smtp {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".into(),
            port: 587,
            secure: false,
            username: None,
            password: None,
            from: None,
        }
    }
}

impl Default for Alerts {
    fn default() -> Self {
        Self { default_rate_limit_minutes: 30, fallback_rate_limit_minutes: 60 }
    }
}

impl Smtp {
    /// Username and password, when both are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref().filter(|f| !f.is_empty()).or(self.username.as_deref())
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/autoping/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("autoping/config.toml"))
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
        let unset = "<unset>";

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;
        write_title_1(f, "SMTP")?;
        write_1(f, "Host", &self.smtp.host)?;
        write_1(f, "Port", &self.smtp.port)?;
        write_1(f, "Secure", &self.smtp.secure)?;
        write_1(f, "Username", &self.smtp.username.as_deref().unwrap_or(unset))?;
        write_1(f, "Password", &if self.smtp.password.is_some() { "********" } else { unset })?;
        write_1(f, "From", &self.smtp.sender().unwrap_or(unset))?;
        write_title_1(f, "Alerts")?;
        write_1(f, "Default Rate Limit (min)", &self.alerts.default_rate_limit_minutes)?;
        write_1(f, "Fallback Rate Limit (min)", &self.alerts.fallback_rate_limit_minutes)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/autoping/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// Environment overrides are applied on top, see [`Config::apply_env`].
    ///
    /// ```no_run
    /// let cfg = autoping_service::config::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), autoping_service::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            tracing::info!(path = %config_path.display(), "wrote default config");
            config
        };

        config.apply_env(|name| env::var(name).ok());
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    /// Override fields from environment style variables.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(name: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.parse() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    tracing::warn!("ignoring invalid value for {}: {:?}", name, value);
                    None
                }
            }
        }

        if let Some(path) = lookup("DB_PATH") {
            self.database.path = path.into();
        }
        if let Some(port) = parsed("PORT", lookup("PORT")) {
            self.server.port = port;
        }
        if let Some(host) = lookup("SMTP_HOST") {
            self.smtp.host = host;
        }
        if let Some(port) = parsed("SMTP_PORT", lookup("SMTP_PORT")) {
            self.smtp.port = port;
        }
        if let Some(secure) = lookup("SMTP_SECURE") {
            self.smtp.secure = secure.eq_ignore_ascii_case("true");
        }
        if let Some(user) = lookup("SMTP_USER") {
            self.smtp.username = Some(user);
        }
        if let Some(pass) = lookup("SMTP_PASS") {
            self.smtp.password = Some(pass);
        }
        if let Some(from) = lookup("EMAIL_FROM") {
            self.smtp.from = Some(from);
        }
        if let Some(minutes) = parsed("EMAIL_RATE_LIMIT_MINUTES", lookup("EMAIL_RATE_LIMIT_MINUTES")) {
            self.alerts.fallback_rate_limit_minutes = minutes;
        }
    }
}
