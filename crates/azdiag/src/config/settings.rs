//! Settings loaded from `.env`, an optional `azdiag.toml` and the process
//! environment

use config::{Config, Environment, File, Source};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Name of the optional settings file (any extension `config` understands)
pub const SETTINGS_FILE: &str = "azdiag";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings")]
    Load(#[from] config::ConfigError),
    #[error("{variable} is not configured")]
    Missing { variable: String },
}

fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => debug!(error = %e, "ignoring unreadable .env"),
    }
}

/// Flat key/value settings keyed by environment variable name
///
/// Keys are case-insensitive. Empty values count as unset. Environment
/// variables take priority over `azdiag.toml`.
#[derive(Debug, Clone)]
pub struct Settings {
    source: Config,
}

impl Settings {
    /// Load `.env` into the process environment, then merge the settings file
    /// and the environment
    pub fn load() -> Result<Self, SettingsError> {
        load_dotenv();
        Self::with_file(File::with_name(SETTINGS_FILE).required(false))
    }

    /// Merge `path` under the process environment; the file must exist
    pub fn load_file(path: &Path) -> Result<Self, SettingsError> {
        Self::with_file(File::from(path).required(true))
    }

    fn with_file(file: impl Source) -> Result<Self, SettingsError> {
        // environment keys arrive lowercased, so file keys are folded the same way
        let mut builder = Config::builder();
        for (key, value) in file.collect()? {
            builder = builder.set_default(key.to_lowercase(), value)?;
        }
        let source = builder.add_source(Environment::default()).build()?;
        Ok(Self { source })
    }

    /// Settings from explicit pairs only, ignoring files and the environment
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(key.as_ref().to_lowercase(), value.into())?;
        }
        Ok(Self {
            source: builder.build()?,
        })
    }

    /// Empty settings
    pub fn empty() -> Self {
        Self {
            source: Config::default(),
        }
    }

    /// Value of a variable, `None` when unset or empty
    pub fn lookup(&self, variable: &str) -> Option<String> {
        self.source
            .get_string(&variable.to_lowercase())
            .ok()
            .filter(|v| !v.is_empty())
    }

    /// Value of a variable, or an error naming it
    pub fn require(&self, variable: &str) -> Result<String, SettingsError> {
        self.lookup(variable).ok_or_else(|| SettingsError::Missing {
            variable: variable.to_string(),
        })
    }

    /// Value together with the variable it came from
    pub fn value(&self, variable: &str) -> ConfigValue {
        ConfigValue {
            variable: variable.to_string(),
            value: self.lookup(variable),
        }
    }

    /// First set variable among `variables`, reporting the last one when none
    /// is set
    pub fn first_of(&self, variables: &[&str]) -> ConfigValue {
        variables
            .iter()
            .map(|v| self.value(v))
            .find(|v| v.value.is_some())
            .unwrap_or_else(|| ConfigValue {
                variable: variables.last().copied().unwrap_or_default().to_string(),
                value: None,
            })
    }

    pub fn lookup_u64(&self, variable: &str) -> Option<u64> {
        self.lookup(variable).and_then(|v| v.trim().parse().ok())
    }

    pub fn lookup_bool(&self, variable: &str) -> bool {
        self.lookup(variable)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn build_id(&self) -> Option<String> {
        self.lookup("BUILD_ID")
    }

    pub fn hostname(&self) -> String {
        self.lookup("HOSTNAME")
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn port(&self) -> u16 {
        self.lookup("PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(3000)
    }

    /// Whether secret values may appear in error hints
    pub fn show_keys_in_errors(&self) -> bool {
        self.lookup_bool("DANGER_SHOW_KEYS_IN_ERRORS")
    }

    pub fn app_insights_connection_string(&self) -> Option<String> {
        self.lookup("APPLICATIONINSIGHTS_CONNECTION_STRING")
    }
}

/// A setting value and the variable that holds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue {
    pub variable: String,
    pub value: Option<String>,
}

impl ConfigValue {
    pub fn require(&self) -> Result<String, SettingsError> {
        self.value.clone().ok_or_else(|| SettingsError::Missing {
            variable: self.variable.clone(),
        })
    }
}

/// Lists the settings a failing call depends on, so the log says which
/// variables to check
#[derive(Debug, Clone)]
pub struct ConfigHint {
    title: String,
    show_keys: bool,
    lines: Vec<String>,
}

impl ConfigHint {
    pub fn new(title: impl Into<String>, show_keys: bool) -> Self {
        Self {
            title: title.into(),
            show_keys,
            lines: Vec::new(),
        }
    }

    pub fn value(mut self, label: &str, value: &ConfigValue) -> Self {
        let shown = value.value.as_deref().unwrap_or("");
        self.lines
            .push(format!("{}: {} -- {}", label, shown, value.variable));
        self
    }

    /// Secrets print as `has value` / `no value` unless keys may be shown
    pub fn secret(mut self, label: &str, value: &ConfigValue) -> Self {
        let shown = match (&value.value, self.show_keys) {
            (Some(v), true) => v.as_str(),
            (Some(_), false) => "has value",
            (None, _) => "no value",
        };
        self.lines
            .push(format!("{}: {} -- {}", label, shown, value.variable));
        self
    }
}

impl fmt::Display for ConfigHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        write!(f, "  check environment variables:")?;
        for line in &self.lines {
            write!(f, "\n    {}", line)?;
        }
        Ok(())
    }
}
