use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use monodoc_common::{DocError, Result, protocol::ServerVersion};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::IdentitySource;

pub const DEFAULT_CONFIG_PATH: &str = "mdoc.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Version assumed for the in-memory server
    pub server_version: String,
    /// Schema collections are resolved in
    pub schema: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_version: "8.0.19".to_string(),
            schema: "test".to_string(),
        }
    }
}

/// Document identifier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Four hex characters; random when unset
    pub prefix: Option<String>,
    /// How often the time component is refreshed (default: 60s)
    pub refresh_interval_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            refresh_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementConfig {
    /// Row cap applied to finds that set no limit
    pub default_limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub statement: StatementConfig,
}

impl ClientConfig {
    /// Load config from a TOML file, with environment variable overrides.
    /// Falls back to defaults if the file is not found. A `-c`/`--config`
    /// argument or `MDOC_CONFIG` takes the place of `path`.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        ConfigLoader::new().load(path)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: ClientConfig =
            toml::from_str(text).map_err(|e| DocError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn server_version(&self) -> Result<ServerVersion> {
        self.session.server_version.parse()
    }

    pub fn identity_source(&self) -> Result<IdentitySource> {
        IdentitySource::new(
            self.identity.prefix.as_deref(),
            Duration::from_secs(self.identity.refresh_interval_secs),
        )
    }

    pub fn validate(&self) -> Result<()> {
        self.server_version()?;
        if let Some(prefix) = &self.identity.prefix
            && (prefix.len() != 4 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(DocError::Config(format!(
                "identity.prefix must be 4 hex characters, got '{prefix}'"
            )));
        }
        if self.statement.default_limit == Some(0) {
            return Err(DocError::Config(
                "statement.default_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolves configuration from file, CLI args, and environment variables.
pub struct ConfigLoader {
    args: Vec<String>,
    config_arg: Option<PathBuf>,
    env: Box<dyn Fn(&str) -> Option<String>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            args: env::args().collect(),
            config_arg: None,
            env: Box::new(|key| env::var(key).ok()),
        }
    }

    /// Loader over explicit arguments and variables instead of the process's.
    pub fn with_sources(
        args: Vec<String>,
        env: impl Fn(&str) -> Option<String> + 'static,
    ) -> Self {
        Self {
            args,
            config_arg: None,
            env: Box::new(env),
        }
    }

    /// A config path already parsed from the command line. Takes the place
    /// of scanning the raw arguments for `-c`/`--config`.
    pub fn with_config_arg(mut self, path: Option<PathBuf>) -> Self {
        self.config_arg = path;
        self
    }

    pub fn load<P: AsRef<Path>>(&self, default_path: P) -> Result<ClientConfig> {
        let cfg_path = self.resolve_config_path(default_path);
        debug!(path = %cfg_path.display(), "Loading configuration");

        let mut cfg = match fs::read_to_string(&cfg_path) {
            Ok(s) => toml::from_str(&s).map_err(|e| {
                DocError::Config(format!("{}: {e}", cfg_path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientConfig::default(),
            Err(e) => return Err(e.into()),
        };

        self.apply_env_overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Config path from the command line, then `MDOC_CONFIG`, then the default.
    fn resolve_config_path<P: AsRef<Path>>(&self, default_path: P) -> PathBuf {
        if let Some(p) = self.config_arg.clone() {
            p
        } else if let Some(p) = Self::find_config_arg(&self.args) {
            p
        } else if let Some(env_path) = (self.env)("MDOC_CONFIG") {
            PathBuf::from(env_path)
        } else {
            default_path.as_ref().to_path_buf()
        }
    }

    /// Find --config or -c flag in arguments.
    fn find_config_arg(args: &[String]) -> Option<PathBuf> {
        let mut iter = args.iter().peekable();
        while let Some(a) = iter.next() {
            if a.starts_with("--config=") || a.starts_with("-c=") {
                if let Some((_, val)) = a.split_once('=') {
                    return Some(PathBuf::from(val));
                }
            } else if (a == "--config" || a == "-c")
                && let Some(next) = iter.peek()
            {
                return Some(PathBuf::from((*next).clone()));
            }
        }
        None
    }

    /// Apply MDOC_* environment variable overrides.
    fn apply_env_overrides(&self, cfg: &mut ClientConfig) {
        if let Some(v) = (self.env)("MDOC_SERVER_VERSION") {
            cfg.session.server_version = v;
        }

        if let Some(v) = (self.env)("MDOC_SCHEMA") {
            cfg.session.schema = v;
        }

        if let Some(v) = (self.env)("MDOC_ID_PREFIX") {
            cfg.identity.prefix = Some(v);
        }
    }
}
