use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use colloquy_service::LoaderConfig;

use crate::error::{ServerError, ServerResult};

/// Server configuration, read from TOML and then overridden from the
/// environment.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
    pub store: StoreConfig,
    pub loader: LoaderSettings,
    pub bus: BusSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            cors_origins: Vec::new(),
            store: StoreConfig::default(),
            loader: LoaderSettings::default(),
            bus: BusSettings::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Postgres,
}

impl std::str::FromStr for StoreKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "memory" | "mem" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => Err(ServerError::Config(format!("unknown store kind: {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub postgres_dsn: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            postgres_dsn: None,
            max_connections: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub delay_ms: u64,
    pub max_batch: usize,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            delay_ms: 2,
            max_batch: 512,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Buffered comments per live stream before that stream back-pressures.
    pub channel_capacity: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(raw: &str) -> ServerResult<Self> {
        toml::from_str(raw).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Read the file at `path`, or start from defaults when there is none.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ServerError::Config(format!("reading {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> ServerResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Apply `STORE`, `POSTGRES_DSN`, `COLLOQUY_BIND`, and `CORS_ORIGINS`.
    pub fn apply_env(self) -> ServerResult<Self> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_env_with<F>(mut self, lookup: F) -> ServerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("STORE") {
            self.store.kind = kind.parse()?;
        }
        if let Some(dsn) = lookup("POSTGRES_DSN").filter(|v| !v.trim().is_empty()) {
            self.store.postgres_dsn = Some(dsn);
        }
        if let Some(bind) = lookup("COLLOQUY_BIND") {
            self.bind_addr = bind
                .trim()
                .parse()
                .map_err(|e| ServerError::Config(format!("invalid COLLOQUY_BIND {bind:?}: {e}")))?;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.cors_origins = parse_origins(&origins);
        }
        Ok(self)
    }

    /// Reject combinations that cannot start.
    pub fn validate(&self) -> ServerResult<()> {
        if self.store.kind == StoreKind::Postgres && self.store.postgres_dsn.is_none() {
            return Err(ServerError::Config(
                "postgres store selected but POSTGRES_DSN is not set".into(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(ServerError::Config("store.max_connections must be positive".into()));
        }
        Ok(())
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig::new(
            Duration::from_millis(self.loader.delay_ms),
            self.loader.max_batch,
        )
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.bus.shutdown_grace_ms)
    }
}

/// Split a comma-separated origin list, dropping blanks.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}
