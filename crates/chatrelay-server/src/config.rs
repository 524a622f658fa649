use anyhow::{Context, anyhow, bail};
use chatrelay_core::backend::{BackendConfig, DEFAULT_TIMEOUT};
use chatrelay_core::context::{DEFAULT_KEY_PREFIX, DEFAULT_STALE_AFTER};
use chatrelay_core::resume::DEFAULT_RESUME_WINDOW;
use chatrelay_core::stream::DEFAULT_TEE_BUFFER;
use chatrelay_core::{RegistryBackend, StreamSettings};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendConfig,
    pub jwt_secret: String,
    pub streams: StreamSettings,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    backend: BackendSection,
    #[serde(default)]
    auth: AuthSection,
    #[serde(default)]
    streams: StreamsSection,
    #[serde(default)]
    cors: CorsSection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BackendSection {
    #[serde(default = "default_backend_url")]
    url: String,
    #[serde(default)]
    api_secret: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            api_secret: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AuthSection {
    #[serde(default)]
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct StreamsSection {
    #[serde(default = "default_registry")]
    registry: String,
    #[serde(default = "default_registry_path")]
    path: PathBuf,
    #[serde(default = "default_key_prefix")]
    key_prefix: String,
    #[serde(default = "default_resume_window_secs")]
    resume_window_secs: u64,
    #[serde(default = "default_tee_buffer")]
    tee_buffer: usize,
    #[serde(default = "default_stale_after_secs")]
    stale_after_secs: u64,
}

impl Default for StreamsSection {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            path: default_registry_path(),
            key_prefix: default_key_prefix(),
            resume_window_secs: default_resume_window_secs(),
            tee_buffer: default_tee_buffer(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct CorsSection {
    #[serde(default)]
    origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_registry() -> String {
    "memory".to_string()
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("chatrelay-streams.redb")
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_resume_window_secs() -> u64 {
    DEFAULT_RESUME_WINDOW.as_secs()
}

fn default_tee_buffer() -> usize {
    DEFAULT_TEE_BUFFER
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER.as_secs()
}

fn parse_registry(kind: &str, path: PathBuf) -> anyhow::Result<RegistryBackend> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "memory" => Ok(RegistryBackend::Memory),
        "redb" => Ok(RegistryBackend::Redb { path }),
        "disabled" | "none" => Ok(RegistryBackend::Disabled),
        other => Err(anyhow!("Unknown stream registry '{}'", other)),
    }
}

fn split_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

impl FileConfig {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let streams = StreamSettings {
            registry: parse_registry(&self.streams.registry, self.streams.path)?,
            key_prefix: self.streams.key_prefix,
            resume_window: Duration::from_secs(self.streams.resume_window_secs),
            tee_buffer: self.streams.tee_buffer,
            stale_after: Duration::from_secs(self.streams.stale_after_secs),
        };

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            backend: BackendConfig::new(self.backend.url, self.backend.api_secret)
                .with_timeout(Duration::from_secs(self.backend.timeout_secs)),
            jwt_secret: self.auth.jwt_secret,
            streams,
            cors_origins: self.cors.origins,
        }
        .validated()
    }
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        if let Some(file_config) = load_from_file()? {
            return file_config.into_config();
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let number = |key: &str| -> anyhow::Result<Option<u64>> {
            var(key)
                .map(|value| value.trim().parse::<u64>())
                .transpose()
                .with_context(|| format!("{} must be a number", key))
        };

        let host = var("CHATRELAY_HOST").unwrap_or_else(default_host);
        let port = var("CHATRELAY_PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or_else(default_port);

        let timeout_secs = number("CHATRELAY_BACKEND_TIMEOUT_SECS")?.unwrap_or_else(default_timeout_secs);
        let backend = BackendConfig::new(
            var("API_BASE_URL").unwrap_or_else(default_backend_url),
            var("API_SECRET").unwrap_or_default(),
        )
        .with_timeout(Duration::from_secs(timeout_secs));

        let path = var("CHATRELAY_REGISTRY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_registry_path);
        let registry = parse_registry(
            &var("CHATRELAY_REGISTRY").unwrap_or_else(default_registry),
            path,
        )?;
        let streams = StreamSettings {
            registry,
            key_prefix: var("CHATRELAY_KEY_PREFIX").unwrap_or_else(default_key_prefix),
            resume_window: Duration::from_secs(
                number("CHATRELAY_RESUME_WINDOW_SECS")?.unwrap_or_else(default_resume_window_secs),
            ),
            tee_buffer: number("CHATRELAY_TEE_BUFFER")?
                .map(|value| value as usize)
                .unwrap_or_else(default_tee_buffer),
            stale_after: Duration::from_secs(
                number("CHATRELAY_STALE_AFTER_SECS")?.unwrap_or_else(default_stale_after_secs),
            ),
        };

        Self {
            host,
            port,
            backend,
            jwt_secret: var("AUTH_SECRET").unwrap_or_default(),
            streams,
            cors_origins: var("CHATRELAY_CORS_ORIGINS")
                .map(|value| split_origins(&value))
                .unwrap_or_default(),
        }
        .validated()
    }

    fn validated(self) -> anyhow::Result<Self> {
        if self.backend.api_secret.trim().is_empty() {
            bail!("API_SECRET is not defined");
        }
        if self.jwt_secret.trim().is_empty() {
            bail!("AUTH_SECRET is not defined");
        }
        Ok(self)
    }
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let config_path = env::var("CHATRELAY_CONFIG").ok();
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new("chatrelay.toml").exists() {
        Some("chatrelay.toml".to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow!("Failed to read config {}: {}", path, err))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .map_err(|err| anyhow!("Failed to parse config {}: {}", path, err))?;
    Ok(Some(parsed))
}
