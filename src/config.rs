use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{DirectoryPair, HostDescriptor, HostIdentity, MonitorSettings};

const CONTAINER_CONFIG_PATH: &str = "/config/config.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryPairConfig {
    pub remote_directory: String,
    pub local_directory: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    pub name: Option<String>,
    pub ssh_server: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_key: String,
    pub ssh_key_passphrase: Option<String>,
    pub host_key: Option<String>,
    /// Poll interval in seconds
    pub interval: u64,
    // Single-pair form kept for older config files
    pub remote_directory: Option<String>,
    pub local_directory: Option<String>,
    #[serde(default)]
    pub directory_pairs: Vec<DirectoryPairConfig>,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    #[serde(default = "default_quiescence_secs")]
    pub quiescence_secs: u64,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_delete_retry_warn_after")]
    pub delete_retry_warn_after: u32,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_quiescence_secs() -> u64 {
    60
}

fn default_retry_backoff_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_io_timeout_secs() -> u64 {
    60
}

fn default_keepalive_secs() -> u64 {
    15
}

fn default_delete_retry_warn_after() -> u32 {
    5
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Override uid/gid from `PUID`/`PGID`. Unparsable values are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uid) = lookup("PUID") {
            match uid.trim().parse::<u32>() {
                Ok(parsed) => self.uid = Some(parsed),
                Err(_) => tracing::warn!("Could not parse PUID='{}' as integer", uid),
            }
        }

        if let Some(gid) = lookup("PGID") {
            match gid.trim().parse::<u32>() {
                Ok(parsed) => self.gid = Some(parsed),
                Err(_) => tracing::warn!("Could not parse PGID='{}' as integer", gid),
            }
        }
    }

    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            quiescence: Duration::from_secs(self.quiescence_secs),
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
            keepalive: Duration::from_secs(self.keepalive_secs),
            delete_retry_warn_after: self.delete_retry_warn_after,
        }
    }

    /// Validate every host and turn it into a descriptor
    pub fn host_descriptors(&self) -> Result<Vec<HostDescriptor>> {
        if self.hosts.is_empty() {
            bail!("No hosts configured");
        }

        self.hosts
            .iter()
            .enumerate()
            .map(|(index, host)| {
                let label = host.name.clone().unwrap_or_else(|| host.ssh_server.clone());
                host.to_descriptor().with_context(|| {
                    format!("Invalid configuration for host #{} ({})", index + 1, label)
                })
            })
            .collect()
    }
}

impl HostConfig {
    fn to_descriptor(&self) -> Result<HostDescriptor> {
        if self.ssh_server.trim().is_empty() {
            bail!("ssh_server is empty");
        }
        if self.ssh_user.trim().is_empty() {
            bail!("ssh_user is empty");
        }
        if self.ssh_key.trim().is_empty() {
            bail!("ssh_key is empty");
        }
        if self.interval == 0 {
            bail!("interval must be at least 1 second");
        }

        let mut pairs = Vec::new();
        match (&self.remote_directory, &self.local_directory) {
            (Some(remote), Some(local)) => pairs.push(directory_pair(remote, local)?),
            (None, None) => {}
            _ => bail!("remote_directory and local_directory must be set together"),
        }
        for pair in &self.directory_pairs {
            pairs.push(directory_pair(&pair.remote_directory, &pair.local_directory)?);
        }
        if pairs.is_empty() {
            bail!("no directory pairs configured");
        }

        let host_identity = match &self.host_key {
            Some(key) if !key.trim().is_empty() => {
                Some(parse_host_identity(key).context("Failed to decode host_key")?)
            }
            _ => None,
        };

        Ok(HostDescriptor {
            name: self.name.clone().unwrap_or_else(|| self.ssh_server.clone()),
            server: self.ssh_server.trim().to_string(),
            port: self.ssh_port,
            user: self.ssh_user.clone(),
            key_path: expand_home(&self.ssh_key),
            key_passphrase: self.ssh_key_passphrase.clone(),
            host_identity,
            directory_pairs: pairs,
            interval: Duration::from_secs(self.interval),
        })
    }
}

fn directory_pair(remote: &str, local: &str) -> Result<DirectoryPair> {
    // Remote paths are always POSIX, whatever the local platform is.
    if !remote.starts_with('/') {
        bail!("remote_directory '{}' must be an absolute path", remote);
    }
    if local.trim().is_empty() {
        bail!("local_directory for '{}' is empty", remote);
    }
    Ok(DirectoryPair::new(remote, expand_home(local)))
}

/// Decode a pinned host identity.
///
/// Accepts `SHA256:<base64>` fingerprints, a bare base64 public key blob, a
/// `<type> <base64> [comment]` public key line, or a known_hosts line where host patterns and
/// markers come before the key type.
pub fn parse_host_identity(value: &str) -> Result<HostIdentity> {
    let value = value.trim();

    let is_fingerprint = value
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("sha256:"));
    if is_fingerprint {
        let encoded = value[7..].trim().trim_end_matches('=');
        let digest = STANDARD_NO_PAD
            .decode(encoded)
            .context("SHA256 fingerprint is not valid base64")?;
        if digest.len() != 32 {
            bail!("SHA256 fingerprint must decode to 32 bytes, got {}", digest.len());
        }
        return Ok(HostIdentity::Sha256(digest));
    }

    let tokens: Vec<&str> = value.split_whitespace().collect();
    let encoded = match tokens.iter().position(|token| is_key_type(token)) {
        Some(i) => match tokens.get(i + 1) {
            Some(blob) => *blob,
            None => bail!("host_key names key type {} but carries no key", tokens[i]),
        },
        None => match tokens.as_slice() {
            [blob] => *blob,
            [] => bail!("host_key is empty"),
            _ => bail!("host_key has no recognised key type"),
        },
    };
    let blob = STANDARD
        .decode(encoded)
        .context("host_key is not valid base64")?;
    if blob.is_empty() {
        bail!("host_key decodes to an empty key");
    }
    Ok(HostIdentity::PublicKey(blob))
}

fn is_key_type(token: &str) -> bool {
    token.starts_with("ssh-") || token.starts_with("ecdsa-sha2-") || token.starts_with("sk-")
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[derive(Debug)]
pub struct ConfigManager {
    config_file: PathBuf,
}

impl ConfigManager {
    /// Use `explicit` when given, else the container path if present, else the platform
    /// config directory.
    pub fn new(explicit: Option<PathBuf>) -> Result<Self> {
        let config_file = match explicit {
            Some(path) => path,
            None if Path::new(CONTAINER_CONFIG_PATH).exists() => {
                PathBuf::from(CONTAINER_CONFIG_PATH)
            }
            None => dirs::config_dir()
                .context("Could not find config directory")?
                .join("sshpull")
                .join("config.toml"),
        };

        Ok(Self { config_file })
    }

    pub fn get_config_path(&self) -> &Path {
        &self.config_file
    }

    pub fn load_config(&self) -> Result<AppConfig> {
        let content: String = fs::read_to_string(&self.config_file).with_context(|| {
            format!("Failed to read config file {}", self.config_file.display())
        })?;

        let mut config = AppConfig::from_toml(&content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }
}
