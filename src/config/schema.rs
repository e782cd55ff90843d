use crate::error::Result;
use nix::unistd::{getgid, getuid};
use serde::{Deserialize, Serialize};

const MAX_RECOMMENDED_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients_dir: Option<String>,
}

impl PathsConfig {
    pub fn get_clients_dir(&self) -> String {
        self.clients_dir
            .clone()
            .unwrap_or_else(super::default_clients_dir)
    }
}

/// Owner assigned to inodes until a checkout is chowned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct OwnerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

impl OwnerConfig {
    /// Configured owner, falling back to the daemon's own credentials.
    pub fn resolve(&self) -> (u32, u32) {
        let uid = self.uid.unwrap_or_else(|| getuid().as_raw());
        let gid = self.gid.unwrap_or_else(|| getgid().as_raw());
        (uid, gid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub owner: OwnerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuse_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_name: Option<String>,
}

impl Config {
    pub fn get_fuse_ttl_secs(&self) -> u64 {
        self.fuse_ttl_secs
            .unwrap_or_else(super::default_fuse_ttl_secs)
    }

    pub fn get_fs_name(&self) -> String {
        self.fs_name.clone().unwrap_or_else(super::default_fs_name)
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    let ttl = config.get_fuse_ttl_secs();
    if ttl > MAX_RECOMMENDED_TTL_SECS {
        tracing::warn!(
            "fuse_ttl_secs ({}) is above the recommended maximum of {}s; \
             attribute changes may take a long time to become visible",
            ttl,
            MAX_RECOMMENDED_TTL_SECS
        );
    }

    if let Some(name) = &config.fs_name {
        if name.is_empty() || name.contains(',') {
            return Err(crate::error::GroveError::Config(format!(
                "Invalid fs_name '{}': must be non-empty and must not contain ','",
                name
            )));
        }
    }

    Ok(())
}
