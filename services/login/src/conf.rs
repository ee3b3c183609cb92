use std::{net::Ipv4Addr, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use ebonhold_game::types::GameVersion;
use serde::{Deserialize, Serialize};

pub fn default_build() -> GameVersion {
    GameVersion {
        major: 1,
        minor: 12,
        patch: 1,
        build: 5875,
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginServerConfig {
    pub bind_address: Ipv4Addr,
    pub port: u16,

    /// Where realm processes publish their status.
    pub spark_address: String,
    pub account_service_address: String,

    pub allowed_builds: Vec<GameVersion>,

    /// Directory of client binaries for integrity checking; checking
    /// is disabled when unset.
    pub integrity_path: Option<PathBuf>,
    /// Directory of patch files; patching is disabled when unset.
    pub patch_path: Option<PathBuf>,
    pub survey: Option<SurveyConfig>,

    /// Hide realms whose region doesn't match the client's locale.
    pub locale_enforce: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SurveyConfig {
    pub id: u32,
    pub path: PathBuf,
    /// (platform, os) four-character codes the survey runs on.
    pub platforms: Vec<(String, String)>,
}

impl LoginServerConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("could not open {}", path.display()))?;
        serde_yaml::from_reader(file).context("could not read yaml file")
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("could not create {}", path.display()))?;
        serde_yaml::to_writer(file, self).context("could not write yaml file")
    }
}
