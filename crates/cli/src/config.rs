use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use bucketscan_aws::S3Settings;

pub const DEFAULT_OUT: &str = "output";

/// Optional YAML file; every key may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileConfig {
    #[serde(flatten)]
    pub s3: S3Settings,
    #[serde(default)]
    pub out: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        if raw.iter().all(u8::is_ascii_whitespace) { return Ok(Self::default()); }
        serde_yaml::from_slice(&raw).with_context(|| format!("parse config {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings { pub s3: S3Settings, pub out: PathBuf }

/// Flags win over the file, the file wins over defaults.
pub fn resolve(file: FileConfig, flags: S3Settings, out: Option<PathBuf>) -> Settings {
    Settings {
        s3: file.s3.merge(flags),
        out: out.or(file.out).unwrap_or_else(|| PathBuf::from(DEFAULT_OUT)),
    }
}
