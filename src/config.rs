//! 应用配置与同步地址解析

use crate::error::ConfigError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// S3 默认参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Defaults {
    #[serde(default = "default_region")]
    pub region: String,
    /// 自定义 endpoint（兼容 S3 协议的对象存储）
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Defaults {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
        }
    }
}

/// config.json 的内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub s3: S3Defaults,
}

impl AppConfig {
    /// 从配置目录加载，文件不存在或无法解析时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        fs::read_to_string(&config_file)
            .ok()
            .and_then(|content| match serde_json::from_str::<AppConfig>(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    // 日志系统此时还没初始化
                    eprintln!("忽略无效的配置文件 {}: {}", config_file.display(), e);
                    None
                }
            })
            .unwrap_or_default()
    }
}

/// 配置目录：优先使用 `SAVESYNC_CONFIG_DIR`，否则为系统配置目录下的 `savesync`
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SAVESYNC_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    let base = if cfg!(target_os = "windows") {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
    } else {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    };

    base.map(|p| p.join("savesync"))
        .unwrap_or_else(|| PathBuf::from(".savesync"))
}

/// 展开开头的 `~`
pub fn expand_home(path: &str) -> PathBuf {
    let home = || std::env::var_os("HOME").map(PathBuf::from);
    if path == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// 同步目标地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncUri {
    /// `file://<path>`
    File(PathBuf),
    /// `s3://<bucket>/<prefix>`
    S3 { bucket: String, prefix: String },
}

impl FromStr for SyncUri {
    type Err = ConfigError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidUri(uri.to_string()))?;

        let rest = urlencoding::decode(rest).map_err(|_| ConfigError::InvalidUri(uri.to_string()))?;

        match scheme {
            "file" => {
                if rest.is_empty() {
                    return Err(ConfigError::InvalidUri(uri.to_string()));
                }
                Ok(SyncUri::File(expand_home(&rest)))
            }
            "s3" => {
                let (bucket, prefix) = rest.split_once('/').unwrap_or((rest.as_ref(), ""));
                if bucket.is_empty() {
                    return Err(ConfigError::InvalidUri(uri.to_string()));
                }
                Ok(SyncUri::S3 {
                    bucket: bucket.to_string(),
                    prefix: prefix.trim_matches('/').to_string(),
                })
            }
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// S3 访问凭证
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    /// 两个值都提供时才构成凭证
    pub fn from_parts(access_key: Option<String>, secret_key: Option<String>) -> Option<Self> {
        match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some(Self {
                access_key,
                secret_key,
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// 存储配置（由 `create_storage` 使用）
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local {
        local_root: PathBuf,
        remote_root: PathBuf,
    },
    S3 {
        local_root: PathBuf,
        bucket: String,
        prefix: String,
        region: String,
        endpoint: Option<String>,
        credentials: Credentials,
    },
}

impl StorageConfig {
    /// 根据同步地址构建存储配置
    pub fn new(
        local_root: PathBuf,
        uri: SyncUri,
        credentials: Option<Credentials>,
        s3: &S3Defaults,
    ) -> Result<Self, ConfigError> {
        match uri {
            SyncUri::File(remote_root) => Ok(StorageConfig::Local {
                local_root,
                remote_root,
            }),
            SyncUri::S3 { bucket, prefix } => Ok(StorageConfig::S3 {
                local_root,
                bucket,
                prefix,
                region: s3.region.clone(),
                endpoint: s3.endpoint.clone(),
                credentials: credentials.ok_or(ConfigError::MissingCredentials)?,
            }),
        }
    }
}
