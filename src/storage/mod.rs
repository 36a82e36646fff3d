pub mod local;
pub mod s3;

use crate::config::StorageConfig;
use crate::core::scanner::{FileScanner, Inventory};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use local::LocalStorage;
pub use s3::S3Storage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 同步存储接口
///
/// 每个实现绑定一个本地同步根目录和一个远端位置。路径参数都是相对同步根目录、
/// 以 `/` 分隔的路径，与索引中的键一致。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 本地同步根目录
    fn local_root(&self) -> &Path;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;

    /// 扫描本地目录
    async fn scan(&self, scanner: &FileScanner) -> Result<Inventory> {
        scanner.scan(self.local_root()).await
    }

    /// 读取远端索引，`None` 表示还没有同步过
    async fn read_manifest(&self) -> Result<Option<Vec<u8>>>;

    /// 整体覆盖远端索引
    async fn write_manifest(&self, data: Vec<u8>) -> Result<()>;

    /// 本地 -> 远端，返回传输的字节数
    async fn transfer_out(&self, relative_path: &str) -> Result<u64>;

    /// 远端 -> 本地（覆盖本地内容），返回传输的字节数
    async fn transfer_in(&self, relative_path: &str) -> Result<u64>;

    /// 删除本地文件，文件已不存在时不报错
    async fn delete_local(&self, relative_path: &str) -> Result<()> {
        let path = self.local_path(relative_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("无法删除 {}", path.display())),
        }
    }

    /// 在远端复制本地目录结构（对象存储不需要目录）
    async fn mirror_folders(&self, _folders: &[PathBuf]) -> Result<()> {
        Ok(())
    }

    /// 相对路径对应的本地文件
    fn local_path(&self, relative_path: &str) -> PathBuf {
        resolve_local(self.local_root(), relative_path)
    }
}

/// 把相对路径解析到同步根目录下；同步根是单个文件时就是它本身
pub fn resolve_local(root: &Path, relative_path: &str) -> PathBuf {
    if root.is_file() {
        return root.to_path_buf();
    }
    let relative_path = relative_path.trim_start_matches('/');
    if relative_path.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative_path)
    }
}

/// 同目录下的临时文件名
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.savesync-tmp", name))
}

/// 先写临时文件再重命名，失败时清理临时文件
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("无法创建目录 {}", parent.display()))?;
    }

    let temp = scopeguard::guard(temp_path(path), |p| {
        let _ = std::fs::remove_file(p);
    });
    tokio::fs::write(&*temp, data)
        .await
        .with_context(|| format!("无法写入 {}", temp.display()))?;
    tokio::fs::rename(&*temp, path)
        .await
        .with_context(|| format!("无法写入 {}", path.display()))?;
    scopeguard::ScopeGuard::into_inner(temp);

    Ok(())
}

/// 根据配置创建存储实例
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config {
        StorageConfig::Local {
            local_root,
            remote_root,
        } => {
            tracing::info!("初始化本地存储: {}", remote_root.display());
            Ok(Arc::new(LocalStorage::new(local_root, remote_root)?) as Arc<dyn Storage>)
        }
        StorageConfig::S3 {
            local_root,
            bucket,
            prefix,
            region,
            endpoint,
            credentials,
        } => {
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(S3Storage::new(
                local_root,
                bucket,
                prefix,
                region,
                endpoint.as_deref(),
                credentials,
            )?) as Arc<dyn Storage>)
        }
    }
}
