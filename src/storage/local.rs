use super::{temp_path, write_atomic, Storage};
use crate::core::manifest::MANIFEST_NAME;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// 复制时的缓冲区大小
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// 远端是另一个（本地或挂载的）目录
pub struct LocalStorage {
    local_root: PathBuf,
    remote_root: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(local_root: &Path, remote_root: &Path) -> Result<Self> {
        if !remote_root.exists() {
            std::fs::create_dir_all(remote_root)
                .with_context(|| format!("无法创建目录 {}", remote_root.display()))?;
        }
        let name = format!("file://{}", remote_root.display());
        Ok(Self {
            local_root: local_root.to_path_buf(),
            remote_root: remote_root.to_path_buf(),
            name,
        })
    }

    fn remote_path(&self, relative_path: &str) -> PathBuf {
        self.remote_root.join(relative_path.trim_start_matches('/'))
    }

    fn manifest_path(&self) -> PathBuf {
        self.remote_root.join(MANIFEST_NAME)
    }
}

/// 分块复制文件，返回复制的字节数
async fn copy_file(from: &Path, to: &Path) -> Result<u64> {
    let mut input = fs::File::open(from)
        .await
        .with_context(|| format!("无法打开 {}", from.display()))?;

    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("无法创建目录 {}", parent.display()))?;
    }

    let temp = scopeguard::guard(temp_path(to), |p| {
        let _ = std::fs::remove_file(p);
    });
    let mut output = fs::File::create(&*temp)
        .await
        .with_context(|| format!("无法创建 {}", temp.display()))?;

    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let n = input
            .read(&mut buffer)
            .await
            .with_context(|| format!("读取 {} 失败", from.display()))?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buffer[..n])
            .await
            .with_context(|| format!("写入 {} 失败", temp.display()))?;
        copied += n as u64;
    }
    output.flush().await?;
    drop(output);

    fs::rename(&*temp, to)
        .await
        .with_context(|| format!("无法写入 {}", to.display()))?;
    scopeguard::ScopeGuard::into_inner(temp);

    Ok(copied)
}

#[async_trait]
impl Storage for LocalStorage {
    fn local_root(&self) -> &Path {
        &self.local_root
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn read_manifest(&self) -> Result<Option<Vec<u8>>> {
        let path = self.manifest_path();
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("无法读取索引 {}", path.display())),
        }
    }

    async fn write_manifest(&self, data: Vec<u8>) -> Result<()> {
        write_atomic(&self.manifest_path(), &data).await
    }

    async fn transfer_out(&self, relative_path: &str) -> Result<u64> {
        let to = self.remote_path(relative_path);
        debug!("复制: {} -> {}", relative_path, to.display());
        copy_file(&self.local_path(relative_path), &to).await
    }

    async fn transfer_in(&self, relative_path: &str) -> Result<u64> {
        let from = self.remote_path(relative_path);
        debug!("恢复: {} -> {}", from.display(), relative_path);
        copy_file(&from, &self.local_path(relative_path)).await
    }

    async fn mirror_folders(&self, folders: &[PathBuf]) -> Result<()> {
        for folder in folders {
            let Ok(relative) = folder.strip_prefix(&self.local_root) else {
                continue;
            };
            let target = self.remote_root.join(relative);
            if !target.exists() {
                info!("创建目录: {}", target.display());
                fs::create_dir_all(&target)
                    .await
                    .with_context(|| format!("无法创建目录 {}", target.display()))?;
            }
        }
        Ok(())
    }
}
