use super::{write_atomic, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::Credentials;
use crate::core::manifest::MANIFEST_NAME;
use anyhow::{Context, Result};
use async_trait::async_trait;
use opendal::{layers::TimeoutLayer, Operator};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 远端是对象存储，每个文件一个对象，整对象读写
pub struct S3Storage {
    local_root: PathBuf,
    operator: Operator,
    name: String,
}

impl S3Storage {
    pub fn new(
        local_root: &Path,
        bucket: &str,
        prefix: &str,
        region: &str,
        endpoint: Option<&str>,
        credentials: &Credentials,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(&credentials.access_key)
            .secret_access_key(&credentials.secret_key)
            .root(&format!("/{}", prefix));

        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = if prefix.is_empty() {
            format!("s3://{}", bucket)
        } else {
            format!("s3://{}/{}", bucket, prefix)
        };

        Ok(Self::with_operator(local_root, operator, name))
    }

    /// 使用现成的 operator（其 root 即对象前缀）
    pub fn with_operator(local_root: &Path, operator: Operator, name: impl Into<String>) -> Self {
        Self {
            local_root: local_root.to_path_buf(),
            operator,
            name: name.into(),
        }
    }

    fn object_key(relative_path: &str) -> &str {
        relative_path.trim_start_matches('/')
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn local_root(&self) -> &Path {
        &self.local_root
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn read_manifest(&self) -> Result<Option<Vec<u8>>> {
        match self.operator.read(MANIFEST_NAME).await {
            Ok(data) => Ok(Some(data.to_vec())),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("无法读取索引 {}/{}", self.name, MANIFEST_NAME)),
        }
    }

    async fn write_manifest(&self, data: Vec<u8>) -> Result<()> {
        self.operator
            .write(MANIFEST_NAME, data)
            .await
            .with_context(|| format!("无法写入索引 {}/{}", self.name, MANIFEST_NAME))?;
        Ok(())
    }

    async fn transfer_out(&self, relative_path: &str) -> Result<u64> {
        let from = self.local_path(relative_path);
        let key = Self::object_key(relative_path);

        let data = tokio::fs::read(&from)
            .await
            .with_context(|| format!("无法读取 {}", from.display()))?;
        let size = data.len() as u64;
        debug!("上传: {} -> {}/{} ({}字节)", from.display(), self.name, key, size);

        self.operator
            .write(key, data)
            .await
            .with_context(|| format!("上传 {}/{} 失败", self.name, key))?;
        Ok(size)
    }

    async fn transfer_in(&self, relative_path: &str) -> Result<u64> {
        let to = self.local_path(relative_path);
        let key = Self::object_key(relative_path);

        let data = self
            .operator
            .read(key)
            .await
            .with_context(|| format!("下载 {}/{} 失败", self.name, key))?
            .to_vec();
        debug!("下载: {}/{} -> {} ({}字节)", self.name, key, to.display(), data.len());

        write_atomic(&to, &data).await?;
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opendal::services::Memory;

    fn memory_storage(local_root: &Path) -> S3Storage {
        let operator = Operator::new(Memory::default()).unwrap().finish();
        S3Storage::with_operator(local_root, operator, "memory://saves")
    }

    #[tokio::test]
    async fn test_missing_manifest_is_first_sync() {
        let dir = tempfile::tempdir().unwrap();
        let storage = memory_storage(dir.path());
        assert!(storage.read_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = memory_storage(dir.path());

        storage.write_manifest(b"a:b:1.0\n".to_vec()).await.unwrap();
        storage.write_manifest(b"c:d:2.0\n".to_vec()).await.unwrap();

        assert_eq!(storage.read_manifest().await.unwrap().unwrap(), b"c:d:2.0\n");
    }

    #[tokio::test]
    async fn test_transfer_out_and_in() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/f.txt"), b"payload").unwrap();
        let storage = memory_storage(dir.path());

        assert_eq!(storage.transfer_out("sub/f.txt").await.unwrap(), 7);
        assert_eq!(
            storage.operator.read("sub/f.txt").await.unwrap().to_vec(),
            b"payload"
        );

        std::fs::remove_dir_all(dir.path().join("sub")).unwrap();
        assert_eq!(storage.transfer_in("sub/f.txt").await.unwrap(), 7);
        assert_eq!(std::fs::read(dir.path().join("sub/f.txt")).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_transfer_in_missing_object_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = memory_storage(dir.path());
        assert!(storage.transfer_in("missing.txt").await.is_err());
        assert!(!dir.path().join("missing.txt").exists());
    }
}
