use crate::core::manifest::{Manifest, ManifestEntry, MANIFEST_NAME};
use crate::core::reconcile::{plan_restore, plan_save, SyncDirection};
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::storage::Storage;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 同步模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// save 之后 restore
    Sync,
    /// 本地 -> 远端
    Save,
    /// 远端 -> 本地
    Restore,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Sync => write!(f, "sync"),
            SyncMode::Save => write!(f, "save"),
            SyncMode::Restore => write!(f, "restore"),
        }
    }
}

/// 同步配置
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// 扫描配置
    pub scan_config: ScanConfig,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub mode: SyncMode,
    /// save 阶段决定的方向（仅 restore 时为空）
    pub direction: Option<SyncDirection>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub files_scanned: u32,
    pub files_pushed: u32,
    pub files_pulled: u32,
    pub files_deleted: u32,
    pub entries_purged: u32,
    pub bytes_transferred: u64,
}

impl SyncReport {
    fn new(mode: SyncMode) -> Self {
        let now = Utc::now();
        Self {
            mode,
            direction: None,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            files_scanned: 0,
            files_pushed: 0,
            files_pulled: 0,
            files_deleted: 0,
            entries_purged: 0,
            bytes_transferred: 0,
        }
    }

    fn finish(mut self, timer: Instant) -> Self {
        self.finished_at = Utc::now();
        self.duration_ms = timer.elapsed().as_millis() as u64;
        self
    }

    /// 没有任何文件变动
    pub fn is_noop(&self) -> bool {
        self.files_pushed == 0
            && self.files_pulled == 0
            && self.files_deleted == 0
            && self.entries_purged == 0
    }
}

/// 同步引擎
///
/// 单线程顺序执行：扫描、读取索引、计算计划、逐个传输、写回索引。
/// 任何错误都会中止整次同步，不重试也不回滚。
pub struct SyncEngine {
    storage: Arc<dyn Storage>,
    scanner: FileScanner,
}

impl SyncEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_config(storage, SyncConfig::default())
    }

    pub fn with_config(storage: Arc<dyn Storage>, config: SyncConfig) -> Self {
        Self {
            storage,
            scanner: FileScanner::with_config(config.scan_config),
        }
    }

    /// 按模式运行
    pub async fn run(&self, mode: SyncMode) -> Result<SyncReport> {
        match mode {
            SyncMode::Sync => self.sync().await,
            SyncMode::Save => self.save().await,
            SyncMode::Restore => self.restore().await,
        }
    }

    /// save 后无条件 restore
    pub async fn sync(&self) -> Result<SyncReport> {
        let timer = Instant::now();
        let save = self.save().await?;
        let restore = self.restore().await?;

        let mut report = SyncReport::new(SyncMode::Sync);
        report.started_at = save.started_at;
        report.direction = save.direction;
        report.files_scanned = save.files_scanned;
        report.files_pushed = save.files_pushed;
        report.files_deleted = save.files_deleted;
        report.entries_purged = save.entries_purged;
        report.files_pulled = restore.files_pulled;
        report.bytes_transferred = save.bytes_transferred + restore.bytes_transferred;

        let report = report.finish(timer);
        if report.is_noop() {
            info!("本地与 {} 已一致", self.storage.name());
        }
        Ok(report)
    }

    /// 本地 -> 远端
    pub async fn save(&self) -> Result<SyncReport> {
        let timer = Instant::now();
        let mut report = SyncReport::new(SyncMode::Save);
        info!(
            "开始保存: {} -> {}",
            self.storage.local_root().display(),
            self.storage.name()
        );

        let inventory = self.storage.scan(&self.scanner).await?;
        report.files_scanned = inventory.files.len() as u32;

        // 单文件根的相对路径就是文件名，同样不能与索引重名
        if inventory.get(MANIFEST_NAME).is_some() {
            bail!(
                "同步路径中的 `{}` 文件与同步索引重名: {}",
                MANIFEST_NAME,
                inventory.root.display()
            );
        }

        self.storage.mirror_folders(&inventory.folders).await?;

        let mut manifest = self.load_manifest().await?;
        let plan = plan_save(&inventory, &manifest);
        report.direction = Some(plan.direction);

        debug!(
            "方向: {} (本地最新 {}, 远端最新 {}), 上传 {}, 删除 {}, 移出索引 {}",
            plan.direction,
            plan.latest_local,
            plan.latest_remote,
            plan.to_transfer.len(),
            plan.to_delete.len(),
            plan.to_purge.len()
        );

        if plan.is_noop() {
            debug!("没有需要上传、删除或移出索引的文件");
        }

        let local = inventory.by_path();

        for path in &plan.to_transfer {
            info!("上传: {}", path);
            report.bytes_transferred += self.storage.transfer_out(path).await?;
            report.files_pushed += 1;

            if let Some(file) = local.get(path.as_str()) {
                manifest.insert(
                    path.clone(),
                    ManifestEntry::new(file.content_hash.clone(), file.mod_time),
                );
            }
        }

        for path in &plan.to_purge {
            info!("移出索引: {}", path);
            manifest.remove(path);
            report.entries_purged += 1;
        }

        if !plan.to_delete.is_empty() {
            warn!(
                "远端比本地新，将删除 {} 个未同步的本地文件",
                plan.to_delete.len()
            );
        }
        for path in &plan.to_delete {
            info!("删除本地过期文件: {}", path);
            self.storage.delete_local(path).await?;
            manifest.remove(path);
            report.files_deleted += 1;
        }

        self.storage
            .write_manifest(manifest.encode().into_bytes())
            .await?;

        let report = report.finish(timer);
        info!(
            "保存完成: 上传 {} 个, 删除 {} 个, 移出索引 {} 条, {} 字节",
            report.files_pushed, report.files_deleted, report.entries_purged, report.bytes_transferred
        );
        Ok(report)
    }

    /// 远端 -> 本地，不改写索引
    pub async fn restore(&self) -> Result<SyncReport> {
        let timer = Instant::now();
        let mut report = SyncReport::new(SyncMode::Restore);
        info!(
            "开始恢复: {} -> {}",
            self.storage.name(),
            self.storage.local_root().display()
        );

        let inventory = self.storage.scan(&self.scanner).await?;
        report.files_scanned = inventory.files.len() as u32;

        let manifest = self.load_manifest().await?;
        let plan = plan_restore(&inventory, &manifest);
        debug!("需要恢复 {} 个文件", plan.to_fetch.len());

        let root_is_dir = !self.storage.local_root().is_file();
        for folder in plan.folders.iter().filter(|_| root_is_dir) {
            let path = self.storage.local_path(folder);
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("无法创建目录 {}", path.display()))?;
        }

        for path in &plan.to_fetch {
            info!("恢复: {}", path);
            report.bytes_transferred += self.storage.transfer_in(path).await?;
            report.files_pulled += 1;

            if let Some(entry) = manifest.get(path) {
                set_mod_time(&self.storage.local_path(path), entry.mod_time)?;
            }
        }

        let report = report.finish(timer);
        info!(
            "恢复完成: {} 个文件, {} 字节",
            report.files_pulled, report.bytes_transferred
        );
        Ok(report)
    }

    async fn load_manifest(&self) -> Result<Manifest> {
        let raw = self.storage.read_manifest().await?;
        if raw.is_none() {
            info!("远端没有索引，视为首次同步");
        }
        let manifest = Manifest::decode_bytes(raw.as_deref())
            .with_context(|| format!("解析 {} 的索引失败", self.storage.name()))?;
        debug!("索引中有 {} 条记录", manifest.len());
        Ok(manifest)
    }
}

/// 把索引中记录的修改时间写回本地文件
fn set_mod_time(path: &Path, mod_time: f64) -> Result<()> {
    let seconds = mod_time.floor();
    let nanos = ((mod_time - seconds) * 1e9).round().min(999_999_999.0) as u32;
    filetime::set_file_mtime(path, FileTime::from_unix_time(seconds as i64, nanos))
        .with_context(|| format!("无法设置修改时间 {}", path.display()))
}
