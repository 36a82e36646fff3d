//! 本地文件清单扫描

use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// 扫描配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（相对路径，支持 `*` 和 `dir/**`）
    pub exclude_patterns: Vec<String>,
}

/// 扫描得到的单个文件
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryEntry {
    /// 绝对路径
    pub path: PathBuf,
    /// 相对同步根目录的路径，统一使用 `/`
    pub relative_path: String,
    pub content_hash: String,
    /// 修改时间（Unix 秒，带小数）
    pub mod_time: f64,
}

/// 一次扫描的结果
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub root: PathBuf,
    /// 先序遍历得到的目录（父目录在子目录之前）
    pub folders: Vec<PathBuf>,
    pub files: Vec<InventoryEntry>,
}

impl Inventory {
    pub fn get(&self, relative_path: &str) -> Option<&InventoryEntry> {
        self.files.iter().find(|f| f.relative_path == relative_path)
    }

    /// 按相对路径建立索引
    pub fn by_path(&self) -> HashMap<&str, &InventoryEntry> {
        self.files
            .iter()
            .map(|f| (f.relative_path.as_str(), f))
            .collect()
    }

    /// 所有文件中最新的修改时间，空清单为 0
    pub fn latest_mod_time(&self) -> f64 {
        self.files.iter().map(|f| f.mod_time).fold(0.0, f64::max)
    }
}

/// 文件扫描器
#[derive(Debug, Clone, Default)]
pub struct FileScanner {
    config: ScanConfig,
}

impl FileScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self { config }
    }

    /// 扫描目录（在阻塞线程中执行，调用方等待完成）
    pub async fn scan(&self, root: &Path) -> Result<Inventory> {
        let scanner = self.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&root)).await?
    }

    /// 同步扫描
    ///
    /// 根目录不存在时先创建；根路径是单个文件时只返回该文件。
    /// 任何无法读取的条目（权限不足、断开的符号链接、符号链接循环）都会直接报错。
    pub fn scan_blocking(&self, root: &Path) -> Result<Inventory> {
        if !root.exists() {
            info!("创建同步目录: {}", root.display());
            std::fs::create_dir_all(root)
                .with_context(|| format!("无法创建目录 {}", root.display()))?;
        }

        let mut inventory = Inventory {
            root: root.to_path_buf(),
            ..Default::default()
        };

        if !root.is_dir() {
            if !root.is_file() {
                bail!("同步路径不是普通文件或目录: {}", root.display());
            }
            let name = root
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("无效的文件名: {}", root.display()))?;
            inventory
                .files
                .push(Self::read_entry(root, name.to_string())?);
            return Ok(inventory);
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded(root, e));

        for entry in walker {
            let entry = entry.with_context(|| format!("扫描 {} 失败", root.display()))?;

            if entry.file_type().is_dir() {
                inventory.folders.push(entry.path().to_path_buf());
                continue;
            }

            // 管道、套接字、设备文件读取时可能阻塞
            if !entry.file_type().is_file() {
                warn!("跳过非普通文件: {}", entry.path().display());
                continue;
            }

            let relative_path = relative_path(root, entry.path())?;
            inventory
                .files
                .push(Self::read_entry(entry.path(), relative_path)?);
        }

        info!(
            "扫描完成: {} 个文件, {} 个目录",
            inventory.files.len(),
            inventory.folders.len()
        );

        Ok(inventory)
    }

    fn read_entry(path: &Path, relative_path: String) -> Result<InventoryEntry> {
        let data =
            std::fs::read(path).with_context(|| format!("无法读取文件 {}", path.display()))?;
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("无法读取文件信息 {}", path.display()))?;

        Ok(InventoryEntry {
            path: path.to_path_buf(),
            relative_path,
            content_hash: calculate_hash(&data),
            mod_time: mod_time(&metadata),
        })
    }

    fn is_excluded(&self, root: &Path, entry: &DirEntry) -> bool {
        if self.config.exclude_patterns.is_empty() {
            return false;
        }
        let Ok(path) = relative_path(root, entry.path()) else {
            return false;
        };
        let excluded = self
            .config
            .exclude_patterns
            .iter()
            .any(|pattern| matches_pattern(&path, pattern));
        if excluded {
            debug!("排除: {}", path);
        }
        excluded
    }
}

/// 计算文件内容的 hash（BLAKE3 取前 16 字节，32 个十六进制字符）
pub fn calculate_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex()[..32].to_string()
}

/// 读取修改时间，早于 Unix 纪元的按 0 处理
pub fn mod_time(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64())
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} 不在 {} 下", path.display(), root.display()))?;
    let relative = relative
        .to_str()
        .ok_or_else(|| anyhow!("路径不是有效的 UTF-8: {}", path.display()))?;
    Ok(relative.replace('\\', "/"))
}

/// 简单的 glob 模式匹配
fn matches_pattern(path: &str, pattern: &str) -> bool {
    // `dir/**` 或 `**/name`
    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let prefix = prefix.trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');

        let prefix_ok =
            prefix.is_empty() || path == prefix || path.starts_with(&format!("{}/", prefix));
        let suffix_ok = suffix.is_empty() || path.ends_with(suffix);
        return prefix_ok && suffix_ok;
    }

    let file_name = path.rsplit('/').next().unwrap_or(path);

    if pattern.contains('*') {
        let regex_pattern = regex::escape(pattern).replace(r"\*", "[^/]*");
        return match regex::Regex::new(&format!("^{}$", regex_pattern)) {
            Ok(re) => re.is_match(path) || re.is_match(file_name),
            Err(_) => false,
        };
    }

    path == pattern || file_name == pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("new");

        let inventory = FileScanner::new().scan_blocking(&root).unwrap();

        assert!(root.is_dir());
        assert!(inventory.files.is_empty());
        assert_eq!(inventory.folders, vec![root]);
    }

    #[test]
    fn test_walk_is_pre_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("top.txt"), b"top").unwrap();
        fs::write(root.join("a/b/deep.txt"), b"deep").unwrap();

        let inventory = FileScanner::new().scan_blocking(root).unwrap();

        assert_eq!(
            inventory.folders,
            vec![root.to_path_buf(), root.join("a"), root.join("a/b")]
        );
        let mut names: Vec<_> = inventory
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a/b/deep.txt", "top.txt"]);
        assert_eq!(
            inventory.get("top.txt").unwrap().content_hash,
            calculate_hash(b"top")
        );
    }

    #[test]
    fn test_single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("save.dat");
        fs::write(&file, b"data").unwrap();

        let inventory = FileScanner::new().scan_blocking(&file).unwrap();

        assert!(inventory.folders.is_empty());
        assert_eq!(inventory.files.len(), 1);
        assert_eq!(inventory.files[0].relative_path, "save.dat");
        assert_eq!(inventory.files[0].path, file);
    }

    #[test]
    fn test_hash_is_128_bit_hex() {
        let hash = calculate_hash(b"hello");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, calculate_hash(b"hello"));
        assert_ne!(hash, calculate_hash(b"hello!"));
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join(".git/objects/x"), b"x").unwrap();
        fs::write(root.join("keep.txt"), b"k").unwrap();
        fs::write(root.join("scratch.tmp"), b"t").unwrap();

        let scanner = FileScanner::with_config(ScanConfig {
            exclude_patterns: vec![".git/**".to_string(), "*.tmp".to_string()],
        });
        let inventory = scanner.scan_blocking(root).unwrap();

        let names: Vec<_> = inventory
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        assert_eq!(names, vec!["keep.txt"]);
        assert!(!inventory.folders.contains(&root.join(".git")));
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("node_modules/x/y.js", "node_modules/**"));
        assert!(matches_pattern("a/b/c.log", "**/c.log"));
        assert!(matches_pattern("a/b.tmp", "*.tmp"));
        assert!(matches_pattern("a/.DS_Store", ".DS_Store"));
        assert!(!matches_pattern("a/b.txt", "*.tmp"));
        assert!(!matches_pattern("node_modules_old/x", "node_modules/**"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("link")).unwrap();

        assert!(FileScanner::new().scan_blocking(dir.path()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let status = std::process::Command::new("mkfifo")
            .arg(dir.path().join("pipe"))
            .status()
            .unwrap();
        assert!(status.success());

        let inventory = FileScanner::new().scan_blocking(dir.path()).unwrap();

        let names: Vec<_> = inventory
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = dir.path().join("pipe");
        let status = std::process::Command::new("mkfifo").arg(&pipe).status().unwrap();
        assert!(status.success());

        assert!(FileScanner::new().scan_blocking(&pipe).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();

        assert!(FileScanner::new().scan_blocking(dir.path()).is_err());
    }
}
