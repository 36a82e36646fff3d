//! 同步索引（manifest）
//!
//! 远端保存一个名为 `index` 的纯文本对象，每行一条记录：
//! `相对路径:hash:修改时间`。路径本身不能包含 `:` 或换行（不做转义）。

use crate::error::ManifestError;
use std::collections::BTreeMap;
use std::path::{Component, Path};

/// 远端索引对象的名字
pub const MANIFEST_NAME: &str = "index";

/// 索引记录
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub content_hash: String,
    /// 最后一次成功传输时的修改时间（Unix 秒）
    pub mod_time: f64,
}

impl ManifestEntry {
    pub fn new(content_hash: impl Into<String>, mod_time: f64) -> Self {
        Self {
            content_hash: content_hash.into(),
            mod_time,
        }
    }
}

/// 相对路径 -> 索引记录
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析索引内容，空内容得到空索引
    pub fn decode(raw: &str) -> Result<Self, ManifestError> {
        let mut entries = BTreeMap::new();

        for (index, line) in raw.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let malformed = || ManifestError::MalformedLine {
                line_number: index + 1,
                line: line.to_string(),
            };

            let fields: Vec<&str> = line.split(':').collect();
            let &[path, hash, mod_time] = fields.as_slice() else {
                return Err(malformed());
            };
            if !is_relative_key(path) {
                return Err(malformed());
            }
            let mod_time: f64 = mod_time.trim().parse().map_err(|_| malformed())?;

            entries.insert(path.to_string(), ManifestEntry::new(hash, mod_time));
        }

        Ok(Self { entries })
    }

    /// 解析原始字节（远端读取结果），`None` 表示从未同步过
    pub fn decode_bytes(raw: Option<&[u8]>) -> anyhow::Result<Self> {
        match raw {
            None => Ok(Self::new()),
            Some(bytes) => Ok(Self::decode(std::str::from_utf8(bytes)?)?),
        }
    }

    /// 序列化，按路径排序保证输出稳定
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (path, entry) in &self.entries {
            out.push_str(path);
            out.push(':');
            out.push_str(&entry.content_hash);
            out.push(':');
            out.push_str(&format_mod_time(entry.mod_time));
            out.push('\n');
        }
        out
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
        self.entries.remove(path)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 整个索引中最新的修改时间，空索引为 0
    pub fn latest_mod_time(&self) -> f64 {
        self.entries.values().map(|e| e.mod_time).fold(0.0, f64::max)
    }
}

/// 整数值写成 `100.0`，其余使用最短的可往返十进制表示
fn format_mod_time(mod_time: f64) -> String {
    if mod_time.is_finite() && mod_time.fract() == 0.0 {
        format!("{:.1}", mod_time)
    } else {
        format!("{}", mod_time)
    }
}

/// 键必须是同步根目录下的相对路径，不允许 `..`、`.`、空段或绝对路径
fn is_relative_key(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
