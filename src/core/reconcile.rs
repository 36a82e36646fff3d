//! 同步计划
//!
//! 只做决策，不做 IO。`plan_save` / `plan_restore` 根据本地清单和远端索引
//! 计算需要推送、拉取、删除和清理的相对路径。

use crate::core::manifest::Manifest;
use crate::core::scanner::Inventory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 本地文件缺失时使用的占位 hash，保证不会与任何真实 hash 相等
pub const PLACEHOLDER_HASH: &str = "0";

/// 一次 save 的整体方向
///
/// 整棵树只比较一次：本地最新修改时间晚于索引中最新的修改时间时本地为准（Push），
/// 否则远端为准（Pull）。不会逐个文件决定方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Push => write!(f, "push"),
            SyncDirection::Pull => write!(f, "pull"),
        }
    }
}

/// save 计划
#[derive(Debug, Clone, PartialEq)]
pub struct SavePlan {
    pub direction: SyncDirection,
    pub latest_local: f64,
    pub latest_remote: f64,
    /// 需要上传的文件（仅 Push）
    pub to_transfer: BTreeSet<String>,
    /// 本地已过期、需要删除的文件（仅 Pull）
    pub to_delete: BTreeSet<String>,
    /// 本地已删除、需要从索引移除的记录（仅 Push）
    pub to_purge: BTreeSet<String>,
}

impl SavePlan {
    pub fn is_noop(&self) -> bool {
        self.to_transfer.is_empty() && self.to_delete.is_empty() && self.to_purge.is_empty()
    }
}

/// restore 计划
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestorePlan {
    /// 需要从远端拉取的文件
    pub to_fetch: BTreeSet<String>,
    /// 索引中文件所在的目录（相对路径），拉取前要保证存在
    pub folders: BTreeSet<String>,
}

/// 计算 save 计划
pub fn plan_save(inventory: &Inventory, manifest: &Manifest) -> SavePlan {
    let latest_local = inventory.latest_mod_time();
    let latest_remote = manifest.latest_mod_time();

    let candidates: BTreeSet<String> = inventory
        .files
        .iter()
        .filter(|file| match manifest.get(&file.relative_path) {
            Some(recorded) => {
                file.content_hash != recorded.content_hash && file.mod_time > recorded.mod_time
            }
            None => true,
        })
        .map(|file| file.relative_path.clone())
        .collect();

    let local = inventory.by_path();
    let unindexed: BTreeSet<String> = manifest
        .keys()
        .filter(|key| !local.contains_key(key.as_str()))
        .cloned()
        .collect();

    let direction = if latest_local > latest_remote {
        SyncDirection::Push
    } else {
        SyncDirection::Pull
    };

    match direction {
        SyncDirection::Push => SavePlan {
            direction,
            latest_local,
            latest_remote,
            to_transfer: candidates,
            to_delete: BTreeSet::new(),
            to_purge: unindexed,
        },
        // 远端为准时，本地删除的文件保留在索引中，留给 restore 拉回
        SyncDirection::Pull => SavePlan {
            direction,
            latest_local,
            latest_remote,
            to_transfer: BTreeSet::new(),
            to_delete: candidates,
            to_purge: BTreeSet::new(),
        },
    }
}

/// 计算 restore 计划
///
/// 本地缺失的文件以占位 hash 和时间 0 参与比较，因此一定会被拉取；
/// 本地更新（修改时间不早于索引）的文件不会被覆盖。
pub fn plan_restore(inventory: &Inventory, manifest: &Manifest) -> RestorePlan {
    let mut plan = RestorePlan::default();
    let local = inventory.by_path();

    for (path, recorded) in manifest.iter() {
        if let Some((folder, _)) = path.rsplit_once('/') {
            if !folder.is_empty() {
                plan.folders.insert(folder.to_string());
            }
        }

        let (local_hash, local_time) = local
            .get(path.as_str())
            .map_or((PLACEHOLDER_HASH, 0.0), |f| (f.content_hash.as_str(), f.mod_time));

        if local_hash == recorded.content_hash || local_time >= recorded.mod_time {
            continue;
        }
        plan.to_fetch.insert(path.clone());
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::ManifestEntry;
    use crate::core::scanner::InventoryEntry;
    use std::path::PathBuf;

    fn inventory(files: &[(&str, &str, f64)]) -> Inventory {
        let root = PathBuf::from("/sync");
        Inventory {
            folders: vec![root.clone()],
            files: files
                .iter()
                .map(|(path, hash, mod_time)| InventoryEntry {
                    path: root.join(path),
                    relative_path: path.to_string(),
                    content_hash: hash.to_string(),
                    mod_time: *mod_time,
                })
                .collect(),
            root,
        }
    }

    fn manifest(entries: &[(&str, &str, f64)]) -> Manifest {
        let mut manifest = Manifest::new();
        for (path, hash, mod_time) in entries {
            manifest.insert(*path, ManifestEntry::new(*hash, *mod_time));
        }
        manifest
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_first_save_pushes_everything() {
        let plan = plan_save(&inventory(&[("a.txt", "H1", 100.0)]), &Manifest::new());

        assert_eq!(plan.direction, SyncDirection::Push);
        assert_eq!(plan.to_transfer, set(&["a.txt"]));
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_changed_file_is_pushed() {
        let plan = plan_save(
            &inventory(&[("a.txt", "H2", 200.0)]),
            &manifest(&[("a.txt", "H1", 100.0)]),
        );

        assert_eq!(plan.direction, SyncDirection::Push);
        assert_eq!(plan.to_transfer, set(&["a.txt"]));
    }

    #[test]
    fn test_equal_hash_is_never_transferred_or_deleted() {
        // 本地时间更新
        let newer = plan_save(
            &inventory(&[("a.txt", "H1", 500.0)]),
            &manifest(&[("a.txt", "H1", 100.0)]),
        );
        assert_eq!(newer.direction, SyncDirection::Push);
        assert!(newer.to_transfer.is_empty());

        // 本地时间更旧
        let older = plan_save(
            &inventory(&[("a.txt", "H1", 50.0)]),
            &manifest(&[("a.txt", "H1", 100.0)]),
        );
        assert_eq!(older.direction, SyncDirection::Pull);
        assert!(older.to_delete.is_empty());
    }

    #[test]
    fn test_remote_ahead_keeps_missing_file_for_restore() {
        let plan = plan_save(
            &inventory(&[("a.txt", "H1", 100.0)]),
            &manifest(&[("a.txt", "H1", 100.0), ("b.txt", "H3", 300.0)]),
        );

        assert_eq!(plan.direction, SyncDirection::Pull);
        assert!(plan.to_purge.is_empty());
        assert!(plan.is_noop());
    }

    #[test]
    fn test_remote_ahead_deletes_stale_local_files() {
        let plan = plan_save(
            &inventory(&[("a.txt", "H1", 100.0), ("new.txt", "N", 150.0)]),
            &manifest(&[("a.txt", "H1", 100.0), ("b.txt", "H3", 300.0)]),
        );

        assert_eq!(plan.direction, SyncDirection::Pull);
        assert_eq!(plan.to_delete, set(&["new.txt"]));
        assert!(plan.to_transfer.is_empty());
    }

    #[test]
    fn test_push_purges_locally_deleted_entries_without_transfers() {
        let plan = plan_save(
            &inventory(&[("a.txt", "H1", 200.0)]),
            &manifest(&[("a.txt", "H1", 100.0), ("gone.txt", "H9", 50.0)]),
        );

        assert_eq!(plan.direction, SyncDirection::Push);
        assert!(plan.to_transfer.is_empty());
        assert_eq!(plan.to_purge, set(&["gone.txt"]));
    }

    #[test]
    fn test_timestamps_compare_numerically_on_save() {
        // 按字符串比较 "10.0" <= "9.0"，旧实现会跳过这个文件
        let plan = plan_save(
            &inventory(&[("a.txt", "H2", 10.0)]),
            &manifest(&[("a.txt", "H1", 9.0)]),
        );

        assert_eq!(plan.direction, SyncDirection::Push);
        assert_eq!(plan.to_transfer, set(&["a.txt"]));
    }

    #[test]
    fn test_empty_everything_is_noop() {
        let plan = plan_save(&inventory(&[]), &Manifest::new());
        assert_eq!(plan.direction, SyncDirection::Pull);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_restore_fetches_missing_file() {
        let plan = plan_restore(&inventory(&[]), &manifest(&[("c.txt", "H4", 500.0)]));
        assert_eq!(plan.to_fetch, set(&["c.txt"]));
    }

    #[test]
    fn test_restore_skips_newer_and_equal_local() {
        let plan = plan_restore(
            &inventory(&[("newer.txt", "L", 900.0), ("same.txt", "S", 1.0), ("extra.txt", "X", 1.0)]),
            &manifest(&[("newer.txt", "R", 500.0), ("same.txt", "S", 500.0)]),
        );
        assert!(plan.to_fetch.is_empty());
    }

    #[test]
    fn test_timestamps_compare_numerically_on_restore() {
        // 按字符串比较 "9.0" >= "10.0"，旧实现不会拉取
        let plan = plan_restore(
            &inventory(&[("a.txt", "H1", 9.0)]),
            &manifest(&[("a.txt", "H2", 10.0)]),
        );
        assert_eq!(plan.to_fetch, set(&["a.txt"]));
    }

    #[test]
    fn test_restore_collects_folders() {
        let plan = plan_restore(
            &inventory(&[]),
            &manifest(&[("x/y/z.txt", "H", 1.0), ("x/w.txt", "H", 1.0), ("top.txt", "H", 1.0)]),
        );
        assert_eq!(plan.folders, set(&["x", "x/y"]));
    }
}
