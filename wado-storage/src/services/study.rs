//! 研究级片段存储
//!
//! 每个研究一个 [`StudyData`]，维护：
//! - 残留实例：哈希 → 残留数据集（先写者胜）
//! - 提取片段：哈希 → 片段数据集（内存缓存，缺失时从磁盘加载）
//! - SOP UID → 残留哈希
//! - 已知哈希：哈希 → 来源文件名，用于跳过已经持久化的快照
//!
//! 同一时刻只被一个导入会话独占，不做内部加锁。

use crate::context::StoreContext;
use crate::core::hasher::{content_hash, hash_tokens, stamp_hash, stored_hash};
use crate::core::persist;
use crate::error::{Result, StorageError};
use crate::profile::{self, INFO_TYPE, INSTANCE_TYPE};
use crate::stats::Stats;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wado_core::{Dataset, SopId, tags};

/// 研究目录下研究快照的文件名
pub const STUDY_SNAPSHOT_NAME: &str = "deduplicated";

/// 快照写入目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTarget {
    /// `deduplicated/<study>/<hash>.gz`，不覆盖已有文件
    Group,
    /// `studies/<study>/deduplicated.gz`，附带全部提取片段，覆盖写入
    Study,
}

/// 单个研究的去重数据
pub struct StudyData {
    study_uid: String,
    ctx: Arc<StoreContext>,
    stats: Arc<Stats>,
    residues: BTreeMap<String, Dataset>,
    extracts: BTreeMap<String, Dataset>,
    sop_to_residue: HashMap<String, String>,
    known_hashes: HashMap<String, String>,
    study_snapshot: Option<String>,
}

impl StudyData {
    /// 创建空的研究数据
    pub fn new(study_uid: impl Into<String>, ctx: Arc<StoreContext>) -> Self {
        let study_uid = study_uid.into();
        let stats = ctx.stats.child(format!("study {}", study_uid));
        Self {
            study_uid,
            ctx,
            stats,
            residues: BTreeMap::new(),
            extracts: BTreeMap::new(),
            sop_to_residue: HashMap::new(),
            known_hashes: HashMap::new(),
            study_snapshot: None,
        }
    }

    /// 创建研究数据并从磁盘恢复已有状态
    pub fn open(study_uid: impl Into<String>, ctx: Arc<StoreContext>) -> Result<Self> {
        let mut study = Self::new(study_uid, ctx);
        study.read_deduplicated_group()?;
        study.read_deduplicated_instances()?;
        study.read_study_snapshot_marker();
        if !study.is_empty() {
            info!(
                "恢复研究 {}: {} 个实例, {} 个片段",
                study.study_uid,
                study.residues.len(),
                study.extracts.len()
            );
        }
        Ok(study)
    }

    pub fn study_uid(&self) -> &str {
        &self.study_uid
    }

    pub fn context(&self) -> &Arc<StoreContext> {
        &self.ctx
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn study_dir(&self) -> PathBuf {
        self.ctx.layout.study_dir(&self.study_uid)
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// 实例数
    pub fn len(&self) -> usize {
        if self.sop_to_residue.len() != self.residues.len() {
            debug!(
                "SOP 映射数 {} 与残留数 {} 不一致",
                self.sop_to_residue.len(),
                self.residues.len()
            );
        }
        self.sop_to_residue.len()
    }

    pub fn residue_count(&self) -> usize {
        self.residues.len()
    }

    pub fn extract_count(&self) -> usize {
        self.extracts.len()
    }

    /// 按哈希顺序遍历残留实例
    pub fn residues(&self) -> impl Iterator<Item = (&String, &Dataset)> {
        self.residues.iter()
    }

    pub fn residue(&self, hash: &str) -> Option<&Dataset> {
        self.residues.get(hash)
    }

    pub fn residue_hash_for_sop(&self, sop_uid: &str) -> Option<&str> {
        self.sop_to_residue.get(sop_uid).map(String::as_str)
    }

    pub fn is_known(&self, hash: &str) -> bool {
        self.known_hashes.contains_key(hash)
    }

    // ========================================================================
    // 添加
    // ========================================================================

    /// 记录提取片段，仅在首次加入时返回其哈希
    pub fn add_extract(&mut self, mut extract: Dataset) -> Option<String> {
        let hash = content_hash(&mut extract);
        if self.extracts.contains_key(&hash) {
            return None;
        }
        self.extracts.insert(hash.clone(), extract);
        self.known_hashes
            .insert(hash.clone(), self.ctx.layout.extract_name(&hash));
        Some(hash)
    }

    /// 记录残留实例，仅在首次加入时返回其哈希
    pub fn add_deduplicated(&mut self, mut residue: Dataset) -> Option<String> {
        let hash = content_hash(&mut residue);
        // 后加入的残留取代同一 SOP 的旧版本
        if let Some(sop_uid) = residue.string(tags::SOP_INSTANCE_UID) {
            self.sop_to_residue.insert(sop_uid.to_string(), hash.clone());
        }
        if self.residues.contains_key(&hash) {
            self.stats.add(
                "SkipDeduplicated",
                5000,
                format!("跳过重复实例 {} 于 {}", hash, self.study_uid),
            );
            return None;
        }
        debug!("加入去重实例 {} 于 {}", hash, self.study_uid);
        self.residues.insert(hash.clone(), residue);
        self.known_hashes
            .insert(hash.clone(), self.ctx.layout.deduplicated_name(&hash));
        self.stats.add(
            "AddDeduplicated",
            5000,
            format!("加入去重实例于 {}", self.study_uid),
        );
        Some(hash)
    }

    /// SOP 实例是否已经存在
    pub fn already_exists(&self, id: &SopId) -> bool {
        self.sop_to_residue.contains_key(&id.sop_uid)
    }

    // ========================================================================
    // 快照
    // ========================================================================

    /// 当前全部残留的快照哈希
    pub fn snapshot_hash(&self) -> String {
        hash_tokens(self.residues.keys().map(String::as_str))
    }

    /// 写出当前残留集合的快照
    ///
    /// 快照哈希已知（已写过或从磁盘恢复过）时跳过，返回 `false`。
    pub fn write_deduplicated_group(&mut self, target: SnapshotTarget) -> Result<bool> {
        if self.residues.is_empty() {
            return Ok(false);
        }
        let snapshot = self.snapshot_hash();
        let already_written = match target {
            SnapshotTarget::Group => self.known_hashes.contains_key(&snapshot),
            SnapshotTarget::Study => self.study_snapshot.as_deref() == Some(snapshot.as_str()),
        };
        if already_written {
            debug!("快照 {} 未变化，跳过写入", snapshot);
            return Ok(false);
        }

        let mut info = Dataset::new();
        profile::set_refs(&mut info, self.extracts.keys().cloned());
        profile::set_fragment_type(&mut info, INFO_TYPE);
        stamp_hash(&mut info, &snapshot);

        let mut items: Vec<&Dataset> = Vec::with_capacity(1 + self.residues.len());
        items.push(&info);
        items.extend(self.residues.values());

        match target {
            SnapshotTarget::Group => {
                let dir = self.ctx.layout.deduplicated_dir(&self.study_uid);
                let name = self.ctx.layout.deduplicated_name(&snapshot);
                match persist::write_datasets(&self.ctx.files, &dir, &name, true, false, &items) {
                    Ok(_) => {}
                    Err(StorageError::WriteConflict(path)) => {
                        debug!("快照已存在于磁盘: {}", path);
                        self.known_hashes.insert(snapshot, name);
                        return Ok(false);
                    }
                    Err(e) => return Err(e),
                }
                self.known_hashes.insert(snapshot, name);
            }
            SnapshotTarget::Study => {
                items.extend(self.extracts.values());
                let dir = self.study_dir();
                persist::write_datasets(
                    &self.ctx.files,
                    &dir,
                    STUDY_SNAPSHOT_NAME,
                    true,
                    true,
                    &items,
                )?;
                self.study_snapshot = Some(snapshot);
            }
        }

        self.stats.add(
            "GroupDeduplicated",
            1,
            format!("合并单实例去重数据: {} 个实例", self.residues.len()),
        );
        Ok(true)
    }

    // ========================================================================
    // 片段加载
    // ========================================================================

    /// 获取提取片段，缓存未命中时从研究目录加载
    pub fn get_or_load_extract(&mut self, hash: &str) -> Option<&Dataset> {
        if !self.extracts.contains_key(hash) {
            let name = self.ctx.layout.extract_name(hash);
            match persist::read_single(&self.ctx.files, &self.study_dir(), &name) {
                Ok(Some(extract)) => {
                    self.extracts.insert(hash.to_string(), extract);
                }
                Ok(None) => {
                    warn!("提取片段不存在: {}", name);
                    return None;
                }
                Err(e) => {
                    warn!("读取提取片段 {} 失败: {}", name, e);
                    return None;
                }
            }
        }
        self.extracts.get(hash)
    }

    // ========================================================================
    // 恢复
    // ========================================================================

    /// 从 `deduplicated/<study>` 恢复快照
    pub fn read_deduplicated_group(&mut self) -> Result<()> {
        let dir = self.ctx.layout.deduplicated_dir(&self.study_uid);
        self.read_deduplicated_dir(dir)
    }

    /// 从 `instances/<study>` 恢复单实例残留
    pub fn read_deduplicated_instances(&mut self) -> Result<()> {
        let dir = self.ctx.layout.instances_dir(&self.study_uid);
        self.read_deduplicated_dir(dir)
    }

    fn read_deduplicated_dir(&mut self, dir: PathBuf) -> Result<()> {
        let files = self.ctx.files.list_contents_increasing_age(&dir)?;
        if files.is_empty() {
            return Ok(());
        }
        debug!("读取 {} 个去重文件: {:?}", files.len(), dir);

        // 按修改时间从旧到新处理，被替代的快照先读入
        for entry in files.iter() {
            let Some(hash) = entry.name.strip_suffix(".gz") else {
                continue;
            };
            if self.known_hashes.contains_key(hash) {
                continue;
            }
            self.known_hashes
                .insert(hash.to_string(), entry.name.clone());

            let items = match persist::read_datasets(&self.ctx.files, &dir, &entry.name) {
                Ok(Some(items)) => items,
                Ok(None) => continue,
                Err(e) => {
                    warn!("读取 {:?}/{} 失败: {}", dir, entry.name, e);
                    continue;
                }
            };
            for item in items {
                match profile::fragment_type(&item) {
                    Some(INFO_TYPE) => {
                        for reference in profile::refs(&item) {
                            self.known_hashes.insert(reference, entry.name.clone());
                        }
                    }
                    Some(INSTANCE_TYPE) => {
                        self.add_deduplicated(item);
                    }
                    _ => {
                        self.add_extract(item);
                    }
                }
            }
        }
        Ok(())
    }

    /// 读取研究目录中上次写出的研究快照哈希
    fn read_study_snapshot_marker(&mut self) {
        let dir = self.study_dir();
        match persist::read_single(&self.ctx.files, &dir, STUDY_SNAPSHOT_NAME) {
            Ok(Some(info)) if profile::fragment_type(&info) == Some(INFO_TYPE) => {
                self.study_snapshot = stored_hash(&info);
            }
            Ok(_) => {}
            Err(e) => debug!("读取研究快照失败 {:?}: {}", dir, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::TagProfile;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;
    use wado_core::Vr;
    use wado_core::tags::*;

    fn context(dir: &TempDir) -> Arc<StoreContext> {
        Arc::new(StoreContext::new(dir.path(), Arc::new(TagProfile::standard())))
    }

    fn residue(sop: &str) -> Dataset {
        let mut ds = Dataset::new();
        ds.set_string(SOP_INSTANCE_UID, Vr::UI, sop);
        ds.set_string(SERIES_INSTANCE_UID, Vr::UI, "1.2.3.4");
        profile::set_fragment_type(&mut ds, INSTANCE_TYPE);
        ds
    }

    fn deduplicated_files(dir: &TempDir) -> Vec<String> {
        let path = dir.path().join("deduplicated/1.2.3");
        let mut names: Vec<String> = std::fs::read_dir(path)
            .map(|rd| {
                rd.map(|e| e.unwrap().file_name().into_string().unwrap())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn test_add_deduplicated_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut study = StudyData::new("1.2.3", context(&dir));

        let first = study.add_deduplicated(residue("1.2.3.4.5"));
        assert!(first.is_some());
        assert_eq!(study.add_deduplicated(residue("1.2.3.4.5")), None);
        assert_eq!(study.residue_count(), 1);
        assert_eq!(study.len(), 1);
        assert!(study.already_exists(&SopId::new("1.2.3", "1.2.3.4", "1.2.3.4.5")));
        assert!(!study.already_exists(&SopId::new("1.2.3", "1.2.3.4", "9")));
    }

    #[test]
    fn test_add_extract_first_writer_wins() {
        let dir = TempDir::new().unwrap();
        let mut study = StudyData::new("1.2.3", context(&dir));
        let mut extract = Dataset::new();
        extract.set_string(PATIENT_ID, Vr::LO, "P1");

        let hash = study.add_extract(extract.clone()).unwrap();
        assert_eq!(study.add_extract(extract), None);
        assert!(study.is_known(&hash));
        assert_eq!(study.extract_count(), 1);
    }

    #[test]
    fn test_group_snapshot_written_once() {
        let dir = TempDir::new().unwrap();
        let mut study = StudyData::new("1.2.3", context(&dir));
        study.add_deduplicated(residue("1.2.3.4.5"));

        assert!(study.write_deduplicated_group(SnapshotTarget::Group).unwrap());
        let files = deduplicated_files(&dir);
        assert_eq!(files.len(), 1);
        let modified = std::fs::metadata(dir.path().join("deduplicated/1.2.3").join(&files[0]))
            .unwrap()
            .modified()
            .unwrap();

        assert!(!study.write_deduplicated_group(SnapshotTarget::Group).unwrap());
        assert_eq!(deduplicated_files(&dir), files);
        let again = std::fs::metadata(dir.path().join("deduplicated/1.2.3").join(&files[0]))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(modified, again);

        study.add_deduplicated(residue("1.2.3.4.6"));
        assert!(study.write_deduplicated_group(SnapshotTarget::Group).unwrap());
        assert_eq!(deduplicated_files(&dir).len(), 2);
    }

    #[test]
    fn test_empty_study_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut study = StudyData::new("1.2.3", context(&dir));
        assert!(!study.write_deduplicated_group(SnapshotTarget::Group).unwrap());
        assert!(deduplicated_files(&dir).is_empty());
    }

    #[test]
    fn test_rehydrate_from_snapshot() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let snapshot = {
            let mut study = StudyData::new("1.2.3", Arc::clone(&ctx));
            study.add_deduplicated(residue("1.2.3.4.5"));
            study.add_deduplicated(residue("1.2.3.4.6"));
            let mut extract = Dataset::new();
            extract.set_string(PATIENT_ID, Vr::LO, "P1");
            study.add_extract(extract);
            study.write_deduplicated_group(SnapshotTarget::Group).unwrap();
            study.write_deduplicated_group(SnapshotTarget::Study).unwrap();
            study.snapshot_hash()
        };

        let mut reopened = StudyData::open("1.2.3", ctx).unwrap();
        assert_eq!(reopened.residue_count(), 2);
        assert!(reopened.already_exists(&SopId::new("1.2.3", "1.2.3.4", "1.2.3.4.6")));
        assert_eq!(reopened.snapshot_hash(), snapshot);
        assert!(reopened.is_known(&snapshot));

        // 缓存已预热，两个目标都不需要重写
        assert!(!reopened.write_deduplicated_group(SnapshotTarget::Group).unwrap());
        assert!(!reopened.write_deduplicated_group(SnapshotTarget::Study).unwrap());
    }

    #[test]
    fn test_rehydrate_replays_oldest_snapshot_first() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let write_version = |description: &str| {
            let mut study = StudyData::new("1.2.3", Arc::clone(&ctx));
            let mut ds = residue("1.2.3.4.5");
            ds.set_string(SERIES_DESCRIPTION, Vr::LO, description);
            let hash = study.add_deduplicated(ds).unwrap();
            study.write_deduplicated_group(SnapshotTarget::Group).unwrap();
            (hash, study.snapshot_hash())
        };
        let (_, old_snapshot) = write_version("old");
        let (new_hash, new_snapshot) = write_version("new");

        // 处理顺序只由修改时间决定
        let new_time = SystemTime::now() - Duration::from_secs(3600);
        let old_time = new_time - Duration::from_secs(3600);
        for (snapshot, time) in [(&old_snapshot, old_time), (&new_snapshot, new_time)] {
            let path = dir.path().join("deduplicated/1.2.3").join(format!("{}.gz", snapshot));
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(time)
                .unwrap();
        }

        let reopened = StudyData::open("1.2.3", ctx).unwrap();
        assert_eq!(reopened.residue_count(), 2);
        assert_eq!(reopened.residue_hash_for_sop("1.2.3.4.5"), Some(new_hash.as_str()));
    }

    #[test]
    fn test_missing_extract_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut study = StudyData::new("1.2.3", context(&dir));
        assert!(study.get_or_load_extract("doesnotexist").is_none());
    }
}
