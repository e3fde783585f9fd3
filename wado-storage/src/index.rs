//! 研究索引
//!
//! 根目录下的 `studies.gz` 保存全部研究的查询结果。研究完成时整体重写，
//! 同一 Study UID 的旧条目被替换，其余保持原顺序。

use crate::core::persist;
use crate::error::Result;
use crate::layout::StorageLayout;
use crate::core::files::FileStore;
use std::sync::Mutex;
use tracing::{info, warn};
use wado_core::{Dataset, tags};

/// 研究索引
///
/// 多个会话可能同时完成研究，重写过程用锁串行化。
#[derive(Debug)]
pub struct StudyIndex {
    layout: StorageLayout,
    files: FileStore,
    lock: Mutex<()>,
}

impl StudyIndex {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            files: FileStore::new(),
            lock: Mutex::new(()),
        }
    }

    /// 读取当前索引
    pub fn studies(&self) -> Result<Vec<Dataset>> {
        Ok(persist::read_datasets(&self.files, self.layout.root(), self.layout.study_index_name())?
            .unwrap_or_default())
    }

    /// 写入或替换一个研究的查询结果
    pub fn update(&self, study_uid: &str, query: &Dataset) -> Result<usize> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut studies = match self.studies() {
            Ok(studies) => studies,
            Err(e) => {
                warn!("研究索引无法读取，重新生成: {}", e);
                Vec::new()
            }
        };
        match studies
            .iter_mut()
            .find(|s| s.string(tags::STUDY_INSTANCE_UID) == Some(study_uid))
        {
            Some(existing) => *existing = query.clone(),
            None => studies.push(query.clone()),
        }

        persist::write_datasets(
            &self.files,
            self.layout.root(),
            self.layout.study_index_name(),
            true,
            true,
            &studies,
        )?;
        info!("写出研究索引 {:?}: {} 个研究", self.layout.root(), studies.len());
        Ok(studies.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wado_core::Vr;
    use wado_core::tags::*;

    fn query(uid: &str, description: &str) -> Dataset {
        let mut ds = Dataset::new();
        ds.set_string(STUDY_INSTANCE_UID, Vr::UI, uid);
        ds.set_string(STUDY_DESCRIPTION, Vr::LO, description);
        ds
    }

    #[test]
    fn test_update_replaces_same_study() {
        let dir = TempDir::new().unwrap();
        let index = StudyIndex::new(StorageLayout::new(dir.path()));

        assert_eq!(index.update("1.1", &query("1.1", "first")).unwrap(), 1);
        assert_eq!(index.update("2.2", &query("2.2", "other")).unwrap(), 2);
        assert_eq!(index.update("1.1", &query("1.1", "second")).unwrap(), 2);

        let studies = index.studies().unwrap();
        assert_eq!(studies[0].string(STUDY_DESCRIPTION), Some("second"));
        assert_eq!(studies[1].string(STUDY_INSTANCE_UID), Some("2.2"));
        assert!(dir.path().join("studies.gz").exists());
    }
}
