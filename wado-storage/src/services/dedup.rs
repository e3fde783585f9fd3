//! 实例去重
//!
//! 按固定顺序（患者、研究、序列、图像、引用块）从实例中提取片段，
//! 每个片段按内容哈希单独存储，残留实例只保留片段哈希引用。

use crate::core::hasher::content_hash;
use crate::core::persist;
use crate::error::{Result, StorageError};
use crate::profile::{self, INSTANCE_TYPE, TagProfile};
use crate::services::study::StudyData;
use std::sync::Arc;
use tracing::debug;
use wado_core::{Dataset, SopId, Vr, tags};

/// 去重引擎
#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    profile: Arc<TagProfile>,
}

impl DeduplicationEngine {
    pub fn new(profile: Arc<TagProfile>) -> Self {
        Self { profile }
    }

    /// 把实例拆成片段和残留，写入研究数据
    ///
    /// 返回残留哈希；残留已存在时返回 `None`，不重复写入。
    pub fn accept(
        &self,
        id: &SopId,
        study: &mut StudyData,
        dataset: &Dataset,
    ) -> Result<Option<String>> {
        let mut residue = dataset.clone();
        profile::strip_bookkeeping(&mut residue);

        for shape in self.profile.dedup_shapes() {
            let mut extract = shape.select(&residue);
            shape.stamp_type(&mut extract);
            let hash = content_hash(&mut extract);
            if !study.is_known(&hash) {
                self.write_extract(study, &hash, &extract)?;
            }
            study.add_extract(extract);
            shape.remove(&mut residue);
            profile::add_ref(&mut residue, &hash);
        }

        profile::set_fragment_type(&mut residue, INSTANCE_TYPE);
        residue.set_string(tags::SERIES_INSTANCE_UID, Vr::UI, id.series_uid.as_str());
        residue.set_string(tags::SOP_INSTANCE_UID, Vr::UI, id.sop_uid.as_str());
        let hash = content_hash(&mut residue);

        let Some(added) = study.add_deduplicated(residue.clone()) else {
            debug!("残留实例已存在: {} ({})", id, hash);
            return Ok(None);
        };
        self.write_instance(study, &added, &residue)?;
        Ok(Some(added))
    }

    /// 写出提取片段，已存在的文件不覆盖
    fn write_extract(&self, study: &StudyData, hash: &str, extract: &Dataset) -> Result<()> {
        let ctx = study.context();
        let name = ctx.layout.extract_name(hash);
        match persist::write_datasets(&ctx.files, &study.study_dir(), &name, true, false, &[extract]) {
            Ok(_) => {
                study.stats().add(
                    "WriteExtract",
                    1000,
                    format!("写出片段 {} 于 {}", name, study.study_uid()),
                );
                Ok(())
            }
            Err(StorageError::WriteConflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 写出单实例残留
    fn write_instance(&self, study: &StudyData, hash: &str, residue: &Dataset) -> Result<()> {
        let ctx = study.context();
        let dir = ctx.layout.instances_dir(study.study_uid());
        let name = ctx.layout.deduplicated_name(hash);
        match persist::write_datasets(&ctx.files, &dir, &name, true, false, &[residue]) {
            Ok(_) => {
                study.stats().add(
                    "WriteInstanceDeduplicate",
                    100,
                    format!("写出单实例残留 {} 于 {}", hash, study.study_uid()),
                );
                Ok(())
            }
            Err(StorageError::WriteConflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StoreContext;
    use tempfile::TempDir;
    use wado_core::tags::*;

    fn instance(series: &str, sop: &str) -> Dataset {
        let mut ds = Dataset::new();
        ds.set_string(PATIENT_NAME, Vr::PN, "Doe^Jane");
        ds.set_string(PATIENT_ID, Vr::LO, "P1");
        ds.set_string(STUDY_INSTANCE_UID, Vr::UI, "1.2.3");
        ds.set_string(STUDY_DATE, Vr::DA, "20240101");
        ds.set_string(SERIES_INSTANCE_UID, Vr::UI, series);
        ds.set_string(MODALITY, Vr::CS, "CT");
        ds.set_string(SOP_INSTANCE_UID, Vr::UI, sop);
        ds.set_int(ROWS, Vr::US, 512);
        ds.set_int(INSTANCE_NUMBER, Vr::IS, 1);
        ds
    }

    fn setup(dir: &TempDir) -> (DeduplicationEngine, StudyData) {
        let profile = Arc::new(TagProfile::standard());
        let ctx = Arc::new(StoreContext::new(dir.path(), Arc::clone(&profile)));
        (DeduplicationEngine::new(profile), StudyData::new("1.2.3", ctx))
    }

    #[test]
    fn test_residue_references_every_shape() {
        let dir = TempDir::new().unwrap();
        let (engine, mut study) = setup(&dir);
        let ds = instance("1.2.3.4", "1.2.3.4.5");
        let id = SopId::from_dataset(&ds).unwrap();

        let hash = engine.accept(&id, &mut study, &ds).unwrap().unwrap();
        let residue = study.residue(&hash).unwrap();

        assert_eq!(profile::refs(residue).len(), 5);
        assert_eq!(profile::fragment_type(residue), Some(INSTANCE_TYPE));
        assert_eq!(residue.string(SOP_INSTANCE_UID), Some("1.2.3.4.5"));
        assert_eq!(residue.string(SERIES_INSTANCE_UID), Some("1.2.3.4"));
        assert!(!residue.contains(PATIENT_NAME));
        assert!(!residue.contains(STUDY_DATE));
        assert!(!residue.contains(ROWS));
        assert!(residue.contains(INSTANCE_NUMBER));
        assert!(dir.path().join("instances/1.2.3").join(format!("{}.gz", hash)).exists());
    }

    #[test]
    fn test_same_instance_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let (engine, mut study) = setup(&dir);
        let ds = instance("1.2.3.4", "1.2.3.4.5");
        let id = SopId::from_dataset(&ds).unwrap();

        assert!(engine.accept(&id, &mut study, &ds).unwrap().is_some());
        assert!(engine.accept(&id, &mut study, &ds).unwrap().is_none());
        assert_eq!(study.residue_count(), 1);
    }

    #[test]
    fn test_shared_patient_fragment_stored_once() {
        let dir = TempDir::new().unwrap();
        let (engine, mut study) = setup(&dir);
        for (series, sop) in [("1.2.3.4", "1.2.3.4.5"), ("1.2.3.7", "1.2.3.7.8")] {
            let ds = instance(series, sop);
            let id = SopId::from_dataset(&ds).unwrap();
            engine.accept(&id, &mut study, &ds).unwrap();
        }
        // 患者、研究、图像、引用块共享，序列两个
        assert_eq!(study.extract_count(), 6);
        assert_eq!(study.residue_count(), 2);
    }
}
