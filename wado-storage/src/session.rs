//! 导入会话
//!
//! 一个会话同一时刻只持有一个打开的研究。收到其他研究的实例时先完成当前研究，
//! 关闭会话时完成最后一个研究。会话由一个连接或一次批量导入独占，不跨线程共享。

use crate::context::StoreContext;
use crate::error::{Result, StorageError};
use crate::index::StudyIndex;
use crate::layout::validate_uid;
use crate::services::assembler::MetadataAssembler;
use crate::services::bulkdata::BulkdataAddresser;
use crate::services::dedup::DeduplicationEngine;
use crate::services::image::ImageConverter;
use crate::services::study::{SnapshotTarget, StudyData};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wado_core::{Dataset, ParsedDataset, SopId};

/// 单个实例的导入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 新实例，附带残留哈希
    Stored(String),
    /// SOP 实例已存在，未做任何处理
    Duplicate,
    /// 内容与已有残留完全相同
    Unchanged,
}

/// 导入会话
pub struct IngestSession {
    ctx: Arc<StoreContext>,
    engine: DeduplicationEngine,
    addresser: BulkdataAddresser,
    index: Option<Arc<StudyIndex>>,
    current: Option<StudyData>,
    completed: Vec<String>,
}

impl IngestSession {
    pub fn new(ctx: Arc<StoreContext>, converter: Arc<ImageConverter>) -> Self {
        Self {
            engine: DeduplicationEngine::new(Arc::clone(&ctx.profile)),
            addresser: BulkdataAddresser::new(converter),
            ctx,
            index: None,
            current: None,
            completed: Vec::new(),
        }
    }

    /// 研究完成后更新根目录研究索引
    pub fn with_index(mut self, index: Arc<StudyIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn current_study(&self) -> Option<&StudyData> {
        self.current.as_ref()
    }

    /// 已完成的研究
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn ingest_parsed(&mut self, parsed: ParsedDataset) -> Result<IngestOutcome> {
        self.ingest(parsed.dataset, &parsed.transfer_syntax)
    }

    /// 导入一个实例
    pub fn ingest(&mut self, mut dataset: Dataset, transfer_syntax: &str) -> Result<IngestOutcome> {
        let id = SopId::from_dataset(&dataset)?;
        validate_uid("StudyInstanceUID", &id.study_uid)?;
        validate_uid("SeriesInstanceUID", &id.series_uid)?;
        validate_uid("SOPInstanceUID", &id.sop_uid)?;

        self.open_study(&id.study_uid)?;
        let study = self
            .current
            .as_mut()
            .ok_or_else(|| StorageError::InvalidDataset(format!("研究未打开: {}", id.study_uid)))?;

        if study.already_exists(&id) {
            study
                .stats()
                .add("Duplicate", 1, format!("跳过已存在的实例 {}", id));
            return Ok(IngestOutcome::Duplicate);
        }

        self.addresser
            .relocate(&id, study, &mut dataset, transfer_syntax)?;
        let outcome = match self.engine.accept(&id, study, &dataset)? {
            Some(hash) => IngestOutcome::Stored(hash),
            None => IngestOutcome::Unchanged,
        };
        debug!("导入 {}: {:?}", id, outcome);
        Ok(outcome)
    }

    /// 确保当前研究是 `study_uid`，切换研究时先完成旧研究
    ///
    /// 旧研究完成失败只记录警告，不影响新研究的实例；它的残留已在磁盘上，
    /// 下次打开该研究时恢复。
    fn open_study(&mut self, study_uid: &str) -> Result<()> {
        if let Some(previous) = self
            .current
            .as_ref()
            .filter(|study| study.study_uid() != study_uid)
            .map(|study| study.study_uid().to_string())
            && let Err(e) = self.finalize()
        {
            warn!("完成研究 {} 失败: {}", previous, e);
            self.current = None;
        }
        if self.current.is_none() {
            self.current = Some(StudyData::open(study_uid, Arc::clone(&self.ctx))?);
        }
        Ok(())
    }

    /// 完成当前研究：写研究快照、元数据和研究索引
    ///
    /// 返回研究查询结果，没有打开的研究时返回 `None`。写出失败时研究保持打开。
    pub fn finalize(&mut self) -> Result<Option<Dataset>> {
        let Some(study) = self.current.as_mut() else {
            return Ok(None);
        };
        info!("完成研究 {}", study.study_uid());
        study.write_deduplicated_group(SnapshotTarget::Group)?;
        let query = MetadataAssembler::new(&mut *study).write_study_metadata()?;
        if let (Some(index), Some(query)) = (&self.index, &query) {
            index.update(study.study_uid(), query)?;
        }
        study.stats().summarize();
        let study_uid = study.study_uid().to_string();
        self.current = None;
        self.completed.push(study_uid);
        Ok(query)
    }

    /// 关闭会话，返回本会话完成的全部研究
    pub fn close(mut self) -> Result<Vec<String>> {
        self.finalize()?;
        Ok(std::mem::take(&mut self.completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::TagProfile;
    use tempfile::TempDir;
    use wado_core::tags::*;
    use wado_core::{Vr, transfer};

    fn session(dir: &TempDir) -> IngestSession {
        let ctx = Arc::new(StoreContext::new(dir.path(), Arc::new(TagProfile::standard())));
        let index = Arc::new(StudyIndex::new(ctx.layout.clone()));
        IngestSession::new(ctx, Arc::new(ImageConverter::passthrough())).with_index(index)
    }

    fn instance(study: &str, sop: &str) -> Dataset {
        let mut ds = Dataset::new();
        ds.set_string(PATIENT_ID, Vr::LO, "P1");
        ds.set_string(STUDY_INSTANCE_UID, Vr::UI, study);
        ds.set_string(SERIES_INSTANCE_UID, Vr::UI, format!("{}.1", study));
        ds.set_string(SOP_INSTANCE_UID, Vr::UI, sop);
        ds.set_string(MODALITY, Vr::CS, "MR");
        ds
    }

    #[test]
    fn test_duplicate_rejected_before_processing() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);

        let first = session
            .ingest(instance("1.2", "1.2.1.1"), transfer::EXPLICIT_VR_LE)
            .unwrap();
        assert!(matches!(first, IngestOutcome::Stored(_)));
        let second = session
            .ingest(instance("1.2", "1.2.1.1"), transfer::EXPLICIT_VR_LE)
            .unwrap();
        assert_eq!(second, IngestOutcome::Duplicate);
        assert_eq!(session.current_study().unwrap().stats().count("Duplicate"), 1);
    }

    #[test]
    fn test_study_change_finalizes_previous() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        session
            .ingest(instance("1.2", "1.2.1.1"), transfer::EXPLICIT_VR_LE)
            .unwrap();
        session
            .ingest(instance("3.4", "3.4.1.1"), transfer::EXPLICIT_VR_LE)
            .unwrap();

        assert_eq!(session.completed(), ["1.2".to_string()]);
        assert!(dir.path().join("studies/1.2/studies.gz").exists());
        assert!(!dir.path().join("studies/3.4/studies.gz").exists());

        let completed = session.close().unwrap();
        assert_eq!(completed, vec!["1.2".to_string(), "3.4".to_string()]);
        let index = StudyIndex::new(crate::layout::StorageLayout::new(dir.path()));
        assert_eq!(index.studies().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_finalize_does_not_reject_next_study() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        session
            .ingest(instance("1.2", "1.2.1.1"), transfer::EXPLICIT_VR_LE)
            .unwrap();

        // 用同名文件占住序列目录，研究 1.2 的序列元数据无法写出
        let blocker = dir.path().join("studies/1.2/series/1.2.1");
        std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
        std::fs::write(&blocker, b"").unwrap();
        assert!(session.finalize().is_err());
        assert_eq!(session.current_study().unwrap().study_uid(), "1.2");

        let outcome = session
            .ingest(instance("3.4", "3.4.1.1"), transfer::EXPLICIT_VR_LE)
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
        assert!(session.completed().is_empty());
        assert_eq!(session.close().unwrap(), vec!["3.4".to_string()]);

        // 障碍移除后重新打开研究，之前的实例从磁盘恢复
        std::fs::remove_file(&blocker).unwrap();
        let mut session = self::session(&dir);
        session
            .ingest(instance("1.2", "1.2.1.2"), transfer::EXPLICIT_VR_LE)
            .unwrap();
        let query = session.finalize().unwrap().unwrap();
        assert_eq!(query.string(NUMBER_OF_STUDY_RELATED_INSTANCES), Some("2"));
    }

    #[test]
    fn test_unsafe_uid_rejected() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        let err = session
            .ingest(instance("1.2", "../etc"), transfer::EXPLICIT_VR_LE)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidDataset(_)));
        assert!(session.current_study().is_none());
    }
}
