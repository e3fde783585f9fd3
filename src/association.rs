//! 网络关联注册表
//!
//! 每个关联对应一个独立的工作线程，线程独占该关联的导入会话；
//! 数据集经通道送入，处理结果经 oneshot 返回。关联关闭时完成其打开的研究。

use crate::error::{Result, WadoError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};
use wado_core::ParsedDataset;
use wado_storage::{ImageConverter, IngestOutcome, IngestSession, StoreContext, StudyIndex};

/// 每个关联排队等待处理的数据集上限
const QUEUE_DEPTH: usize = 32;

/// 存储请求的应答状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreStatus {
    Success,
    DuplicateSopInstance,
    ProcessingFailure(String),
}

/// 发给关联工作线程的消息
enum AssociationMessage {
    Data {
        parsed: ParsedDataset,
        reply: oneshot::Sender<StoreStatus>,
    },
    Close {
        reply: oneshot::Sender<wado_storage::Result<Vec<String>>>,
    },
}

/// 关联注册表
pub struct AssociationRegistry {
    ctx: Arc<StoreContext>,
    converter: Arc<ImageConverter>,
    index: Arc<StudyIndex>,
    max_associations: usize,
    associations: RwLock<HashMap<String, mpsc::Sender<AssociationMessage>>>,
}

impl AssociationRegistry {
    pub fn new(
        ctx: Arc<StoreContext>,
        converter: Arc<ImageConverter>,
        max_associations: usize,
    ) -> Self {
        let index = Arc::new(StudyIndex::new(ctx.layout.clone()));
        Self {
            ctx,
            converter,
            index,
            max_associations,
            associations: RwLock::new(HashMap::new()),
        }
    }

    /// 当前打开的关联数
    pub async fn active(&self) -> usize {
        self.associations.read().await.len()
    }

    /// 打开关联，已打开时不做任何事
    pub async fn open(&self, id: &str) -> Result<()> {
        let mut associations = self.associations.write().await;
        if associations.contains_key(id) {
            return Ok(());
        }
        if associations.len() >= self.max_associations {
            return Err(WadoError::Session(format!(
                "关联数已达上限 {}，拒绝 {}",
                self.max_associations, id
            )));
        }

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let session = IngestSession::new(Arc::clone(&self.ctx), Arc::clone(&self.converter))
            .with_index(Arc::clone(&self.index));
        let name = id.to_string();
        tokio::task::spawn_blocking(move || run_association(name, session, rx));
        associations.insert(id.to_string(), tx);
        info!("打开关联 {}", id);
        Ok(())
    }

    /// 处理一个数据集，未打开的关联在首个数据集到达时自动打开
    pub async fn store(&self, id: &str, parsed: ParsedDataset) -> StoreStatus {
        if let Err(e) = self.open(id).await {
            return StoreStatus::ProcessingFailure(e.to_string());
        }
        let Some(sender) = self.associations.read().await.get(id).cloned() else {
            return StoreStatus::ProcessingFailure(format!("关联 {} 已关闭", id));
        };

        let (reply, response) = oneshot::channel();
        if sender
            .send(AssociationMessage::Data { parsed, reply })
            .await
            .is_err()
        {
            return StoreStatus::ProcessingFailure(format!("关联 {} 的工作线程已退出", id));
        }
        response
            .await
            .unwrap_or_else(|_| StoreStatus::ProcessingFailure(format!("关联 {} 未返回结果", id)))
    }

    /// 关闭关联并完成其研究，返回该关联完成的全部研究
    pub async fn close(&self, id: &str) -> Result<Vec<String>> {
        let Some(sender) = self.associations.write().await.remove(id) else {
            debug!("关闭未知关联 {}", id);
            return Ok(Vec::new());
        };
        let (reply, response) = oneshot::channel();
        sender
            .send(AssociationMessage::Close { reply })
            .await
            .map_err(|_| WadoError::Session(format!("关联 {} 的工作线程已退出", id)))?;
        let studies = response
            .await
            .map_err(|_| WadoError::Session(format!("关联 {} 未返回结果", id)))??;
        info!("关闭关联 {}: 完成 {} 个研究", id, studies.len());
        Ok(studies)
    }

    /// 关闭全部关联
    pub async fn close_all(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = self.associations.read().await.keys().cloned().collect();
        let mut studies = Vec::new();
        for id in ids {
            studies.extend(self.close(&id).await?);
        }
        Ok(studies)
    }
}

/// 关联工作线程：独占会话，顺序处理消息
fn run_association(
    id: String,
    mut session: IngestSession,
    mut rx: mpsc::Receiver<AssociationMessage>,
) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            AssociationMessage::Data { parsed, reply } => {
                let status = match session.ingest_parsed(parsed) {
                    Ok(IngestOutcome::Stored(_)) | Ok(IngestOutcome::Unchanged) => {
                        StoreStatus::Success
                    }
                    Ok(IngestOutcome::Duplicate) => StoreStatus::DuplicateSopInstance,
                    Err(e) => {
                        warn!("关联 {} 处理数据集失败: {}", id, e);
                        StoreStatus::ProcessingFailure(e.to_string())
                    }
                };
                let _ = reply.send(status);
            }
            AssociationMessage::Close { reply } => {
                let _ = reply.send(session.close());
                return;
            }
        }
    }

    // 注册表被丢弃，仍然完成当前研究
    if let Err(e) = session.close() {
        warn!("关联 {} 完成研究失败: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wado_core::tags::*;
    use wado_core::{Dataset, Vr, transfer};
    use wado_storage::TagProfile;

    fn registry(dir: &TempDir, max: usize) -> AssociationRegistry {
        let ctx = Arc::new(StoreContext::new(dir.path(), Arc::new(TagProfile::standard())));
        AssociationRegistry::new(ctx, Arc::new(ImageConverter::passthrough()), max)
    }

    fn parsed(study: &str, sop: &str) -> ParsedDataset {
        let mut ds = Dataset::new();
        ds.set_string(PATIENT_ID, Vr::LO, "P1");
        ds.set_string(STUDY_INSTANCE_UID, Vr::UI, study);
        ds.set_string(SERIES_INSTANCE_UID, Vr::UI, format!("{}.1", study));
        ds.set_string(SOP_INSTANCE_UID, Vr::UI, sop);
        ds.set_string(MODALITY, Vr::CS, "CT");
        ParsedDataset {
            dataset: ds,
            transfer_syntax: transfer::EXPLICIT_VR_LE.to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_reported() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, 4);

        assert_eq!(registry.store("a1", parsed("1.1", "1.1.1.1")).await, StoreStatus::Success);
        assert_eq!(
            registry.store("a1", parsed("1.1", "1.1.1.1")).await,
            StoreStatus::DuplicateSopInstance
        );
        assert_eq!(registry.close("a1").await.unwrap(), vec!["1.1".to_string()]);
        assert_eq!(registry.active().await, 0);
        assert!(dir.path().join("studies/1.1/studies.gz").exists());
    }

    #[tokio::test]
    async fn test_unsafe_sop_uid_is_processing_failure() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, 4);

        for sop in ["1.1.1..2", "1.1:2"] {
            let status = registry.store("a1", parsed("1.1", sop)).await;
            assert!(matches!(status, StoreStatus::ProcessingFailure(_)), "{}", sop);
        }
        assert!(registry.close("a1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_associations_are_independent() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(registry(&dir, 4));

        let mut handles = Vec::new();
        for (assoc, study) in [("a1", "2.1"), ("a2", "2.2")] {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                for n in 1..=3 {
                    let status = registry
                        .store(assoc, parsed(study, &format!("{}.1.{}", study, n)))
                        .await;
                    assert_eq!(status, StoreStatus::Success);
                }
                registry.close(assoc).await.unwrap()
            }));
        }
        let mut studies = Vec::new();
        for handle in handles {
            studies.extend(handle.await.unwrap());
        }
        studies.sort();
        assert_eq!(studies, vec!["2.1".to_string(), "2.2".to_string()]);

        let index = StudyIndex::new(wado_storage::StorageLayout::new(dir.path()));
        assert_eq!(index.studies().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_association_limit() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, 1);

        registry.open("a1").await.unwrap();
        registry.open("a1").await.unwrap();
        assert!(matches!(registry.open("a2").await, Err(WadoError::Session(_))));
        assert!(matches!(
            registry.store("a2", parsed("3.1", "3.1.1.1")).await,
            StoreStatus::ProcessingFailure(_)
        ));
        registry.close_all().await.unwrap();
        assert_eq!(registry.active().await, 0);
    }
}
