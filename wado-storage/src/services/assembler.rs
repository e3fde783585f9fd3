//! 元数据重建与汇总
//!
//! 去重的逆过程：按残留实例的引用加载片段并合并，得到完整实例元数据；
//! 研究结束时按序列分组，生成研究、序列、实例查询结果和序列元数据文件。

use crate::core::persist;
use crate::error::Result;
use crate::profile;
use crate::services::study::{SnapshotTarget, StudyData};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use wado_core::{Dataset, Value, Vr, tags};

/// 研究元数据汇总器
pub struct MetadataAssembler<'a> {
    study: &'a mut StudyData,
}

/// 单个序列的汇总
struct SeriesRecord {
    query: Dataset,
    metadata: Vec<Dataset>,
    instances: Vec<Dataset>,
}

impl<'a> MetadataAssembler<'a> {
    pub fn new(study: &'a mut StudyData) -> Self {
        Self { study }
    }

    /// 由残留实例重建完整元数据
    ///
    /// 缺失的片段记录警告后跳过，结果只包含能找到的字段。去重记账标签不出现在结果中。
    pub fn to_metadata(&mut self, residue: &Dataset) -> Dataset {
        let mut metadata = residue.clone();
        profile::strip_bookkeeping(&mut metadata);
        for reference in profile::refs(residue) {
            match self.study.get_or_load_extract(&reference) {
                Some(extract) => {
                    debug!("合并片段 {:?}", profile::fragment_type(extract));
                    let mut fields = extract.clone();
                    profile::strip_bookkeeping(&mut fields);
                    metadata.merge(&fields);
                }
                None => warn!("无法加载片段 {}", reference),
            }
        }
        metadata
    }

    /// 按残留哈希或 SOP UID 获取完整元数据
    pub fn get_metadata(&mut self, key: &str) -> Option<Dataset> {
        let hash = match self.study.residue(key) {
            Some(_) => key.to_string(),
            None => self.study.residue_hash_for_sop(key)?.to_string(),
        };
        let residue = self.study.residue(&hash)?.clone();
        Some(self.to_metadata(&residue))
    }

    /// 重建研究内全部实例，按序列分组写出查询结果和元数据，最后写研究快照
    ///
    /// 返回研究查询结果，供研究索引更新；研究为空时返回 `None`。
    pub fn write_study_metadata(&mut self) -> Result<Option<Dataset>> {
        if self.study.is_empty() {
            warn!("研究 {} 没有实例，不写元数据", self.study.study_uid());
            return Ok(None);
        }

        let residues: Vec<Dataset> = self.study.residues().map(|(_, r)| r.clone()).collect();
        let profile = std::sync::Arc::clone(&self.study.context().profile);

        let mut study_query: Option<Dataset> = None;
        let mut series: BTreeMap<String, SeriesRecord> = BTreeMap::new();
        for residue in &residues {
            let metadata = self.to_metadata(residue);
            if study_query.is_none() {
                study_query = Some(profile.study_query.select(&metadata));
            }
            let series_uid = metadata
                .string(tags::SERIES_INSTANCE_UID)
                .unwrap_or_default()
                .to_string();
            let record = series.entry(series_uid).or_insert_with(|| SeriesRecord {
                query: profile.series.select(&metadata),
                metadata: Vec::new(),
                instances: Vec::new(),
            });
            record.instances.push(profile.instance_query.select(&metadata));
            record.metadata.push(metadata);
        }

        let mut study_query = study_query.unwrap_or_default();
        let mut modalities: Vec<String> = Vec::new();
        let mut instance_total = 0usize;
        for record in series.values_mut() {
            record.metadata.sort_by(instance_order);
            record.instances.sort_by(instance_order);
            if let Some(modality) = record.query.string(tags::MODALITY)
                && !modalities.iter().any(|m| m == modality)
            {
                modalities.push(modality.to_string());
            }
            record.query.set_string(
                tags::NUMBER_OF_SERIES_RELATED_INSTANCES,
                Vr::IS,
                record.metadata.len().to_string(),
            );
            instance_total += record.metadata.len();
        }
        study_query.put(tags::MODALITIES_IN_STUDY, Vr::CS, Value::Strings(modalities));
        study_query.set_string(
            tags::NUMBER_OF_STUDY_RELATED_SERIES,
            Vr::IS,
            series.len().to_string(),
        );
        study_query.set_string(
            tags::NUMBER_OF_STUDY_RELATED_INSTANCES,
            Vr::IS,
            instance_total.to_string(),
        );

        let ctx = std::sync::Arc::clone(self.study.context());
        let study_dir = self.study.study_dir();
        let gzip = ctx.gzip_json;
        persist::write_datasets(&ctx.files, &study_dir, "studies", gzip, true, &[&study_query])?;
        let series_queries: Vec<&Dataset> = series.values().map(|r| &r.query).collect();
        persist::write_datasets(&ctx.files, &study_dir, "series", gzip, true, &series_queries)?;
        for (series_uid, record) in &series {
            let series_dir = study_dir.join(ctx.layout.series_dir_name(series_uid));
            persist::write_datasets(&ctx.files, &series_dir, "metadata", gzip, true, &record.metadata)?;
            persist::write_datasets(&ctx.files, &series_dir, "instances", gzip, true, &record.instances)?;
        }

        self.study.write_deduplicated_group(SnapshotTarget::Study)?;
        info!(
            "写出研究 {} 元数据: {} 个序列, {} 个实例",
            self.study.study_uid(),
            series.len(),
            instance_total
        );
        Ok(Some(study_query))
    }
}

/// 实例排序：实例号，其次 SOP UID
fn instance_order(a: &Dataset, b: &Dataset) -> std::cmp::Ordering {
    let number = |d: &Dataset| d.int(tags::INSTANCE_NUMBER).unwrap_or(i64::MAX);
    number(a)
        .cmp(&number(b))
        .then_with(|| a.string(tags::SOP_INSTANCE_UID).cmp(&b.string(tags::SOP_INSTANCE_UID)))
}
