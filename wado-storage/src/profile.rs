//! 标签配置
//!
//! 片段形状（按语义划分的固定标签集合）、内容类型映射表和单文件扩展名表。
//! 启动时构造一次，以 `Arc` 共享给所有组件，运行期不可变。

use crate::core::hasher::{dedup_block, dedup_tag, stamp_creator};
use std::collections::BTreeMap;
use wado_core::tags::{self, Tag};
use wado_core::{Dataset, Value, Vr, transfer};

/// 残留实例的类型标记
pub const INSTANCE_TYPE: &str = "instance";
/// 快照信息记录的类型标记
pub const INFO_TYPE: &str = "info";

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const IMAGE_JPEG: &str = "image/jpeg";
pub const IMAGE_JPEG_LOSSLESS: &str = "image/jll";
pub const IMAGE_JPEG_LS: &str = "image/jls";
pub const IMAGE_JP2: &str = "image/jp2";
pub const IMAGE_RLE: &str = "image/x-dicom-rle";
pub const VIDEO_MPEG2: &str = "video/mpeg";
pub const VIDEO_H264: &str = "video/mp4";
pub const VIDEO_H265: &str = "video/H265";

/// multipart 固定分隔符
pub const MULTIPART_BOUNDARY: &str = "BOUNDARY_FIXED_32934857949532587";

// ============================================================================
// 片段形状
// ============================================================================

/// 命名的标签子集，标签已排序去重
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    name: String,
    tags: Vec<Tag>,
}

impl Shape {
    pub fn new(name: impl Into<String>, tags: &[Tag]) -> Self {
        let mut tags = tags.to_vec();
        tags.sort_unstable();
        tags.dedup();
        Self {
            name: name.into(),
            tags,
        }
    }

    /// 合并多个标签列表
    pub fn union(name: impl Into<String>, lists: &[&[Tag]]) -> Self {
        let all: Vec<Tag> = lists.iter().flat_map(|l| l.iter().copied()).collect();
        Self::new(name, &all)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// 提取本形状的字段
    pub fn select(&self, dataset: &Dataset) -> Dataset {
        dataset.select(&self.tags)
    }

    /// 原地删除本形状的字段
    pub fn remove(&self, dataset: &mut Dataset) {
        dataset.remove_all(&self.tags);
    }

    /// 写入片段类型标记
    pub fn stamp_type(&self, dataset: &mut Dataset) {
        set_fragment_type(dataset, &self.name);
    }
}

const PATIENT_TAGS: &[Tag] = &[
    tags::SPECIFIC_CHARACTER_SET,
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::OTHER_PATIENT_IDS,
    tags::ISSUER_OF_PATIENT_ID,
    tags::PATIENT_AGE,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_SEX,
];

const STUDY_TAGS: &[Tag] = &[
    tags::SPECIFIC_CHARACTER_SET,
    tags::STUDY_INSTANCE_UID,
    tags::STUDY_ID,
    tags::STUDY_DATE,
    tags::STUDY_DESCRIPTION,
    tags::ACCESSION_NUMBER,
    tags::STUDY_TIME,
    tags::STUDY_COMMENTS,
];

const SERIES_TAGS: &[Tag] = &[
    tags::SPECIFIC_CHARACTER_SET,
    tags::STUDY_INSTANCE_UID,
    tags::SERIES_INSTANCE_UID,
    tags::SERIES_DESCRIPTION,
    tags::SERIES_DATE,
    tags::SERIES_TIME,
    tags::SERIES_DESCRIPTION_CODE_SEQUENCE,
    tags::SERIES_NUMBER,
    tags::SERIES_TYPE,
    tags::MODALITY,
];

const IMAGE_TAGS: &[Tag] = &[
    tags::ROWS,
    tags::COLUMNS,
    tags::SAMPLES_PER_PIXEL,
    tags::BITS_STORED,
    tags::BITS_ALLOCATED,
    tags::HIGH_BIT,
    tags::PIXEL_REPRESENTATION,
    tags::LOSSY_IMAGE_COMPRESSION,
    tags::AVAILABLE_TRANSFER_SYNTAX_UID,
    tags::PHOTOMETRIC_INTERPRETATION,
    tags::PLANAR_CONFIGURATION,
    tags::MODALITY_LUT_SEQUENCE,
    tags::VOI_LUT_SEQUENCE,
    tags::VOI_LUT_FUNCTION,
    tags::VOI_TYPE,
    tags::WINDOW_CENTER,
    tags::WINDOW_WIDTH,
    tags::WINDOW_CENTER_WIDTH_EXPLANATION,
    tags::RESCALE_INTERCEPT,
    tags::RESCALE_SLOPE,
    tags::RESCALE_TYPE,
    tags::IMAGE_TYPE,
];

const REFERENCE_TAGS: &[Tag] = &[
    tags::MANUFACTURER,
    tags::MANUFACTURER_MODEL_NAME,
    tags::INSTITUTION_NAME,
    tags::INSTITUTION_ADDRESS,
    tags::INSTITUTIONAL_DEPARTMENT_NAME,
    tags::STATION_NAME,
    tags::DEVICE_SERIAL_NUMBER,
    tags::SOFTWARE_VERSIONS,
];

const INSTANCE_QUERY_TAGS: &[Tag] = &[
    tags::STUDY_INSTANCE_UID,
    tags::SERIES_INSTANCE_UID,
    tags::SOP_INSTANCE_UID,
    tags::SOP_CLASS_UID,
    tags::AVAILABLE_TRANSFER_SYNTAX_UID,
    tags::INSTANCE_NUMBER,
    tags::NUMBER_OF_FRAMES,
    tags::INSTANCE_AVAILABILITY,
    tags::ROWS,
    tags::COLUMNS,
    tags::INSTANCE_CREATION_DATE,
    tags::CONTENT_DATE,
    tags::CONTENT_TIME,
];

// ============================================================================
// 标签配置
// ============================================================================

/// 不可变的标签配置
#[derive(Debug, Clone)]
pub struct TagProfile {
    pub patient: Shape,
    pub study: Shape,
    pub series: Shape,
    pub image: Shape,
    pub reference: Shape,
    pub instance_query: Shape,
    pub study_query: Shape,
    content_types: BTreeMap<&'static str, &'static str>,
    extensions: BTreeMap<&'static str, &'static str>,
}

impl Default for TagProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl TagProfile {
    pub fn standard() -> Self {
        let content_types = BTreeMap::from([
            (transfer::IMPLICIT_VR_LE, OCTET_STREAM),
            (transfer::EXPLICIT_VR_LE, OCTET_STREAM),
            (transfer::JPEG_BASELINE, IMAGE_JPEG),
            (transfer::JPEG_EXTENDED, IMAGE_JPEG),
            (transfer::JPEG_LOSSLESS, IMAGE_JPEG),
            (transfer::JPEG_LOSSLESS_SV1, IMAGE_JPEG_LOSSLESS),
            (transfer::JPEG_LS_LOSSLESS, IMAGE_JPEG_LS),
            (transfer::JPEG_LS_NEAR_LOSSLESS, IMAGE_JPEG_LS),
            (transfer::JPEG_2000_LOSSLESS, IMAGE_JP2),
            (transfer::JPEG_2000, IMAGE_JP2),
            (transfer::RLE_LOSSLESS, IMAGE_RLE),
            (transfer::MPEG2_MAIN, VIDEO_MPEG2),
            (transfer::MPEG2_HIGH, VIDEO_MPEG2),
            (transfer::MPEG4_HP41, VIDEO_H264),
            (transfer::MPEG4_HP41_BD, VIDEO_H264),
            (transfer::HEVC_MAIN, VIDEO_H265),
            (transfer::HEVC_MAIN10, VIDEO_H265),
        ]);
        let extensions = BTreeMap::from([
            (IMAGE_JPEG, "jpg"),
            (VIDEO_H264, "mp4"),
            (VIDEO_MPEG2, "mpeg"),
        ]);

        Self {
            patient: Shape::new("patient", PATIENT_TAGS),
            study: Shape::new("study", STUDY_TAGS),
            series: Shape::new("series", SERIES_TAGS),
            image: Shape::new("image", IMAGE_TAGS),
            reference: Shape::new("reference", REFERENCE_TAGS),
            instance_query: Shape::new("instanceQuery", INSTANCE_QUERY_TAGS),
            study_query: Shape::union("studyQuery", &[PATIENT_TAGS, STUDY_TAGS]),
            content_types,
            extensions,
        }
    }

    /// 去重时依次提取的形状
    pub fn dedup_shapes(&self) -> [&Shape; 5] {
        [
            &self.patient,
            &self.study,
            &self.series,
            &self.image,
            &self.reference,
        ]
    }

    /// 传输语法对应的内容类型，未知的返回 octet-stream
    pub fn content_type(&self, tsuid: &str) -> &'static str {
        self.content_types
            .get(tsuid)
            .copied()
            .unwrap_or(OCTET_STREAM)
    }

    /// 内容类型对应的单文件扩展名
    pub fn extension(&self, content_type: &str) -> Option<&'static str> {
        let base = content_type.split(';').next().unwrap_or(content_type);
        self.extensions.get(base).copied()
    }

    pub fn boundary(&self) -> &'static str {
        MULTIPART_BOUNDARY
    }
}

// ============================================================================
// 去重记账标签
// ============================================================================

/// 片段类型标记
pub fn fragment_type(dataset: &Dataset) -> Option<&str> {
    let block = dedup_block(dataset)?;
    dataset.string(dedup_tag(block, tags::DEDUP_TYPE_OFFSET))
}

pub fn set_fragment_type(dataset: &mut Dataset, name: &str) {
    let block = stamp_creator(dataset);
    dataset.set_string(dedup_tag(block, tags::DEDUP_TYPE_OFFSET), Vr::CS, name);
}

/// 引用的片段哈希
pub fn refs(dataset: &Dataset) -> Vec<String> {
    dedup_block(dataset)
        .and_then(|block| dataset.strings(dedup_tag(block, tags::DEDUP_REFS_OFFSET)))
        .map(|r| r.iter().filter(|s| !s.is_empty()).cloned().collect())
        .unwrap_or_default()
}

/// 设置引用列表，排序去重
pub fn set_refs<I, S>(dataset: &mut Dataset, refs: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut list: Vec<String> = refs.into_iter().map(Into::into).collect();
    list.sort();
    list.dedup();
    let block = stamp_creator(dataset);
    dataset.put(
        dedup_tag(block, tags::DEDUP_REFS_OFFSET),
        Vr::CS,
        Value::Strings(list),
    );
}

/// 追加一个引用，保持排序去重
pub fn add_ref(dataset: &mut Dataset, hash: &str) {
    let mut list = refs(dataset);
    list.push(hash.to_string());
    set_refs(dataset, list);
}

/// 删除 `dedupped` 私有块，同组其他创建者的私有标签保留
pub fn strip_bookkeeping(dataset: &mut Dataset) {
    while let Some(block) = dedup_block(dataset) {
        dataset.retain(|tag, _| !tags::in_private_block(tag, tags::DEDUP_GROUP, block));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wado_core::tags::*;

    #[test]
    fn test_shape_tags_sorted_and_deduplicated() {
        let shape = Shape::new("x", &[ROWS, PATIENT_ID, ROWS, MODALITY]);
        assert_eq!(shape.tags(), &[MODALITY, PATIENT_ID, ROWS]);

        let profile = TagProfile::standard();
        assert!(profile.study_query.tags().contains(&PATIENT_NAME));
        assert!(profile.study_query.tags().contains(&STUDY_DATE));
        let count = profile
            .study_query
            .tags()
            .iter()
            .filter(|t| **t == SPECIFIC_CHARACTER_SET)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_select_and_remove() {
        let mut ds = Dataset::new();
        ds.set_string(PATIENT_ID, Vr::LO, "P1");
        ds.set_string(MODALITY, Vr::CS, "CT");
        let profile = TagProfile::standard();

        let patient = profile.patient.select(&ds);
        assert_eq!(patient.len(), 1);
        profile.patient.remove(&mut ds);
        assert!(!ds.contains(PATIENT_ID));
        assert!(ds.contains(MODALITY));
    }

    #[test]
    fn test_content_types() {
        let profile = TagProfile::standard();
        assert_eq!(profile.content_type(transfer::IMPLICIT_VR_LE), OCTET_STREAM);
        assert_eq!(profile.content_type(transfer::JPEG_BASELINE), IMAGE_JPEG);
        assert_eq!(profile.content_type(transfer::JPEG_LS_LOSSLESS), IMAGE_JPEG_LS);
        assert_eq!(profile.content_type(transfer::JPEG_2000), IMAGE_JP2);
        assert_eq!(profile.content_type(transfer::MPEG4_HP41), VIDEO_H264);
        assert_eq!(profile.content_type("1.2.3.4"), OCTET_STREAM);
        assert_eq!(
            profile.extension("image/jpeg;transfer-syntax=1.2.840.10008.1.2.4.50"),
            Some("jpg")
        );
        assert_eq!(profile.extension(IMAGE_JP2), None);
    }

    #[test]
    fn test_refs_sorted_and_deduplicated() {
        let mut ds = Dataset::new();
        add_ref(&mut ds, "b");
        add_ref(&mut ds, "a");
        add_ref(&mut ds, "b");
        assert_eq!(refs(&ds), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ds.string(DEDUP_CREATOR_TAG), Some(DEDUP_CREATOR));

        set_fragment_type(&mut ds, INSTANCE_TYPE);
        assert_eq!(fragment_type(&ds), Some(INSTANCE_TYPE));

        strip_bookkeeping(&mut ds);
        assert!(ds.is_empty());
    }

    #[test]
    fn test_strip_keeps_other_creators() {
        let mut ds = Dataset::new();
        ds.set_string(0x0009_0010, Vr::LO, "GEMS_IDEN_01");
        ds.set_string(0x0009_1001, Vr::LO, "GE_GENESIS_FF");
        add_ref(&mut ds, "a");
        set_fragment_type(&mut ds, INSTANCE_TYPE);
        assert_eq!(ds.string(0x0009_0011), Some(DEDUP_CREATOR));
        assert_eq!(refs(&ds), vec!["a".to_string()]);

        strip_bookkeeping(&mut ds);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.string(0x0009_0010), Some("GEMS_IDEN_01"));
        assert_eq!(ds.string(0x0009_1001), Some("GE_GENESIS_FF"));
        assert!(refs(&ds).is_empty());
    }
}
