//! DICOM 标签常量
//!
//! 只收录元数据拆分、查询汇总和像素处理需要的标签。
//! 标签值按 `(group << 16) | element` 编码。

/// 标签类型
pub type Tag = u32;

pub const SPECIFIC_CHARACTER_SET: Tag = 0x0008_0005;
pub const IMAGE_TYPE: Tag = 0x0008_0008;
pub const INSTANCE_CREATION_DATE: Tag = 0x0008_0012;
pub const SOP_CLASS_UID: Tag = 0x0008_0016;
pub const SOP_INSTANCE_UID: Tag = 0x0008_0018;
pub const STUDY_DATE: Tag = 0x0008_0020;
pub const SERIES_DATE: Tag = 0x0008_0021;
pub const CONTENT_DATE: Tag = 0x0008_0023;
pub const STUDY_TIME: Tag = 0x0008_0030;
pub const SERIES_TIME: Tag = 0x0008_0031;
pub const CONTENT_TIME: Tag = 0x0008_0033;
pub const ACCESSION_NUMBER: Tag = 0x0008_0050;
pub const INSTANCE_AVAILABILITY: Tag = 0x0008_0056;
pub const MODALITIES_IN_STUDY: Tag = 0x0008_0061;
pub const MODALITY: Tag = 0x0008_0060;
pub const MANUFACTURER: Tag = 0x0008_0070;
pub const INSTITUTION_NAME: Tag = 0x0008_0080;
pub const INSTITUTION_ADDRESS: Tag = 0x0008_0081;
pub const STATION_NAME: Tag = 0x0008_1010;
pub const STUDY_DESCRIPTION: Tag = 0x0008_1030;
pub const SERIES_DESCRIPTION_CODE_SEQUENCE: Tag = 0x0008_103F;
pub const SERIES_DESCRIPTION: Tag = 0x0008_103E;
pub const INSTITUTIONAL_DEPARTMENT_NAME: Tag = 0x0008_1040;
pub const MANUFACTURER_MODEL_NAME: Tag = 0x0008_1090;
pub const LOSSY_IMAGE_COMPRESSION: Tag = 0x0028_2110;

pub const PATIENT_NAME: Tag = 0x0010_0010;
pub const PATIENT_ID: Tag = 0x0010_0020;
pub const ISSUER_OF_PATIENT_ID: Tag = 0x0010_0021;
pub const PATIENT_BIRTH_DATE: Tag = 0x0010_0030;
pub const PATIENT_SEX: Tag = 0x0010_0040;
pub const OTHER_PATIENT_IDS: Tag = 0x0010_1000;
pub const PATIENT_AGE: Tag = 0x0010_1010;

pub const DEVICE_SERIAL_NUMBER: Tag = 0x0018_1000;
pub const SOFTWARE_VERSIONS: Tag = 0x0018_1020;

pub const STUDY_INSTANCE_UID: Tag = 0x0020_000D;
pub const SERIES_INSTANCE_UID: Tag = 0x0020_000E;
pub const STUDY_ID: Tag = 0x0020_0010;
pub const SERIES_NUMBER: Tag = 0x0020_0011;
pub const INSTANCE_NUMBER: Tag = 0x0020_0013;
pub const NUMBER_OF_STUDY_RELATED_SERIES: Tag = 0x0020_1206;
pub const NUMBER_OF_STUDY_RELATED_INSTANCES: Tag = 0x0020_1208;
pub const NUMBER_OF_SERIES_RELATED_INSTANCES: Tag = 0x0020_1209;

pub const SAMPLES_PER_PIXEL: Tag = 0x0028_0002;
pub const PHOTOMETRIC_INTERPRETATION: Tag = 0x0028_0004;
pub const PLANAR_CONFIGURATION: Tag = 0x0028_0006;
pub const NUMBER_OF_FRAMES: Tag = 0x0028_0008;
pub const ROWS: Tag = 0x0028_0010;
pub const COLUMNS: Tag = 0x0028_0011;
pub const BITS_ALLOCATED: Tag = 0x0028_0100;
pub const BITS_STORED: Tag = 0x0028_0101;
pub const HIGH_BIT: Tag = 0x0028_0102;
pub const PIXEL_REPRESENTATION: Tag = 0x0028_0103;
pub const WINDOW_CENTER: Tag = 0x0028_1050;
pub const WINDOW_WIDTH: Tag = 0x0028_1051;
pub const RESCALE_INTERCEPT: Tag = 0x0028_1052;
pub const RESCALE_SLOPE: Tag = 0x0028_1053;
pub const RESCALE_TYPE: Tag = 0x0028_1054;
pub const WINDOW_CENTER_WIDTH_EXPLANATION: Tag = 0x0028_1055;
pub const VOI_LUT_FUNCTION: Tag = 0x0028_1056;
pub const MODALITY_LUT_SEQUENCE: Tag = 0x0028_3000;
pub const VOI_LUT_SEQUENCE: Tag = 0x0028_3010;
pub const VOI_TYPE: Tag = 0x0028_3011;

pub const STUDY_COMMENTS: Tag = 0x0032_4000;
pub const SERIES_TYPE: Tag = 0x0054_1000;

pub const AVAILABLE_TRANSFER_SYNTAX_UID: Tag = 0x0008_3002;
pub const TRANSFER_SYNTAX_UID: Tag = 0x0002_0010;

pub const PIXEL_DATA: Tag = 0x7FE0_0010;

/// 序列条目分隔标签
pub const ITEM: Tag = 0xFFFE_E000;
pub const ITEM_DELIMITATION: Tag = 0xFFFE_E00D;
pub const SEQUENCE_DELIMITATION: Tag = 0xFFFE_E0DD;

// ============================================================================
// 去重私有标签块
// ============================================================================

/// 私有创建者名称
pub const DEDUP_CREATOR: &str = "dedupped";
/// 去重记账标签所在的私有组
pub const DEDUP_GROUP: u16 = 0x0009;
/// 首选的私有块，(0009,0010) 未被其他创建者占用时使用
pub const DEDUP_BLOCK: u8 = 0x10;
/// 块内偏移：引用的片段哈希列表
pub const DEDUP_REFS_OFFSET: u8 = 0x10;
/// 块内偏移：本数据集的内容哈希
pub const DEDUP_HASH_OFFSET: u8 = 0x11;
/// 块内偏移：片段类型标记
pub const DEDUP_TYPE_OFFSET: u8 = 0x12;

/// 首选块下的创建者声明 (0009,0010)
pub const DEDUP_CREATOR_TAG: Tag = 0x0009_0010;
/// 首选块下的引用列表 (0009,1010)
pub const DEDUP_REFS: Tag = 0x0009_1010;
/// 首选块下的内容哈希 (0009,1011)
pub const DEDUP_HASH: Tag = 0x0009_1011;
/// 首选块下的类型标记 (0009,1012)
pub const DEDUP_TYPE: Tag = 0x0009_1012;

/// 私有创建者声明元素 (gggg,00bb)
pub fn private_creator_tag(group: u16, block: u8) -> Tag {
    ((group as Tag) << 16) | block as Tag
}

/// 私有块中的数据元素 (gggg,bbxx)
pub fn private_tag(group: u16, block: u8, offset: u8) -> Tag {
    ((group as Tag) << 16) | ((block as Tag) << 8) | offset as Tag
}

/// 标签是否属于指定私有块（含其创建者声明）
pub fn in_private_block(tag: Tag, group: u16, block: u8) -> bool {
    if self::group(tag) != group {
        return false;
    }
    let element = element(tag);
    element == block as u16 || element >> 8 == block as u16
}

/// 获取标签的组号
pub fn group(tag: Tag) -> u16 {
    (tag >> 16) as u16
}

/// 获取标签的元素号
pub fn element(tag: Tag) -> u16 {
    (tag & 0xFFFF) as u16
}

/// 标签的 DICOM JSON 键（8 位大写十六进制）
pub fn to_key(tag: Tag) -> String {
    format!("{:08X}", tag)
}

/// 解析 DICOM JSON 键
pub fn from_key(key: &str) -> Option<Tag> {
    if key.len() != 8 {
        return None;
    }
    Tag::from_str_radix(key, 16).ok()
}
