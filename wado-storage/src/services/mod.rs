//! 研究级服务
//!
//! 本模块包含导入流水线的各个阶段：
//! - study: 单个研究的去重状态、快照写出与冷启动恢复
//! - dedup: 按标签分组抽取公共片段
//! - assembler: 由残留与片段重建完整元数据和查询结果
//! - bulkdata: BulkData 与像素帧的外置和寻址
//! - image: 传输语法转码策略、缩略图与原生帧解码

pub mod assembler;
pub mod bulkdata;
pub mod dedup;
pub mod image;
pub mod study;

pub use assembler::MetadataAssembler;
pub use bulkdata::BulkdataAddresser;
pub use dedup::DeduplicationEngine;
pub use image::{ConvertedFrame, DEFAULT_RECOMPRESS, ImageConverter, NativeFrameDecoder};
pub use study::{STUDY_SNAPSHOT_NAME, SnapshotTarget, StudyData};
