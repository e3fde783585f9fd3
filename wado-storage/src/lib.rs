//! # wado-storage
//!
//! Static WADO 的去重元数据存储与 BulkData 寻址。
//!
//! ## 功能特性
//!
//! - **内容寻址去重**: 患者、研究、序列等标签分组按内容哈希只保存一次
//! - **残留实例**: 每个实例只保留不属于任何分组的标签和对片段的引用
//! - **BulkData 外置**: 大值和像素帧写到独立文件，数据集中只留字节范围引用
//! - **转码策略**: 按目标传输语法和重压缩列表决定是否重新编码像素帧
//! - **冷启动恢复**: 重开研究时从磁盘快照重建去重状态
//! - **原子写入**: 所有文件先写临时文件再改名，读取透明回退 `.gz`
//!
//! ## 架构
//!
//! ```text
//! IngestSession
//!   ├── BulkdataAddresser ── ImageConverter ── FrameEncoder / FrameDecoder
//!   ├── DeduplicationEngine ── TagProfile
//!   ├── StudyData（残留、片段、已知哈希）
//!   ├── MetadataAssembler（studies / series / metadata）
//!   └── StudyIndex（根目录 studies.gz）
//! ```
//!
//! ## 目录结构
//!
//! ```text
//! <root>/
//!   studies.gz
//!   studies/<study>/
//!     deduplicated.gz
//!     studies.gz  series.gz
//!     bulkdata/<xx>/<yy>/<hash>.json.gz | .raw.gz
//!     series/<series>/metadata.gz | instances.gz
//!     series/<series>/instances/<sop>/frames  rendered  thumbnail
//!   deduplicated/<study>/<hash>.gz
//!   instances/<study>/<hash>.gz
//! ```
//!
//! ## 主要组件
//!
//! - [`IngestSession`]: 导入入口，按研究切换并完成
//! - [`StudyData`]: 单个研究的去重状态
//! - [`BulkReader`]: 按引用读回 BulkData
//! - [`StudyIndex`]: 全部研究的查询索引

mod context;
mod error;
mod index;
mod layout;
mod reader;
mod session;
mod stats;

// ============================================================================
// 公共模块
// ============================================================================

pub mod core;
pub mod profile;
pub mod services;

// ============================================================================
// 核心 API
// ============================================================================

/// 导入会话 - 主要入口点
pub use session::{IngestOutcome, IngestSession};

/// 错误处理
pub use error::{Result, StorageError, UnsupportedKind};

// ============================================================================
// 存储上下文与布局
// ============================================================================

pub use context::StoreContext;
pub use layout::{StorageLayout, shard, validate_uid};
pub use profile::{Shape, TagProfile};
pub use stats::Stats;

// ============================================================================
// 读取与索引
// ============================================================================

pub use index::StudyIndex;
pub use reader::BulkReader;

// ============================================================================
// 服务
// ============================================================================

pub use services::{
    BulkdataAddresser, ConvertedFrame, DEFAULT_RECOMPRESS, DeduplicationEngine, ImageConverter,
    MetadataAssembler, NativeFrameDecoder, STUDY_SNAPSHOT_NAME, SnapshotTarget, StudyData,
};

// ============================================================================
// Prelude - 便捷导入
// ============================================================================

/// 预加载模块，包含最常用的类型
///
/// 使用方式:
/// ```rust
/// use wado_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Result, StorageError};
    pub use crate::{ImageConverter, IngestOutcome, IngestSession, StoreContext, TagProfile};
}
