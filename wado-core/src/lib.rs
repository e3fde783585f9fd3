//! Static WADO 核心类型和模型
//!
//! 本 crate 提供各模块共享的核心数据结构，包括：
//! - 数据集树模型（标签、VR、值、深度优先遍历、规范编码）
//! - BulkData 引用及其字节范围 URI
//! - 实例标识与传输语法
//! - 数据集解析器和图像编解码器 trait
//! - DICOM JSON 编解码

pub mod bulk;
pub mod codec;
pub mod dataset;
pub mod error;
pub mod json;
pub mod sop;
pub mod tags;
pub mod transfer;
pub mod vr;

pub use bulk::{BulkReference, ByteRange};
pub use codec::{
    DatasetParser, EncodeParams, FrameDecoder, FrameDecoderFactory, FrameEncoder, ParsedDataset,
    PixelGeometry, Raster,
};
pub use dataset::{Dataset, Element, ItemPath, Value, Visit, Walker};
pub use error::{CoreError, Result};
pub use json::JsonDatasetParser;
pub use sop::SopId;
pub use tags::Tag;
pub use vr::Vr;
