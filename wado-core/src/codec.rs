//! 外部协作者接口
//!
//! 数据集解析器和图像编解码器都在存储引擎之外实现，
//! 这里只定义边界上的 trait 和数据结构。

use crate::dataset::Dataset;
use crate::error::Result;
use crate::tags;
use std::path::Path;

/// 解析结果
#[derive(Debug, Clone)]
pub struct ParsedDataset {
    pub dataset: Dataset,
    /// 数据集自身的传输语法
    pub transfer_syntax: String,
}

/// 数据集解析器
///
/// 输入不是本格式时必须返回 [`CoreError::NotDicom`](crate::CoreError::NotDicom)，
/// 批量扫描依赖它跳过外来文件。
pub trait DatasetParser: Send + Sync {
    /// 解析字节流，`origin` 为来源文件，用于解析相对 BulkData 路径
    fn parse(&self, bytes: &[u8], origin: Option<&Path>) -> Result<ParsedDataset>;

    /// 解析文件
    fn parse_file(&self, path: &Path) -> Result<ParsedDataset> {
        let bytes = std::fs::read(path)?;
        self.parse(&bytes, Some(path))
    }
}

/// 解码后的一帧像素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    /// 像素字节，小端，交错排列
    pub data: Vec<u8>,
}

impl Raster {
    /// 一帧的期望字节数
    pub fn expected_len(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.samples_per_pixel as usize
            * self.bits_allocated as usize
            / 8
    }
}

/// 编码参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeParams {
    /// 有损编码质量 (1-100)
    pub quality: u8,
    /// 最长边上限，用于缩略图
    pub max_dimension: Option<u32>,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            quality: 90,
            max_dimension: None,
        }
    }
}

impl EncodeParams {
    pub fn thumbnail() -> Self {
        Self {
            quality: 80,
            max_dimension: Some(128),
        }
    }
}

/// 像素几何
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelGeometry {
    pub rows: u32,
    pub columns: u32,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub frames: usize,
}

impl PixelGeometry {
    /// 从数据集读取，缺失的字段按 0 行 0 列、8 位、单通道、单帧处理
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let int = |tag, default: i64| dataset.int(tag).unwrap_or(default).max(0);
        Self {
            rows: int(tags::ROWS, 0) as u32,
            columns: int(tags::COLUMNS, 0) as u32,
            samples_per_pixel: int(tags::SAMPLES_PER_PIXEL, 1) as u16,
            bits_allocated: int(tags::BITS_ALLOCATED, 8) as u16,
            frames: int(tags::NUMBER_OF_FRAMES, 1).max(1) as usize,
        }
    }

    /// 单帧的位数
    pub fn frame_bits(&self) -> u64 {
        self.rows as u64
            * self.columns as u64
            * self.bits_allocated as u64
            * self.samples_per_pixel as u64
    }

    /// 用给定像素字节构造一帧
    pub fn raster(&self, data: Vec<u8>) -> Raster {
        Raster {
            width: self.columns,
            height: self.rows,
            samples_per_pixel: self.samples_per_pixel,
            bits_allocated: self.bits_allocated,
            data,
        }
    }
}

/// 帧解码器，绑定到单个数据集的像素数据
pub trait FrameDecoder {
    /// 帧数
    fn frame_count(&self) -> usize;

    /// 解码第 `index` 帧（从 0 开始）
    fn decode_frame(&mut self, index: usize) -> Result<Raster>;
}

/// 压缩像素数据的解码器工厂
///
/// 每个实例打开独立的解码器，并发会话之间不共享解码状态。
pub trait FrameDecoderFactory: Send + Sync {
    /// 是否能解码该传输语法
    fn supports(&self, transfer_syntax: &str) -> bool;

    /// 为一组封装片段打开解码器
    fn open(
        &self,
        transfer_syntax: &str,
        geometry: PixelGeometry,
        fragments: Vec<Vec<u8>>,
    ) -> Result<Box<dyn FrameDecoder>>;
}

/// 帧编码器
///
/// 编码器实例在进程内共享，调用方负责串行化访问。
pub trait FrameEncoder: Send {
    /// 输出的传输语法
    fn transfer_syntax(&self) -> &str;

    fn encode(&mut self, raster: &Raster, params: &EncodeParams) -> Result<Vec<u8>>;
}
