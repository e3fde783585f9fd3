//! 图像转换
//!
//! 决定每一帧是保留原始编码还是解码后重新编码，并生成缩略图。
//! 编码器实例进程内共享，每个实例一把锁；解码器按实例打开，互不共享。

use crate::core::files::FileStore;
use crate::error::{Result, StorageError, UnsupportedKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;
use wado_core::{
    ByteRange, EncodeParams, FrameDecoder, FrameDecoderFactory, FrameEncoder, PixelGeometry,
    Raster, transfer,
};

/// 默认重压缩的源编码简称
pub const DEFAULT_RECOMPRESS: &str = "lei,j2k";

type SharedEncoder = Arc<Mutex<Box<dyn FrameEncoder>>>;

/// 转换后的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedFrame {
    pub data: Vec<u8>,
    /// 帧数据的传输语法
    pub transfer_syntax: String,
    /// 是否以 gzip 存储（未压缩像素）
    pub gzip: bool,
}

/// 图像转换器
pub struct ImageConverter {
    destination: String,
    recompress: Vec<String>,
    encoders: HashMap<String, SharedEncoder>,
    decoders: Vec<Arc<dyn FrameDecoderFactory>>,
    thumbnails: bool,
}

impl std::fmt::Debug for ImageConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageConverter")
            .field("destination", &self.destination)
            .field("recompress", &self.recompress)
            .field("encoders", &self.encoders.keys().collect::<Vec<_>>())
            .field("decoders", &self.decoders.len())
            .field("thumbnails", &self.thumbnails)
            .finish()
    }
}

impl ImageConverter {
    /// 创建转换器，`recompress` 为逗号分隔的源编码简称
    pub fn new(destination: impl Into<String>, recompress: &str) -> Self {
        Self {
            destination: destination.into(),
            recompress: parse_recompress(recompress),
            encoders: HashMap::new(),
            decoders: Vec::new(),
            thumbnails: true,
        }
    }

    /// 保留原始编码、不生成缩略图的转换器
    pub fn passthrough() -> Self {
        Self::new(transfer::IMPLICIT_VR_LE, "").with_thumbnails(false)
    }

    pub fn with_encoder(mut self, encoder: Box<dyn FrameEncoder>) -> Self {
        let tsuid = encoder.transfer_syntax().to_string();
        self.encoders.insert(tsuid, Arc::new(Mutex::new(encoder)));
        self
    }

    pub fn with_decoder(mut self, factory: Arc<dyn FrameDecoderFactory>) -> Self {
        self.decoders.push(factory);
        self
    }

    pub fn with_thumbnails(mut self, thumbnails: bool) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// 检查目标编码可用：未压缩，或已注册对应编码器
    pub fn validate(&self) -> Result<()> {
        if transfer::is_uncompressed(&self.destination)
            || self.encoders.contains_key(&self.destination)
        {
            return Ok(());
        }
        Err(StorageError::UnsupportedEncoding(self.destination.clone()))
    }

    /// 是否能生成缩略图
    pub fn thumbnails_enabled(&self) -> bool {
        self.thumbnails && self.encoders.contains_key(transfer::JPEG_BASELINE)
    }

    /// 源编码是否需要解码
    ///
    /// 非规则分片（片段数与帧数不一致）总是需要解码。
    pub fn wants_conversion(&self, source: &str, fragmented: bool) -> bool {
        if fragmented {
            return true;
        }
        if source == self.destination
            || (transfer::is_uncompressed(source) && transfer::is_uncompressed(&self.destination))
        {
            return false;
        }
        let simple = transfer::simple_name(source).unwrap_or("lei");
        self.recompress.iter().any(|r| r == simple)
    }

    /// 为封装像素数据打开解码器，没有可用解码器时返回 None
    pub fn open_decoder(
        &self,
        source: &str,
        geometry: PixelGeometry,
        fragments: Vec<Vec<u8>>,
    ) -> Result<Option<Box<dyn FrameDecoder>>> {
        let Some(factory) = self.decoders.iter().find(|f| f.supports(source)) else {
            return Ok(None);
        };
        Ok(Some(factory.open(source, geometry, fragments)?))
    }

    /// 转换一帧
    ///
    /// `original` 为帧的原始编码数据；不需要转换时原样返回。
    pub fn convert_frame(
        &self,
        source: &str,
        fragmented: bool,
        decoder: Option<&mut dyn FrameDecoder>,
        index: usize,
        original: Vec<u8>,
    ) -> Result<ConvertedFrame> {
        let keep = |data: Vec<u8>| ConvertedFrame {
            data,
            transfer_syntax: source.to_string(),
            gzip: transfer::is_uncompressed(source),
        };
        if !self.wants_conversion(source, fragmented) {
            return Ok(keep(original));
        }
        let Some(decoder) = decoder else {
            if fragmented {
                return Err(StorageError::Unsupported(
                    UnsupportedKind::FragmentedWithoutDecoder,
                ));
            }
            debug!("没有 {} 的解码器，保留原始编码", source);
            return Ok(keep(original));
        };

        let raster = decoder.decode_frame(index)?;
        if transfer::is_uncompressed(&self.destination) {
            return Ok(ConvertedFrame {
                data: raster.data,
                transfer_syntax: transfer::IMPLICIT_VR_LE.to_string(),
                gzip: true,
            });
        }
        let data = self.encode(&self.destination, &raster, &EncodeParams::default())?;
        debug!(
            "帧 {} 从 {} 转换为 {}，长度 {}",
            index,
            source,
            self.destination,
            data.len()
        );
        Ok(ConvertedFrame {
            data,
            transfer_syntax: self.destination.clone(),
            gzip: false,
        })
    }

    /// 生成 JPEG 缩略图，未启用时返回 None
    pub fn thumbnail(&self, decoder: &mut dyn FrameDecoder, index: usize) -> Result<Option<Vec<u8>>> {
        if !self.thumbnails_enabled() {
            return Ok(None);
        }
        let raster = decoder.decode_frame(index)?;
        self.encode(transfer::JPEG_BASELINE, &raster, &EncodeParams::thumbnail())
            .map(Some)
    }

    fn encode(&self, tsuid: &str, raster: &Raster, params: &EncodeParams) -> Result<Vec<u8>> {
        let encoder = self
            .encoders
            .get(tsuid)
            .ok_or_else(|| StorageError::UnsupportedEncoding(tsuid.to_string()))?;
        let mut encoder = encoder.lock().unwrap_or_else(|e| e.into_inner());
        Ok(encoder.encode(raster, params)?)
    }
}

fn parse_recompress(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// 未压缩像素解码
// ============================================================================

/// 未压缩像素的解码器，按需从源文件读取帧
pub struct NativeFrameDecoder {
    files: FileStore,
    source: PathBuf,
    frames: Vec<ByteRange>,
    geometry: PixelGeometry,
}

impl NativeFrameDecoder {
    pub fn new(source: impl Into<PathBuf>, frames: Vec<ByteRange>, geometry: PixelGeometry) -> Self {
        Self {
            files: FileStore::new(),
            source: source.into(),
            frames,
            geometry,
        }
    }
}

impl FrameDecoder for NativeFrameDecoder {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn decode_frame(&mut self, index: usize) -> wado_core::Result<Raster> {
        let range = self.frames.get(index).copied().ok_or_else(|| {
            wado_core::CoreError::Codec(format!(
                "帧序号越界: {} / {}",
                index,
                self.frames.len()
            ))
        })?;
        let data = self
            .files
            .read_range(&self.source, range.offset, Some(range.length))
            .map_err(|e| wado_core::CoreError::Codec(e.to_string()))?;
        Ok(self.geometry.raster(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeEncoder {
        tsuid: &'static str,
        calls: usize,
    }

    impl FrameEncoder for FakeEncoder {
        fn transfer_syntax(&self) -> &str {
            self.tsuid
        }

        fn encode(&mut self, raster: &Raster, params: &EncodeParams) -> wado_core::Result<Vec<u8>> {
            self.calls += 1;
            let mut out = vec![0xFF, 0xD8, params.quality];
            out.extend_from_slice(&raster.data[..raster.data.len().min(2)]);
            Ok(out)
        }
    }

    fn geometry() -> PixelGeometry {
        PixelGeometry {
            rows: 2,
            columns: 2,
            samples_per_pixel: 1,
            bits_allocated: 8,
            frames: 2,
        }
    }

    #[test]
    fn test_validate_destination() {
        assert!(ImageConverter::new(transfer::IMPLICIT_VR_LE, "lei").validate().is_ok());
        let err = ImageConverter::new(transfer::JPEG_LS_LOSSLESS, "lei")
            .validate()
            .unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedEncoding(_)));

        let converter = ImageConverter::new(transfer::JPEG_BASELINE, "lei").with_encoder(Box::new(
            FakeEncoder {
                tsuid: transfer::JPEG_BASELINE,
                calls: 0,
            },
        ));
        assert!(converter.validate().is_ok());
        assert!(converter.thumbnails_enabled());
    }

    #[test]
    fn test_wants_conversion() {
        let converter = ImageConverter::new(transfer::IMPLICIT_VR_LE, DEFAULT_RECOMPRESS);
        assert!(!converter.wants_conversion(transfer::EXPLICIT_VR_LE, false));
        assert!(converter.wants_conversion(transfer::JPEG_2000, false));
        assert!(!converter.wants_conversion(transfer::JPEG_BASELINE, false));
        assert!(converter.wants_conversion(transfer::JPEG_BASELINE, true));
    }

    #[test]
    fn test_native_decode_and_encode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pixels");
        std::fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut decoder = NativeFrameDecoder::new(
            &path,
            vec![ByteRange::new(0, 4), ByteRange::new(4, 4)],
            geometry(),
        );

        let converter = ImageConverter::new(transfer::JPEG_BASELINE, "lei").with_encoder(Box::new(
            FakeEncoder {
                tsuid: transfer::JPEG_BASELINE,
                calls: 0,
            },
        ));
        let frame = converter
            .convert_frame(
                transfer::IMPLICIT_VR_LE,
                false,
                Some(&mut decoder),
                1,
                vec![5, 6, 7, 8],
            )
            .unwrap();
        assert_eq!(frame.transfer_syntax, transfer::JPEG_BASELINE);
        assert_eq!(frame.data, vec![0xFF, 0xD8, 90, 5, 6]);
        assert!(!frame.gzip);

        let thumb = converter.thumbnail(&mut decoder, 0).unwrap().unwrap();
        assert_eq!(thumb, vec![0xFF, 0xD8, 80, 1, 2]);
        assert!(decoder.decode_frame(2).is_err());
    }

    #[test]
    fn test_fragmented_without_decoder_is_unsupported() {
        let converter = ImageConverter::passthrough();
        let err = converter
            .convert_frame(transfer::JPEG_BASELINE, true, None, 0, vec![1])
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Unsupported(UnsupportedKind::FragmentedWithoutDecoder)
        ));

        let kept = converter
            .convert_frame(transfer::EXPLICIT_VR_LE, false, None, 0, vec![1, 2])
            .unwrap();
        assert_eq!(kept.data, vec![1, 2]);
        assert!(kept.gzip);
    }
}
