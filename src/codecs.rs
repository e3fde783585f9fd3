//! 基于 `image` crate 的 JPEG 编解码器
//!
//! 编码器输出 JPEG 基线（8 位），16 位像素先按最小值和最大值线性拉伸到 8 位。
//! 解码器只处理 JPEG 基线，每帧一个片段；片段数与帧数不一致时按 EOI/SOI 标记重新切分。

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, GrayImage, RgbImage};
use tracing::debug;
use wado_core::{
    CoreError, EncodeParams, FrameDecoder, FrameDecoderFactory, FrameEncoder, PixelGeometry,
    Raster, transfer,
};

// ============================================================================
// 编码
// ============================================================================

/// JPEG 基线编码器
#[derive(Debug, Default)]
pub struct JpegFrameEncoder;

impl JpegFrameEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn transfer_syntax(&self) -> &str {
        transfer::JPEG_BASELINE
    }

    fn encode(&mut self, raster: &Raster, params: &EncodeParams) -> wado_core::Result<Vec<u8>> {
        let image = to_image(raster)?;
        let image = match params.max_dimension {
            Some(max) if raster.width > max || raster.height > max => image.thumbnail(max, max),
            _ => image,
        };

        let mut out = Vec::new();
        {
            let mut encoder =
                JpegEncoder::new_with_quality(&mut out, params.quality.clamp(1, 100));
            match &image {
                DynamicImage::ImageLuma8(gray) => {
                    encoder.encode(gray.as_raw(), gray.width(), gray.height(), ColorType::L8)
                }
                other => {
                    let rgb = other.to_rgb8();
                    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
                }
            }
            .map_err(|e| CoreError::Codec(format!("JPEG 编码失败: {}", e)))?;
        }
        Ok(out)
    }
}

/// 帧 → 8 位图像
fn to_image(raster: &Raster) -> wado_core::Result<DynamicImage> {
    if raster.data.len() < raster.expected_len() {
        return Err(CoreError::Codec(format!(
            "像素长度 {} 小于期望的 {}",
            raster.data.len(),
            raster.expected_len()
        )));
    }
    let samples = match raster.bits_allocated {
        8 => raster.data[..raster.expected_len()].to_vec(),
        16 => normalize_16(&raster.data[..raster.expected_len()]),
        bits => return Err(CoreError::Codec(format!("不支持的位深: {}", bits))),
    };

    let image = match raster.samples_per_pixel {
        1 => GrayImage::from_raw(raster.width, raster.height, samples).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(raster.width, raster.height, samples).map(DynamicImage::ImageRgb8),
        spp => return Err(CoreError::Codec(format!("不支持的通道数: {}", spp))),
    };
    image.ok_or_else(|| CoreError::Codec("像素缓冲区尺寸不匹配".to_string()))
}

/// 16 位小端样本线性拉伸到 8 位
fn normalize_16(data: &[u8]) -> Vec<u8> {
    let values: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let min = values.iter().copied().min().unwrap_or(0) as u32;
    let max = values.iter().copied().max().unwrap_or(0) as u32;
    let range = (max - min).max(1);
    values
        .iter()
        .map(|&v| ((v as u32 - min) * 255 / range) as u8)
        .collect()
}

// ============================================================================
// 解码
// ============================================================================

/// JPEG 基线解码器工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegFrameDecoderFactory;

impl FrameDecoderFactory for JpegFrameDecoderFactory {
    fn supports(&self, transfer_syntax: &str) -> bool {
        transfer_syntax == transfer::JPEG_BASELINE
    }

    fn open(
        &self,
        _transfer_syntax: &str,
        geometry: PixelGeometry,
        fragments: Vec<Vec<u8>>,
    ) -> wado_core::Result<Box<dyn FrameDecoder>> {
        let frames = split_frames(fragments, geometry.frames);
        debug!("打开 JPEG 解码器: {} 帧", frames.len());
        Ok(Box::new(JpegFrameDecoder { geometry, frames }))
    }
}

struct JpegFrameDecoder {
    geometry: PixelGeometry,
    frames: Vec<Vec<u8>>,
}

impl FrameDecoder for JpegFrameDecoder {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn decode_frame(&mut self, index: usize) -> wado_core::Result<Raster> {
        let bytes = self
            .frames
            .get(index)
            .ok_or_else(|| CoreError::Codec(format!("帧 {} 超出范围", index + 1)))?;
        let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
            .map_err(|e| CoreError::Codec(format!("JPEG 解码失败: {}", e)))?;
        let (samples_per_pixel, data, width, height) = if self.geometry.samples_per_pixel == 3 {
            let rgb = image.to_rgb8();
            (3, rgb.as_raw().clone(), rgb.width(), rgb.height())
        } else {
            let gray = image.to_luma8();
            (1, gray.as_raw().clone(), gray.width(), gray.height())
        };
        Ok(Raster {
            width,
            height,
            samples_per_pixel,
            bits_allocated: 8,
            data,
        })
    }
}

/// 把片段整理成每帧一个完整 JPEG 码流
fn split_frames(fragments: Vec<Vec<u8>>, frames: usize) -> Vec<Vec<u8>> {
    if transfer::fragments_are_frames(transfer::JPEG_BASELINE, &fragments, frames) {
        return fragments;
    }
    let joined = fragments.concat();
    if frames <= 1 {
        return vec![joined];
    }
    let mut out = Vec::with_capacity(frames);
    let mut start = 0;
    let mut i = 0;
    while i + 3 < joined.len() {
        if joined[i..i + 4] == [0xFF, 0xD9, 0xFF, 0xD8] {
            out.push(joined[start..i + 2].to_vec());
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    out.push(joined[start..].to_vec());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Raster {
        Raster {
            width,
            height,
            samples_per_pixel: 1,
            bits_allocated: 8,
            data: (0..width * height).map(|i| (i % 256) as u8).collect(),
        }
    }

    #[test]
    fn test_encode_then_decode_gray() {
        let mut encoder = JpegFrameEncoder::new();
        let jpeg = encoder
            .encode(&gradient(16, 8), &EncodeParams::default())
            .unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let geometry = PixelGeometry {
            rows: 8,
            columns: 16,
            samples_per_pixel: 1,
            bits_allocated: 8,
            frames: 1,
        };
        let mut decoder = JpegFrameDecoderFactory
            .open(transfer::JPEG_BASELINE, geometry, vec![jpeg])
            .unwrap();
        assert_eq!(decoder.frame_count(), 1);
        let raster = decoder.decode_frame(0).unwrap();
        assert_eq!((raster.width, raster.height), (16, 8));
        assert_eq!(raster.data.len(), 128);
    }

    #[test]
    fn test_thumbnail_is_bounded() {
        let mut encoder = JpegFrameEncoder::new();
        let jpeg = encoder
            .encode(&gradient(512, 256), &EncodeParams::thumbnail())
            .unwrap();
        let image = image::load_from_memory(&jpeg).unwrap();
        assert!(image.width() <= 128 && image.height() <= 128);
    }

    #[test]
    fn test_sixteen_bit_normalized() {
        let data: Vec<u8> = [0u16, 1000, 2000, 4000]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(normalize_16(&data), vec![0, 63, 127, 255]);
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let raster = Raster {
            width: 2,
            height: 2,
            samples_per_pixel: 1,
            bits_allocated: 32,
            data: vec![0; 16],
        };
        assert!(matches!(
            JpegFrameEncoder::new().encode(&raster, &EncodeParams::default()),
            Err(CoreError::Codec(_))
        ));
    }

    #[test]
    fn test_split_frames_on_markers() {
        let a = vec![0xFF, 0xD8, 1, 2, 0xFF, 0xD9];
        let b = vec![0xFF, 0xD8, 3, 0xFF, 0xD9];
        let fragments = vec![a[..3].to_vec(), [&a[3..], &b[..]].concat()];
        let frames = split_frames(fragments, 2);
        assert_eq!(frames, vec![a.clone(), b.clone()]);

        // 一帧一片时原样返回
        let frames = split_frames(vec![a.clone(), b.clone()], 2);
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn test_only_baseline_supported() {
        assert!(JpegFrameDecoderFactory.supports(transfer::JPEG_BASELINE));
        assert!(!JpegFrameDecoderFactory.supports(transfer::JPEG_2000));
    }
}
