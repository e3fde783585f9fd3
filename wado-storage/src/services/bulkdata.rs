//! BulkData 寻址
//!
//! 把数据集中的二进制负载搬到研究目录下并改写引用：
//! - 像素数据按帧拆分，每帧一个 multipart 文件，必要时转码，另生成缩略图
//! - 视频像素数据拼接为单个 `rendered` 文件
//! - 其他 BulkData 按内容哈希存放到 `bulkdata/` 下，相同内容只写一次

use crate::context::StoreContext;
use crate::core::multipart;
use crate::error::{Result, StorageError, UnsupportedKind};
use crate::profile::OCTET_STREAM;
use crate::services::image::{ConvertedFrame, ImageConverter, NativeFrameDecoder};
use crate::services::study::StudyData;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use wado_core::{
    BulkReference, ByteRange, Dataset, FrameDecoder, ItemPath, PixelGeometry, SopId, Tag, Value,
    Vr, tags, transfer,
};

/// 按起始偏移和单帧长度切分连续的帧范围
pub fn frame_ranges(start: u64, frame_length: u64, frames: usize) -> Vec<ByteRange> {
    (0..frames as u64)
        .map(|i| ByteRange::new(start + i * frame_length, frame_length))
        .collect()
}

/// 单帧字节数，位数不是 8 的整数倍时报错
pub fn frame_length(geometry: &PixelGeometry) -> Result<u64> {
    let bits = geometry.frame_bits();
    if bits % 8 != 0 {
        return Err(StorageError::PartialBitDepth(format!(
            "{}x{}x{}x{} = {} 位",
            geometry.rows,
            geometry.columns,
            geometry.bits_allocated,
            geometry.samples_per_pixel,
            bits
        )));
    }
    Ok(bits / 8)
}

/// 帧的内容类型，压缩编码附带传输语法参数
pub fn frame_content_type(ctx: &StoreContext, tsuid: &str) -> String {
    let base = ctx.profile.content_type(tsuid);
    if base == OCTET_STREAM {
        base.to_string()
    } else {
        format!("{};transfer-syntax={}", base, tsuid)
    }
}

/// BulkData 寻址器
#[derive(Debug, Clone)]
pub struct BulkdataAddresser {
    converter: Arc<ImageConverter>,
}

/// 单个实例的写出目标
struct Target<'a> {
    ctx: &'a StoreContext,
    study_dir: PathBuf,
    id: &'a SopId,
}

impl BulkdataAddresser {
    pub fn new(converter: Arc<ImageConverter>) -> Self {
        Self { converter }
    }

    pub fn converter(&self) -> &Arc<ImageConverter> {
        &self.converter
    }

    /// 搬移实例的全部 BulkData 并原地改写引用
    ///
    /// `transfer_syntax` 为数据集自身的传输语法，可用传输语法标签缺失时以它为准。
    pub fn relocate(
        &self,
        id: &SopId,
        study: &StudyData,
        dataset: &mut Dataset,
        transfer_syntax: &str,
    ) -> Result<()> {
        let target = Target {
            ctx: study.context(),
            study_dir: study.study_dir(),
            id,
        };
        self.relocate_bulkdata(&target, dataset)?;

        let Some(pixel) = dataset.remove(tags::PIXEL_DATA) else {
            return Ok(());
        };
        let source = dataset
            .string(tags::AVAILABLE_TRANSFER_SYNTAX_UID)
            .unwrap_or(transfer_syntax)
            .to_string();
        dataset.set_string(tags::AVAILABLE_TRANSFER_SYNTAX_UID, Vr::UI, source.as_str());

        match pixel.value {
            Value::Bulk(reference) if transfer::is_video(&source) => {
                debug!("视频像素数据未封装: {}", reference);
                Err(StorageError::Unsupported(UnsupportedKind::VideoFragments))
            }
            Value::Bulk(reference) => {
                self.save_uncompressed(&target, dataset, pixel.vr, &source, &reference)
            }
            Value::Encapsulated(fragments) if transfer::is_video(&source) => {
                self.save_video(&target, dataset, pixel.vr, fragments)
            }
            Value::Encapsulated(fragments) => {
                self.save_compressed(&target, dataset, pixel.vr, &source, fragments)
            }
            other => {
                // 内联像素保持原样
                dataset.put(tags::PIXEL_DATA, pixel.vr, other);
                Ok(())
            }
        }
    }

    // ========================================================================
    // 普通 BulkData
    // ========================================================================

    fn relocate_bulkdata(&self, target: &Target<'_>, dataset: &mut Dataset) -> Result<()> {
        let mut found: Vec<(ItemPath, Tag, BulkReference)> = Vec::new();
        for visit in dataset.walk() {
            if visit.path.is_root() && visit.tag == tags::PIXEL_DATA {
                continue;
            }
            match visit.value {
                Value::Bulk(reference) => {
                    found.push((visit.path.clone(), visit.tag, reference.clone()))
                }
                Value::Encapsulated(_) => {
                    return Err(StorageError::Unsupported(
                        UnsupportedKind::EncapsulatedBulkdata,
                    ));
                }
                _ => {}
            }
        }

        for (path, tag, reference) in found {
            let moved = self.save_bulkdata(target, &reference)?;
            if let Some(element) = dataset.element_at_mut(&path, tag) {
                element.value = Value::Bulk(moved);
            }
        }
        Ok(())
    }

    fn save_bulkdata(&self, target: &Target<'_>, reference: &BulkReference) -> Result<BulkReference> {
        let ctx = target.ctx;
        let source = PathBuf::from(&reference.path);
        let (offset, length) = match reference.ranges.as_slice() {
            [] => (0, None),
            [range] => (range.offset, Some(range.length)),
            _ => {
                return Err(StorageError::InvalidDataset(format!(
                    "BulkData 不能有多个范围: {}",
                    reference
                )));
            }
        };
        let hash = ctx.files.hash_of(&source, offset, length)?;
        let name = ctx.layout.bulkdata_name(&hash);

        let range = if ctx.files.exists(&target.study_dir, &name) {
            debug!("BulkData 已存在: {}", name);
            let length = match length {
                Some(length) => length,
                None => std::fs::metadata(&source)?.len().saturating_sub(offset),
            };
            part_range(ctx, length)
        } else {
            let data = ctx.files.read_range(&source, offset, length)?;
            match multipart::save_part(
                &ctx.files,
                &target.study_dir,
                &name,
                true,
                false,
                ctx.profile.boundary(),
                OCTET_STREAM,
                &data,
            ) {
                Ok(range) => range,
                Err(StorageError::WriteConflict(_)) => part_range(ctx, data.len() as u64),
                Err(e) => return Err(e),
            }
        };
        Ok(BulkReference::single(name, range.offset, range.length))
    }

    // ========================================================================
    // 像素数据
    // ========================================================================

    fn save_uncompressed(
        &self,
        target: &Target<'_>,
        dataset: &mut Dataset,
        vr: Vr,
        source_ts: &str,
        reference: &BulkReference,
    ) -> Result<()> {
        let ctx = target.ctx;
        let geometry = PixelGeometry::from_dataset(dataset);
        let source = PathBuf::from(&reference.path);
        let start = reference.ranges.first().map(|r| r.offset).unwrap_or(0);

        let available = match reference.total_length() {
            Some(total) => total,
            None => std::fs::metadata(&source)?.len().saturating_sub(start),
        };
        let mut frames = geometry.frames;
        let mut length = frame_length(&geometry)?;
        if length == 0 {
            frames = 1;
            length = available;
        }
        // 写任何帧之前确认数据足够
        if length.saturating_mul(frames as u64) > available {
            return Err(StorageError::InvalidDataset(format!(
                "像素数据只有 {} 字节，{} 帧需要 {} 字节",
                available,
                frames,
                length.saturating_mul(frames as u64)
            )));
        }
        let ranges = frame_ranges(start, length, frames);
        let mut decoder = NativeFrameDecoder::new(&source, ranges.clone(), geometry);

        let frames_name = ctx.layout.frames_name(&target.id.series_uid, &target.id.sop_uid);
        let mut written = Vec::with_capacity(frames);
        let mut output_ts = source_ts.to_string();
        for (index, range) in ranges.iter().enumerate() {
            let original = ctx.files.read_range(&source, range.offset, Some(range.length))?;
            let frame = self.converter.convert_frame(
                source_ts,
                false,
                Some(&mut decoder),
                index,
                original,
            )?;
            output_ts = frame.transfer_syntax.clone();
            written.push(self.save_frame(target, &frames_name, index, frame)?);
        }

        if geometry.frame_bits() > 0 {
            self.save_thumbnail(target, &mut decoder, frames);
        }
        dataset.set_string(tags::AVAILABLE_TRANSFER_SYNTAX_UID, Vr::UI, output_ts);
        dataset.set_bulk(tags::PIXEL_DATA, vr, BulkReference::framed(frames_name, written));
        Ok(())
    }

    fn save_compressed(
        &self,
        target: &Target<'_>,
        dataset: &mut Dataset,
        vr: Vr,
        source_ts: &str,
        fragments: Vec<Vec<u8>>,
    ) -> Result<()> {
        let ctx = target.ctx;
        let geometry = PixelGeometry::from_dataset(dataset);
        let frames = geometry.frames;
        let fragmented = !transfer::fragments_are_frames(source_ts, &fragments, frames);

        let needs_decoder =
            self.converter.wants_conversion(source_ts, fragmented) || self.converter.thumbnails_enabled();
        let mut decoder = if needs_decoder {
            self.converter
                .open_decoder(source_ts, geometry, fragments.clone())?
        } else {
            None
        };
        if fragmented && decoder.is_none() {
            return Err(StorageError::Unsupported(
                UnsupportedKind::FragmentedWithoutDecoder,
            ));
        }

        let frames_name = ctx.layout.frames_name(&target.id.series_uid, &target.id.sop_uid);
        let mut originals = fragments.into_iter();
        let mut written = Vec::with_capacity(frames);
        let mut output_ts = source_ts.to_string();
        for index in 0..frames {
            let original = if fragmented {
                Vec::new()
            } else {
                originals.next().unwrap_or_default()
            };
            let frame = self.converter.convert_frame(
                source_ts,
                fragmented,
                decoder.as_deref_mut().map(|d| d as &mut dyn FrameDecoder),
                index,
                original,
            )?;
            output_ts = frame.transfer_syntax.clone();
            written.push(self.save_frame(target, &frames_name, index, frame)?);
        }

        if let Some(decoder) = decoder.as_mut() {
            self.save_thumbnail(target, decoder.as_mut(), frames);
        }
        dataset.set_string(tags::AVAILABLE_TRANSFER_SYNTAX_UID, Vr::UI, output_ts);
        dataset.set_bulk(tags::PIXEL_DATA, vr, BulkReference::framed(frames_name, written));
        Ok(())
    }

    fn save_video(
        &self,
        target: &Target<'_>,
        dataset: &mut Dataset,
        vr: Vr,
        fragments: Vec<Vec<u8>>,
    ) -> Result<()> {
        let ctx = target.ctx;
        let name = ctx.layout.rendered_name(&target.id.series_uid, &target.id.sop_uid);
        let data = fragments.concat();
        ctx.files
            .write_bytes(&target.study_dir, &name, false, true, &data)?;
        debug!("写出视频 {} 长度 {}", name, data.len());
        dataset.set_bulk(
            tags::PIXEL_DATA,
            vr,
            BulkReference::single(name, 0, data.len() as u64),
        );
        Ok(())
    }

    /// 写出一帧：multipart 文件，加上已知扩展名的单部分副本
    fn save_frame(
        &self,
        target: &Target<'_>,
        frames_name: &str,
        index: usize,
        frame: ConvertedFrame,
    ) -> Result<ByteRange> {
        let ctx = target.ctx;
        let content_type = frame_content_type(ctx, &frame.transfer_syntax);
        let name = format!("{}/{}", frames_name, index + 1);
        let range = multipart::save_part(
            &ctx.files,
            &target.study_dir,
            &name,
            frame.gzip,
            true,
            ctx.profile.boundary(),
            &content_type,
            &frame.data,
        )?;
        if let Some(extension) = ctx.profile.extension(&content_type) {
            let single = format!("{}.{}", name, extension);
            ctx.files
                .write_bytes(&target.study_dir, &single, false, true, &frame.data)?;
        }
        Ok(range)
    }

    /// 缩略图取中间帧，失败只记录警告
    fn save_thumbnail(&self, target: &Target<'_>, decoder: &mut dyn FrameDecoder, frames: usize) {
        let ctx = target.ctx;
        let middle = frames.div_ceil(2).saturating_sub(1);
        let name = ctx.layout.thumbnail_name(&target.id.series_uid, &target.id.sop_uid);
        match self.converter.thumbnail(decoder, middle) {
            Ok(Some(jpeg)) => {
                if let Err(e) = ctx.files.write_bytes(&target.study_dir, &name, false, true, &jpeg) {
                    warn!("写出缩略图 {} 失败: {}", name, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("生成缩略图 {} 失败: {}", name, e),
        }
    }
}

/// 已存在的 multipart 文件中负载的位置，与写出时计算的一致
fn part_range(ctx: &StoreContext, length: u64) -> ByteRange {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        ctx.profile.boundary(),
        OCTET_STREAM,
        length
    );
    ByteRange::new(header.len() as u64, length)
}
