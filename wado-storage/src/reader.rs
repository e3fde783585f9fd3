//! BulkData 读取
//!
//! 按研究目录解析 BulkData 引用并读回负载字节：
//! 文件不存在时回退到 `.gz` 形式；逐帧引用的第 i 个范围位于 `<path>/<i+1>`。

use crate::core::files::FileStore;
use crate::core::multipart::extract_part;
use crate::error::{Result, StorageError};
use std::path::{Path, PathBuf};
use wado_core::{BulkReference, ByteRange};

/// 研究目录下的 BulkData 读取器
#[derive(Debug, Clone)]
pub struct BulkReader {
    files: FileStore,
    study_dir: PathBuf,
}

impl BulkReader {
    pub fn new(study_dir: impl Into<PathBuf>) -> Self {
        Self {
            files: FileStore::new(),
            study_dir: study_dir.into(),
        }
    }

    pub fn study_dir(&self) -> &Path {
        &self.study_dir
    }

    /// 帧数（非逐帧引用视为一帧）
    pub fn frame_count(&self, reference: &BulkReference) -> usize {
        if reference.framed {
            reference.ranges.len()
        } else {
            1
        }
    }

    /// 读取第 `index` 帧（从 0 开始）
    pub fn read_frame(&self, reference: &BulkReference, index: usize) -> Result<Vec<u8>> {
        if !reference.framed {
            if index != 0 {
                return Err(missing(reference, index));
            }
            return self.read_all(reference);
        }
        let range = reference
            .ranges
            .get(index)
            .copied()
            .ok_or_else(|| missing(reference, index))?;
        self.read_range(&reference.frame_path(index), range)
    }

    /// 读取引用的全部负载，逐帧引用按帧顺序拼接
    pub fn read_all(&self, reference: &BulkReference) -> Result<Vec<u8>> {
        if reference.framed {
            let mut out = Vec::new();
            for index in 0..reference.ranges.len() {
                out.extend(self.read_frame(reference, index)?);
            }
            return Ok(out);
        }
        match reference.ranges.first() {
            Some(range) => self.read_range(&reference.path, *range),
            None => self
                .files
                .read(&self.study_dir, &reference.path)?
                .ok_or_else(|| missing(reference, 0)),
        }
    }

    fn read_range(&self, name: &str, range: ByteRange) -> Result<Vec<u8>> {
        let bytes = self
            .files
            .read(&self.study_dir, name)?
            .ok_or_else(|| StorageError::MissingFragment(name.to_string()))?;
        extract_part(&bytes, range)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                StorageError::InvalidDataset(format!(
                    "{} 范围越界: offset={} length={} 文件长度={}",
                    name,
                    range.offset,
                    range.length,
                    bytes.len()
                ))
            })
    }
}

fn missing(reference: &BulkReference, index: usize) -> StorageError {
    StorageError::MissingFragment(format!("{} 第 {} 帧", reference, index + 1))
}
