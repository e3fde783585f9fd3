//! BulkData 引用
//!
//! 引用以 URI 形式编码存储位置和可选的字节范围：
//! - `path`：整个文件
//! - `path?offset=N&length=M`：单个范围
//! - `path?offsets=N1,N2&lengths=M1,M2`：逐帧范围，按下标一一对应，
//!   第 i 个范围位于子文件 `path/i`（从 1 开始）

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 字节范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// 范围结束位置（不含）
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// 指向二进制负载的引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReference {
    /// 存储位置（相对研究目录或绝对路径）
    pub path: String,
    /// 字节范围，空表示整个文件
    pub ranges: Vec<ByteRange>,
    /// 逐帧引用，每个范围对应一个子文件
    pub framed: bool,
}

impl BulkReference {
    /// 引用整个文件
    pub fn whole(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ranges: Vec::new(),
            framed: false,
        }
    }

    /// 单个字节范围
    pub fn single(path: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            path: path.into(),
            ranges: vec![ByteRange::new(offset, length)],
            framed: false,
        }
    }

    /// 逐帧字节范围
    pub fn framed(path: impl Into<String>, ranges: Vec<ByteRange>) -> Self {
        Self {
            path: path.into(),
            ranges,
            framed: true,
        }
    }

    /// 所有范围的总长度，整文件引用返回 None
    pub fn total_length(&self) -> Option<u64> {
        if self.ranges.is_empty() {
            None
        } else {
            Some(self.ranges.iter().map(|r| r.length).sum())
        }
    }

    /// 逐帧引用中第 `index` 帧（从 0 开始）所在的子文件路径
    pub fn frame_path(&self, index: usize) -> String {
        format!("{}/{}", self.path, index + 1)
    }

    /// 编码为 URI 字符串
    pub fn to_uri(&self) -> String {
        match self.ranges.as_slice() {
            [] => self.path.clone(),
            [range] if !self.framed => format!(
                "{}?offset={}&length={}",
                self.path, range.offset, range.length
            ),
            ranges => {
                let offsets = ranges
                    .iter()
                    .map(|r| r.offset.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                let lengths = ranges
                    .iter()
                    .map(|r| r.length.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{}?offsets={}&lengths={}", self.path, offsets, lengths)
            }
        }
    }

    /// 解析 URI 字符串
    pub fn parse(uri: &str) -> Result<Self> {
        let Some((path, query)) = uri.split_once('?') else {
            return Ok(Self::whole(uri));
        };

        let mut offset = None;
        let mut length = None;
        let mut offsets = None;
        let mut lengths = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| CoreError::InvalidBulkUri(uri.to_string()))?;
            match key {
                "offset" => offset = Some(parse_number(uri, value)?),
                "length" => length = Some(parse_number(uri, value)?),
                "offsets" => offsets = Some(parse_list(uri, value)?),
                "lengths" => lengths = Some(parse_list(uri, value)?),
                _ => {}
            }
        }

        let framed = offsets.is_some();
        let ranges = match (offset, length, offsets, lengths) {
            (None, None, None, None) => Vec::new(),
            (Some(o), Some(l), None, None) => vec![ByteRange::new(o, l)],
            (None, Some(l), None, None) => vec![ByteRange::new(0, l)],
            (None, None, Some(os), Some(ls)) => {
                if os.len() != ls.len() || os.is_empty() {
                    return Err(CoreError::InvalidBulkUri(format!(
                        "offsets/lengths 数量不一致: {}",
                        uri
                    )));
                }
                os.into_iter()
                    .zip(ls)
                    .map(|(o, l)| ByteRange::new(o, l))
                    .collect()
            }
            _ => return Err(CoreError::InvalidBulkUri(uri.to_string())),
        };

        Ok(Self {
            path: path.to_string(),
            ranges,
            framed,
        })
    }
}

fn parse_number(uri: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::InvalidBulkUri(uri.to_string()))
}

fn parse_list(uri: &str, value: &str) -> Result<Vec<u64>> {
    value.split(',').map(|v| parse_number(uri, v)).collect()
}

impl fmt::Display for BulkReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for BulkReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_file() {
        let bulk = BulkReference::parse("bulkdata/ab/cd/efgh.raw").unwrap();
        assert!(bulk.ranges.is_empty());
        assert_eq!(bulk.total_length(), None);
        assert_eq!(bulk.to_uri(), "bulkdata/ab/cd/efgh.raw");
    }

    #[test]
    fn test_single_range() {
        let bulk = BulkReference::parse("file.dcm?offset=132&length=524288").unwrap();
        assert_eq!(bulk.path, "file.dcm");
        assert_eq!(bulk.ranges, vec![ByteRange::new(132, 524288)]);
        assert_eq!(bulk.total_length(), Some(524288));
        assert_eq!(bulk.to_uri(), "file.dcm?offset=132&length=524288");
    }

    #[test]
    fn test_multi_range() {
        let uri = "series/1/instances/2/frames?offsets=90,90,90&lengths=10,20,30";
        let bulk: BulkReference = uri.parse().unwrap();
        assert!(bulk.framed);
        assert_eq!(bulk.total_length(), Some(60));
        assert_eq!(bulk.frame_path(1), "series/1/instances/2/frames/2");
        assert_eq!(bulk.to_uri(), uri);
    }

    #[test]
    fn test_single_frame_keeps_framed_form() {
        let bulk = BulkReference::framed("frames", vec![ByteRange::new(96, 262144)]);
        let uri = bulk.to_uri();
        assert_eq!(uri, "frames?offsets=96&lengths=262144");
        assert_eq!(BulkReference::parse(&uri).unwrap(), bulk);
    }

    #[test]
    fn test_mismatched_ranges_rejected() {
        let err = BulkReference::parse("f?offsets=1,2&lengths=3").unwrap_err();
        assert!(matches!(err, CoreError::InvalidBulkUri(_)));
        assert!(BulkReference::parse("f?offset=1").is_err());
        assert!(BulkReference::parse("f?offset=x&length=1").is_err());
    }
}
