//! 内容哈希
//!
//! 数据集以隐式 VR 小端规范编码写入 SHA-256，结果转为紧凑的
//! 36 进制（片段）或 32 进制（BulkData）文本。规范编码按标签升序，
//! 因此哈希与字段的插入顺序无关。

use sha2::{Digest, Sha256};
use std::io::{self, Write};
use tracing::warn;
use wado_core::tags;
use wado_core::{Dataset, Value, Vr};

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 36 进制 SHA-256 的固定宽度
pub const BASE36_WIDTH: usize = 50;
/// 32 进制 SHA-256 的固定宽度
pub const BASE32_WIDTH: usize = 52;

/// 写入即哈希的输出流
#[derive(Default)]
pub struct HashingWriter {
    digest: Sha256,
    written: u64,
}

impl HashingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 36 进制结果
    pub fn finish_base36(self) -> String {
        to_radix(&self.digest.finalize(), 36, BASE36_WIDTH)
    }

    /// 32 进制结果
    pub fn finish_base32(self) -> String {
        to_radix(&self.digest.finalize(), 32, BASE32_WIDTH)
    }
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.digest.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 大端字节串转换为指定进制文本，左侧补零到固定宽度
pub fn to_radix(bytes: &[u8], radix: u32, width: usize) -> String {
    let mut number: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    let mut digits = Vec::with_capacity(width);
    while !number.is_empty() {
        let mut remainder = 0u32;
        let mut quotient = Vec::with_capacity(number.len());
        for byte in &number {
            let acc = (remainder << 8) | u32::from(*byte);
            let q = acc / radix;
            remainder = acc % radix;
            if !(quotient.is_empty() && q == 0) {
                quotient.push(q as u8);
            }
        }
        digits.push(DIGITS[remainder as usize]);
        number = quotient;
    }
    while digits.len() < width {
        digits.push(b'0');
    }
    digits.iter().rev().map(|d| char::from(*d)).collect()
}

/// 计算数据集的规范哈希（不读取也不写入缓存的哈希标签）
pub fn hash_dataset(dataset: &Dataset) -> String {
    let mut writer = HashingWriter::new();
    // HashingWriter 不会返回错误
    let _ = dataset.write_canonical(&mut writer);
    writer.finish_base36()
}

/// 获取数据集的内容哈希，首次计算后记录在私有哈希标签中
pub fn content_hash(dataset: &mut Dataset) -> String {
    if let Some(hash) = stored_hash(dataset) {
        return hash;
    }
    let hash = hash_dataset(dataset);
    stamp_hash(dataset, &hash);
    hash
}

/// 已记录的哈希
pub fn stored_hash(dataset: &Dataset) -> Option<String> {
    let block = dedup_block(dataset)?;
    dataset
        .string(dedup_tag(block, tags::DEDUP_HASH_OFFSET))
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

pub fn stamp_hash(dataset: &mut Dataset, hash: &str) {
    let block = stamp_creator(dataset);
    dataset.set_string(dedup_tag(block, tags::DEDUP_HASH_OFFSET), Vr::CS, hash);
}

/// 去重私有块中的标签
pub fn dedup_tag(block: u8, offset: u8) -> tags::Tag {
    tags::private_tag(tags::DEDUP_GROUP, block, offset)
}

/// 查找创建者为 `dedupped` 的私有块
pub fn dedup_block(dataset: &Dataset) -> Option<u8> {
    (0x10..=0xFFu8).find(|block| {
        dataset.string(tags::private_creator_tag(tags::DEDUP_GROUP, *block))
            == Some(tags::DEDUP_CREATOR)
    })
}

/// 声明私有创建者，返回占用的私有块
///
/// 已声明时沿用原块；否则占用第一个空闲的创建者槽位，不覆盖其他厂商的块。
pub fn stamp_creator(dataset: &mut Dataset) -> u8 {
    if let Some(block) = dedup_block(dataset) {
        return block;
    }
    let free = (0x10..=0xFFu8)
        .find(|block| !dataset.contains(tags::private_creator_tag(tags::DEDUP_GROUP, *block)));
    let block = match free {
        Some(block) => block,
        None => {
            warn!("私有组 {:04X} 没有空闲的创建者槽位，覆盖首选块", tags::DEDUP_GROUP);
            tags::DEDUP_BLOCK
        }
    };
    dataset.put(
        tags::private_creator_tag(tags::DEDUP_GROUP, block),
        Vr::LO,
        Value::Strings(vec![tags::DEDUP_CREATOR.to_string()]),
    );
    block
}

/// 对一组已排序的哈希计算快照哈希
pub fn hash_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> String {
    let mut writer = HashingWriter::new();
    for token in tokens {
        // 以 NUL 分隔，避免拼接歧义
        let _ = writer.write_all(token.as_bytes());
        let _ = writer.write_all(&[0]);
    }
    writer.finish_base36()
}
