//! multipart/related 封装
//!
//! 每个文件只包含一个部分：
//!
//! ```text
//! --BOUNDARY\r\n
//! Content-Type: <type>\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <payload>\r\n
//! --BOUNDARY--
//! ```
//!
//! 负载起始偏移由计数流在写完头部后得到，作为 BulkData 引用的 offset。

use crate::core::files::{CountingWriter, FileStore};
use crate::error::Result;
use std::io::{self, Read, Write};
use std::path::Path;
use wado_core::ByteRange;

const DASH: &[u8] = b"--";
const CRLF: &[u8] = b"\r\n";

/// 写出单部分 multipart，返回负载在流中的字节范围
pub fn write_part<W: Write>(
    out: &mut W,
    boundary: &str,
    content_type: &str,
    length: u64,
    payload: &mut dyn Read,
) -> io::Result<ByteRange> {
    let mut counting = CountingWriter::new(out);
    counting.write_all(DASH)?;
    counting.write_all(boundary.as_bytes())?;
    counting.write_all(CRLF)?;
    write!(counting, "Content-Type: {}\r\n", content_type)?;
    write!(counting, "Content-Length: {}\r\n", length)?;
    counting.write_all(CRLF)?;
    let offset = counting.count();

    let copied = io::copy(&mut payload.take(length), &mut counting)?;
    if copied != length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("负载长度不足: 期望 {} 实际 {}", length, copied),
        ));
    }

    counting.write_all(CRLF)?;
    counting.write_all(DASH)?;
    counting.write_all(boundary.as_bytes())?;
    counting.write_all(DASH)?;
    Ok(ByteRange::new(offset, length))
}

/// 以原子写入保存单部分 multipart 文件
#[allow(clippy::too_many_arguments)]
pub fn save_part(
    files: &FileStore,
    dir: &Path,
    name: &str,
    gzip: bool,
    overwrite: bool,
    boundary: &str,
    content_type: &str,
    payload: &[u8],
) -> Result<ByteRange> {
    let mut writer = files.open_for_write(dir, name, gzip, overwrite)?;
    let range = write_part(
        &mut writer,
        boundary,
        content_type,
        payload.len() as u64,
        &mut &payload[..],
    )?;
    writer.commit()?;
    Ok(range)
}

/// 从 multipart 字节中取出负载
pub fn extract_part(bytes: &[u8], range: ByteRange) -> Option<&[u8]> {
    let start = usize::try_from(range.offset).ok()?;
    let end = usize::try_from(range.end()).ok()?;
    bytes.get(start..end)
}
