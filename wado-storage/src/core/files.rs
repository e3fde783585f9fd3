//! 原子文件存储
//!
//! 所有写入先落到目标目录内的临时文件，提交时重命名为最终文件名，
//! 失败或未提交时临时文件自动删除，已有内容不受影响。
//! 同一名称的 gzip 与非 gzip 两种形式互斥，提交时删除另一种。

use crate::core::hasher::HashingWriter;
use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// gzip 文件后缀
pub const GZ_EXT: &str = ".gz";

/// 区间哈希的读缓冲大小
const HASH_BUFFER_SIZE: usize = 16 * 1024;

enum Sink {
    Plain(BufWriter<NamedTempFile>),
    Gzip(GzEncoder<BufWriter<NamedTempFile>>),
}

/// 原子写入流
///
/// 写入内容在 [`commit`](AtomicWriter::commit) 之前对外不可见。
pub struct AtomicWriter {
    sink: Option<Sink>,
    final_path: PathBuf,
    sibling: PathBuf,
    overwrite: bool,
    written: u64,
}

impl AtomicWriter {
    /// 已写入的（未压缩）字节数
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// 完成写入并重命名到最终位置，返回写入的字节数
    pub fn commit(mut self) -> Result<u64> {
        let sink = self
            .sink
            .take()
            .ok_or_else(|| StorageError::Io(io::Error::other("写入流已关闭")))?;
        let buffered = match sink {
            Sink::Plain(buffered) => buffered,
            Sink::Gzip(encoder) => encoder.finish()?,
        };
        let temp = buffered.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;

        if self.overwrite {
            temp.persist(&self.final_path).map_err(|e| e.error)?;
        } else {
            temp.persist_noclobber(&self.final_path).map_err(|e| {
                if e.error.kind() == io::ErrorKind::AlreadyExists {
                    StorageError::WriteConflict(self.final_path.display().to_string())
                } else {
                    StorageError::Io(e.error)
                }
            })?;
        }

        // 同名目录（如 studies 与 studies.gz）不是另一种编码
        if self.sibling.is_file() {
            match fs::remove_file(&self.sibling) {
                Ok(()) => debug!("删除另一编码的旧文件: {:?}", self.sibling),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("删除旧文件失败 {:?}: {}", self.sibling, e),
            }
        }
        Ok(self.written)
    }
}

impl Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.sink.as_mut() {
            Some(Sink::Plain(w)) => w.write(buf)?,
            Some(Sink::Gzip(w)) => w.write(buf)?,
            None => return Err(io::Error::other("写入流已关闭")),
        };
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(Sink::Plain(w)) => w.flush(),
            Some(Sink::Gzip(w)) => w.flush(),
            None => Ok(()),
        }
    }
}

/// 统计写入字节数的包装流
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// 目录条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub modified: DateTime<Utc>,
    pub len: u64,
}

/// 原子文件存储
#[derive(Debug, Clone, Default)]
pub struct FileStore;

impl FileStore {
    pub fn new() -> Self {
        Self
    }

    /// 打开原子写入流
    ///
    /// 名称以 `.gz` 结尾时强制 gzip；`gzip` 为真时在名称后追加 `.gz`。
    /// `overwrite` 为假且目标已存在时，在任何写入之前返回 `WriteConflict`。
    pub fn open_for_write(
        &self,
        dir: &Path,
        name: &str,
        gzip: bool,
        overwrite: bool,
    ) -> Result<AtomicWriter> {
        let (final_name, sibling_name, gzip) = match name.strip_suffix(GZ_EXT) {
            Some(plain) => (name.to_string(), plain.to_string(), true),
            None if gzip => (format!("{}{}", name, GZ_EXT), name.to_string(), true),
            None => (name.to_string(), format!("{}{}", name, GZ_EXT), false),
        };
        let final_path = dir.join(&final_name);
        let sibling = dir.join(&sibling_name);

        if !overwrite && final_path.exists() {
            return Err(StorageError::WriteConflict(final_path.display().to_string()));
        }
        let parent = final_path.parent().unwrap_or(dir);
        fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        let buffered = BufWriter::new(temp);
        let sink = if gzip {
            Sink::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            Sink::Plain(buffered)
        };
        debug!("打开原子写入: {:?}", final_path);

        Ok(AtomicWriter {
            sink: Some(sink),
            final_path,
            sibling,
            overwrite,
            written: 0,
        })
    }

    /// 一次性写入完整内容
    pub fn write_bytes(
        &self,
        dir: &Path,
        name: &str,
        gzip: bool,
        overwrite: bool,
        bytes: &[u8],
    ) -> Result<u64> {
        let mut writer = self.open_for_write(dir, name, gzip, overwrite)?;
        writer.write_all(bytes)?;
        writer.commit()
    }

    /// 名称的明文或 gzip 形式是否存在
    pub fn exists(&self, dir: &Path, name: &str) -> bool {
        let plain = name.strip_suffix(GZ_EXT).unwrap_or(name);
        dir.join(plain).is_file() || dir.join(format!("{}{}", plain, GZ_EXT)).is_file()
    }

    /// 打开读取流，优先明文文件，其次 `.gz`，都不存在时返回 None
    pub fn open_read(&self, dir: &Path, name: &str) -> Result<Option<Box<dyn Read>>> {
        let plain = name.strip_suffix(GZ_EXT).unwrap_or(name);
        let plain_path = dir.join(plain);
        if plain_path.is_file() {
            return Ok(Some(Box::new(File::open(plain_path)?)));
        }
        let gz_path = dir.join(format!("{}{}", plain, GZ_EXT));
        if gz_path.is_file() {
            return Ok(Some(Box::new(GzDecoder::new(File::open(gz_path)?))));
        }
        Ok(None)
    }

    /// 读取完整内容（自动解压）
    pub fn read(&self, dir: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = self.open_read(dir, name)? else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    /// 计算文件中一段字节的内容哈希（32 进制），`length` 为空时读到文件末尾
    pub fn hash_of(&self, path: &Path, offset: u64, length: Option<u64>) -> Result<String> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader: Box<dyn Read> = match length {
            Some(len) => Box::new(file.take(len)),
            None => Box::new(file),
        };

        let mut writer = HashingWriter::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
        }
        if let Some(len) = length
            && writer.written() < len
        {
            warn!(
                "哈希区间超出文件末尾: {:?} offset={} length={} 实际={}",
                path,
                offset,
                len,
                writer.written()
            );
        }
        Ok(writer.finish_base32())
    }

    /// 读取文件中一段字节，`length` 为空时读到文件末尾
    pub fn read_range(&self, path: &Path, offset: u64, length: Option<u64>) -> Result<Vec<u8>> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        match length {
            Some(len) => {
                file.take(len).read_to_end(&mut buf)?;
                if (buf.len() as u64) < len {
                    return Err(StorageError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{:?} 长度不足: 期望 {} 实际 {}", path, len, buf.len()),
                    )));
                }
            }
            None => {
                file.read_to_end(&mut buf)?;
            }
        }
        Ok(buf)
    }

    /// 按修改时间升序列出目录中的文件，时间相同按名称排序；目录不存在时返回空列表
    pub fn list_contents_increasing_age(&self, dir: &Path) -> Result<Vec<DirEntryInfo>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();
            files.push(DirEntryInfo {
                name,
                modified,
                len: metadata.len(),
            });
        }
        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_commit_makes_file_visible() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new();

        let mut writer = store.open_for_write(dir.path(), "a/b/data", false, true).unwrap();
        writer.write_all(b"hello").unwrap();
        assert!(!dir.path().join("a/b/data").exists());
        assert_eq!(writer.commit().unwrap(), 5);

        assert_eq!(fs::read(dir.path().join("a/b/data")).unwrap(), b"hello");
    }

    #[test]
    fn test_drop_without_commit_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new();
        {
            let mut writer = store.open_for_write(dir.path(), "data", false, true).unwrap();
            writer.write_all(b"partial").unwrap();
        }
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_no_overwrite_fails_before_write() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new();
        store.write_bytes(dir.path(), "data", false, true, b"first").unwrap();

        let err = store
            .open_for_write(dir.path(), "data", false, false)
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::WriteConflict(_)));
        assert_eq!(fs::read(dir.path().join("data")).unwrap(), b"first");
    }

    #[test]
    fn test_gzip_round_trip_and_sibling_cleanup() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new();
        store.write_bytes(dir.path(), "studies", false, true, b"plain").unwrap();
        store.write_bytes(dir.path(), "studies", true, true, b"zipped").unwrap();

        assert!(!dir.path().join("studies").exists());
        assert!(dir.path().join("studies.gz").exists());
        assert!(store.exists(dir.path(), "studies"));
        assert_eq!(store.read(dir.path(), "studies").unwrap().unwrap(), b"zipped");
        assert_eq!(store.read(dir.path(), "missing").unwrap(), None);

        // 名称自带 .gz 时强制压缩
        store.write_bytes(dir.path(), "x.gz", false, true, b"abc").unwrap();
        assert_eq!(store.read(dir.path(), "x").unwrap().unwrap(), b"abc");
    }

    #[test]
    fn test_hash_of_range() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new();
        let path = dir.path().join("blob");
        let mut content = vec![0u8; 40_000];
        content.extend_from_slice(b"payload");
        fs::write(&path, &content).unwrap();

        let whole_tail = store.hash_of(&path, 40_000, None).unwrap();
        let ranged = store.hash_of(&path, 40_000, Some(7)).unwrap();
        assert_eq!(whole_tail, ranged);

        fs::write(dir.path().join("other"), b"payload").unwrap();
        let other = store.hash_of(&dir.path().join("other"), 0, Some(7)).unwrap();
        assert_eq!(ranged, other);
        assert_ne!(ranged, store.hash_of(&path, 0, Some(7)).unwrap());
    }

    #[test]
    fn test_read_range() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new();
        let path = dir.path().join("blob");
        fs::write(&path, b"0123456789").unwrap();

        assert_eq!(store.read_range(&path, 2, Some(3)).unwrap(), b"234");
        assert_eq!(store.read_range(&path, 7, None).unwrap(), b"789");
        assert!(store.read_range(&path, 8, Some(5)).is_err());
    }

    #[test]
    fn test_list_contents_increasing_age() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new();
        assert!(
            store
                .list_contents_increasing_age(&dir.path().join("none"))
                .unwrap()
                .is_empty()
        );

        let old = dir.path().join("b.gz");
        let new = dir.path().join("a.gz");
        fs::write(&old, b"1").unwrap();
        fs::write(&new, b"2").unwrap();
        let earlier = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(earlier)
            .unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let names: Vec<String> = store
            .list_contents_increasing_age(dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b.gz".to_string(), "a.gz".to_string()]);
    }
}
