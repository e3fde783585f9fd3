//! 数据集列表的 JSON 持久化

use crate::core::files::FileStore;
use crate::error::{Result, StorageError};
use std::borrow::Borrow;
use std::io::Write;
use std::path::Path;
use wado_core::{Dataset, json};

/// 以 DICOM JSON 数组写出数据集列表
pub fn write_datasets<D: Borrow<Dataset>>(
    files: &FileStore,
    dir: &Path,
    name: &str,
    gzip: bool,
    overwrite: bool,
    datasets: &[D],
) -> Result<u64> {
    let value = datasets
        .iter()
        .map(|d| json::to_json(d.borrow()))
        .collect::<wado_core::Result<Vec<_>>>()
        .map(serde_json::Value::Array)?;
    let mut writer = files.open_for_write(dir, name, gzip, overwrite)?;
    serde_json::to_writer(&mut writer, &value)?;
    writer.flush()?;
    writer.commit()
}

/// 读取数据集列表，文件不存在时返回 None
pub fn read_datasets(files: &FileStore, dir: &Path, name: &str) -> Result<Option<Vec<Dataset>>> {
    let Some(bytes) = files.read(dir, name)? else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    let datasets = match &value {
        serde_json::Value::Array(_) => json::list_from_json(&value)?,
        serde_json::Value::Object(_) => vec![json::from_json(&value)?],
        _ => {
            return Err(StorageError::InvalidDataset(format!(
                "{}/{} 不是 JSON 数组",
                dir.display(),
                name
            )));
        }
    };
    Ok(Some(datasets))
}

/// 读取只含一个数据集的文件
pub fn read_single(files: &FileStore, dir: &Path, name: &str) -> Result<Option<Dataset>> {
    Ok(read_datasets(files, dir, name)?.and_then(|list| list.into_iter().next()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wado_core::Vr;
    use wado_core::tags::*;

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let files = FileStore::new();
        let mut a = Dataset::new();
        a.set_string(PATIENT_ID, Vr::LO, "P1");
        let mut b = Dataset::new();
        b.set_string(PATIENT_ID, Vr::LO, "P2");

        write_datasets(&files, dir.path(), "list", true, true, &[a.clone(), b]).unwrap();
        assert!(dir.path().join("list.gz").exists());

        let back = read_datasets(&files, dir.path(), "list").unwrap().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(read_single(&files, dir.path(), "list").unwrap(), Some(a));
        assert_eq!(read_single(&files, dir.path(), "none").unwrap(), None);
    }
}
