//! 输出目录布局
//!
//! ```text
//! <root>/studies.gz                                   研究索引
//! <root>/studies/<study>/studies.gz                   研究查询结果
//! <root>/studies/<study>/series.gz                    序列查询结果
//! <root>/studies/<study>/series/<series>/metadata.gz
//! <root>/studies/<study>/series/<series>/instances.gz
//! <root>/studies/<study>/series/<series>/instances/<sop>/frames/<n>
//! <root>/studies/<study>/series/<series>/instances/<sop>/thumbnail
//! <root>/studies/<study>/series/<series>/instances/<sop>/rendered
//! <root>/studies/<study>/bulkdata/<h0h1>/<h2h3>/<rest>.raw
//! <root>/studies/<study>/bulkdata/<h0h1>/<h2h3>/<rest>.json.gz   提取片段
//! <root>/deduplicated/<study>/<hash>.gz               研究快照
//! <root>/instances/<study>/<hash>.gz                  单实例残留
//! ```

use crate::error::{Result, StorageError};
use std::path::{Path, PathBuf};

/// 存储根目录下的路径规则
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 研究索引文件名（位于根目录）
    pub fn study_index_name(&self) -> &'static str {
        "studies"
    }

    pub fn study_dir(&self, study_uid: &str) -> PathBuf {
        self.root.join("studies").join(study_uid)
    }

    pub fn deduplicated_dir(&self, study_uid: &str) -> PathBuf {
        self.root.join("deduplicated").join(study_uid)
    }

    pub fn instances_dir(&self, study_uid: &str) -> PathBuf {
        self.root.join("instances").join(study_uid)
    }

    /// 快照或单实例残留的文件名
    pub fn deduplicated_name(&self, hash: &str) -> String {
        format!("{}.gz", hash)
    }

    /// 提取片段相对研究目录的文件名
    pub fn extract_name(&self, hash: &str) -> String {
        format!("bulkdata/{}.json.gz", shard(hash))
    }

    /// 普通 BulkData 相对研究目录的文件名（gzip 写入，磁盘上带 `.gz`）
    pub fn bulkdata_name(&self, hash: &str) -> String {
        format!("bulkdata/{}.raw", shard(hash))
    }

    pub fn series_dir_name(&self, series_uid: &str) -> String {
        format!("series/{}", series_uid)
    }

    pub fn instance_dir_name(&self, series_uid: &str, sop_uid: &str) -> String {
        format!("series/{}/instances/{}", series_uid, sop_uid)
    }

    pub fn frames_name(&self, series_uid: &str, sop_uid: &str) -> String {
        format!("{}/frames", self.instance_dir_name(series_uid, sop_uid))
    }

    /// 第 `frame` 帧（从 1 开始）
    pub fn frame_name(&self, series_uid: &str, sop_uid: &str, frame: usize) -> String {
        format!("{}/{}", self.frames_name(series_uid, sop_uid), frame)
    }

    pub fn thumbnail_name(&self, series_uid: &str, sop_uid: &str) -> String {
        format!("{}/thumbnail", self.instance_dir_name(series_uid, sop_uid))
    }

    pub fn rendered_name(&self, series_uid: &str, sop_uid: &str) -> String {
        format!("{}/rendered", self.instance_dir_name(series_uid, sop_uid))
    }
}

/// 哈希分片：`ab/cd/efgh...`
pub fn shard(hash: &str) -> String {
    match (hash.get(0..2), hash.get(2..4), hash.get(4..)) {
        (Some(a), Some(b), Some(rest)) if !rest.is_empty() => format!("{}/{}/{}", a, b, rest),
        _ => hash.to_string(),
    }
}

/// 检查 UID 能否安全用作路径片段
pub fn validate_uid(kind: &str, uid: &str) -> Result<()> {
    let invalid = uid.is_empty()
        || uid.contains("..")
        || uid.contains(':')
        || uid.contains('/')
        || uid.contains('\\');
    if invalid {
        return Err(StorageError::InvalidDataset(format!(
            "{} 不能用作路径: {:?}",
            kind, uid
        )));
    }
    Ok(())
}
