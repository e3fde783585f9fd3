//! 存储上下文
//!
//! 各组件共享的只读依赖：目录布局、文件存储、标签配置和进程级统计。

use crate::core::files::FileStore;
use crate::layout::StorageLayout;
use crate::profile::TagProfile;
use crate::stats::Stats;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct StoreContext {
    pub layout: StorageLayout,
    pub files: FileStore,
    pub profile: Arc<TagProfile>,
    /// 进程级统计，每个研究在其下创建子统计
    pub stats: Arc<Stats>,
    /// 查询结果和元数据文件是否 gzip
    pub gzip_json: bool,
}

impl StoreContext {
    pub fn new(root: impl Into<PathBuf>, profile: Arc<TagProfile>) -> Self {
        Self {
            layout: StorageLayout::new(root),
            files: FileStore::new(),
            profile,
            stats: Stats::new("import"),
            gzip_json: true,
        }
    }

    pub fn with_gzip_json(mut self, gzip_json: bool) -> Self {
        self.gzip_json = gzip_json;
        self
    }

    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = stats;
        self
    }
}
