//! 批量导入
//!
//! 递归扫描输入路径，逐个解析并导入整个批次共用的一个会话，结束时关闭会话。
//! 不是数据集的文件静默跳过，其他失败只记录警告，不中断批次。

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use wado_core::DatasetParser;
use wado_storage::{ImageConverter, IngestOutcome, IngestSession, StoreContext, StudyIndex};

/// 单个批次的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub stored: usize,
    pub duplicates: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// 本批次完成的研究
    pub studies: Vec<String>,
}

/// 批量导入器
pub struct BatchImporter {
    ctx: Arc<StoreContext>,
    converter: Arc<ImageConverter>,
    parser: Arc<dyn DatasetParser>,
}

impl BatchImporter {
    pub fn new(
        ctx: Arc<StoreContext>,
        converter: Arc<ImageConverter>,
        parser: Arc<dyn DatasetParser>,
    ) -> Self {
        Self {
            ctx,
            converter,
            parser,
        }
    }

    /// 导入全部路径，返回批次统计
    pub fn import<P: AsRef<Path>>(&self, paths: &[P]) -> Result<BatchReport> {
        let index = Arc::new(StudyIndex::new(self.ctx.layout.clone()));
        let mut session = IngestSession::new(Arc::clone(&self.ctx), Arc::clone(&self.converter))
            .with_index(index);
        let mut report = BatchReport::default();

        for file in scan(paths) {
            self.import_file(&mut session, &file, &mut report);
        }

        report.studies = session.close()?;
        info!(
            "批量导入完成: 新增 {} 重复 {} 未变化 {} 跳过 {} 失败 {}，研究 {} 个",
            report.stored,
            report.duplicates,
            report.unchanged,
            report.skipped,
            report.failed,
            report.studies.len()
        );
        Ok(report)
    }

    fn import_file(&self, session: &mut IngestSession, file: &Path, report: &mut BatchReport) {
        let parsed = match self.parser.parse_file(file) {
            Ok(parsed) => parsed,
            Err(wado_core::CoreError::NotDicom(_)) => {
                debug!("跳过非数据集文件: {:?}", file);
                report.skipped += 1;
                return;
            }
            Err(e) => {
                warn!("解析 {:?} 失败: {}", file, e);
                report.failed += 1;
                return;
            }
        };

        match session.ingest_parsed(parsed) {
            Ok(IngestOutcome::Stored(hash)) => {
                debug!("导入 {:?} -> {}", file, hash);
                report.stored += 1;
            }
            Ok(IngestOutcome::Duplicate) => report.duplicates += 1,
            Ok(IngestOutcome::Unchanged) => report.unchanged += 1,
            Err(e) if e.is_format() => {
                debug!("跳过非数据集文件: {:?}", file);
                report.skipped += 1;
            }
            Err(e) => {
                warn!("导入 {:?} 失败: {}", file, e);
                report.failed += 1;
            }
        }
    }
}

/// 递归列出全部文件，目录内按文件名排序
pub fn scan<P: AsRef<Path>>(paths: &[P]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path.as_ref()).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => warn!("扫描失败: {}", e),
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_is_recursive_and_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b/c")).unwrap();
        fs::write(dir.path().join("b/c/2.json"), "{}").unwrap();
        fs::write(dir.path().join("b/1.json"), "{}").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();

        let files = scan(&[dir.path()]);
        let names: Vec<String> = files
            .iter()
            .map(|f| {
                f.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(names, vec!["a.json", "b/1.json", "b/c/2.json"]);
    }

    #[test]
    fn test_missing_path_yields_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(scan(&[dir.path().join("absent")]).is_empty());
    }
}
