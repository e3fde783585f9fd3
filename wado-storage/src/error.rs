use thiserror::Error;
use wado_core::CoreError;

/// 尚未支持的数据形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedKind {
    /// 非像素的封装数据，或分段的多帧视频
    VideoFragments,
    /// 封装形式的普通 BulkData
    EncapsulatedBulkdata,
    /// 需要解码的分片像素数据但没有解码器
    FragmentedWithoutDecoder,
}

impl std::fmt::Display for UnsupportedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            UnsupportedKind::VideoFragments => "分段视频数据",
            UnsupportedKind::EncapsulatedBulkdata => "封装的 BulkData",
            UnsupportedKind::FragmentedWithoutDecoder => "缺少解码器的分片像素数据",
        };
        f.write_str(text)
    }
}

/// Storage 错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// 输入不是可识别的数据集
    #[error("格式错误: {0}")]
    Format(String),

    /// 像素长度不是整字节
    #[error("像素位深不是整字节: {0}")]
    PartialBitDepth(String),

    #[error("片段缺失: {0}")]
    MissingFragment(String),

    /// 目标已存在且不允许覆盖，未发生任何写入
    #[error("写入冲突，目标已存在: {0}")]
    WriteConflict(String),

    #[error("不支持的目标编码: {0}")]
    UnsupportedEncoding(String),

    #[error("暂不支持: {0}")]
    Unsupported(UnsupportedKind),

    #[error("无效的数据集: {0}")]
    InvalidDataset(String),

    #[error("编解码错误: {0}")]
    Codec(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// 是否为"不是数据集"类错误，批量导入时静默跳过
    pub fn is_format(&self) -> bool {
        matches!(self, StorageError::Format(_))
    }

    /// 是否只影响当前实例（批量导入和网络会话都应继续）
    pub fn is_fatal_for_instance(&self) -> bool {
        matches!(
            self,
            StorageError::PartialBitDepth(_)
                | StorageError::Unsupported(_)
                | StorageError::InvalidDataset(_)
                | StorageError::Codec(_)
                | StorageError::WriteConflict(_)
        )
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotDicom(name) => StorageError::Format(name),
            CoreError::Malformed(msg) | CoreError::InvalidBulkUri(msg) => {
                StorageError::InvalidDataset(msg)
            }
            CoreError::Codec(msg) => StorageError::Codec(msg),
            CoreError::Io(e) => StorageError::Io(e),
            CoreError::Json(e) => StorageError::Serialization(e),
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_dicom_maps_to_format() {
        let err = StorageError::from(CoreError::NotDicom("a.txt".into()));
        assert!(err.is_format());
        assert!(!err.is_fatal_for_instance());
    }

    #[test]
    fn test_instance_level_errors() {
        assert!(StorageError::PartialBitDepth("12".into()).is_fatal_for_instance());
        assert!(StorageError::Unsupported(UnsupportedKind::VideoFragments).is_fatal_for_instance());
        assert!(!StorageError::MissingFragment("abc".into()).is_fatal_for_instance());
    }

    #[test]
    fn test_display() {
        let err = StorageError::Unsupported(UnsupportedKind::EncapsulatedBulkdata);
        assert_eq!(err.to_string(), "暂不支持: 封装的 BulkData");
        let err = StorageError::WriteConflict("x.gz".into());
        assert_eq!(err.to_string(), "写入冲突，目标已存在: x.gz");
    }
}
