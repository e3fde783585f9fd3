use thiserror::Error;

#[derive(Error, Debug)]
pub enum WadoError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("存储错误: {0}")]
    Storage(#[from] wado_storage::StorageError),

    #[error("会话错误: {0}")]
    Session(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

// 为 wado_core::CoreError 实现 From trait，经由存储错误归类
impl From<wado_core::CoreError> for WadoError {
    fn from(err: wado_core::CoreError) -> Self {
        WadoError::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, WadoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use wado_storage::{StorageError, UnsupportedKind};

    #[test]
    fn test_config_error() {
        let err = WadoError::Config("目标编码无效".to_string());
        assert_eq!(err.to_string(), "配置错误: 目标编码无效");
    }

    #[test]
    fn test_storage_error_conversion() {
        let err = WadoError::from(StorageError::Unsupported(UnsupportedKind::VideoFragments));
        assert_eq!(err.to_string(), "存储错误: 暂不支持: 分段视频数据");
    }

    #[test]
    fn test_core_error_conversion() {
        let err = WadoError::from(wado_core::CoreError::NotDicom("a.txt".into()));
        assert!(matches!(err, WadoError::Storage(ref e) if e.is_format()));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = WadoError::from(io_err);
        assert!(err.to_string().contains("IO 错误"));
    }

    #[test]
    fn test_session_error() {
        let err = WadoError::Session("关联已关闭".to_string());
        assert_eq!(err.to_string(), "会话错误: 关联已关闭");
    }
}
