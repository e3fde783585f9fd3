use thiserror::Error;

/// 核心模型错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    /// 输入不是可识别的数据集，批量扫描据此跳过外来文件
    #[error("不是 DICOM 数据集: {0}")]
    NotDicom(String),

    #[error("数据集格式错误: {0}")]
    Malformed(String),

    #[error("无效的 BulkData URI: {0}")]
    InvalidBulkUri(String),

    #[error("编解码错误: {0}")]
    Codec(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_dicom_display() {
        let err = CoreError::NotDicom("readme.txt".to_string());
        assert_eq!(err.to_string(), "不是 DICOM 数据集: readme.txt");
    }

    #[test]
    fn test_json_conversion() {
        let json_err = serde_json::from_str::<i32>("oops").unwrap_err();
        let err = CoreError::from(json_err);
        assert!(err.to_string().contains("JSON错误"));
    }
}
