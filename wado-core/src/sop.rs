//! 实例标识

use crate::dataset::Dataset;
use crate::error::{CoreError, Result};
use crate::tags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 唯一确定一个数据集的 UID 三元组
///
/// 所属研究的状态和图像解码上下文不挂在标识上，由调用方显式传入。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SopId {
    pub study_uid: String,
    pub series_uid: String,
    pub sop_uid: String,
}

impl SopId {
    pub fn new(
        study_uid: impl Into<String>,
        series_uid: impl Into<String>,
        sop_uid: impl Into<String>,
    ) -> Self {
        Self {
            study_uid: study_uid.into(),
            series_uid: series_uid.into(),
            sop_uid: sop_uid.into(),
        }
    }

    /// 从数据集中读取三个 UID，缺失任意一个都视为格式错误
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let uid = |tag, name: &str| {
            dataset
                .string(tag)
                .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| CoreError::Malformed(format!("缺少 {}", name)))
        };
        Ok(Self {
            study_uid: uid(tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?,
            series_uid: uid(tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?,
            sop_uid: uid(tags::SOP_INSTANCE_UID, "SOPInstanceUID")?,
        })
    }
}

impl fmt::Display for SopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.study_uid, self.series_uid, self.sop_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::Vr;

    #[test]
    fn test_from_dataset() {
        let mut ds = Dataset::new();
        ds.set_string(tags::STUDY_INSTANCE_UID, Vr::UI, "1.2.3\0");
        ds.set_string(tags::SERIES_INSTANCE_UID, Vr::UI, "1.2.3.4");
        ds.set_string(tags::SOP_INSTANCE_UID, Vr::UI, "1.2.3.4.5");

        let id = SopId::from_dataset(&ds).unwrap();
        assert_eq!(id, SopId::new("1.2.3", "1.2.3.4", "1.2.3.4.5"));
        assert_eq!(id.to_string(), "1.2.3/1.2.3.4/1.2.3.4.5");
    }

    #[test]
    fn test_missing_uid() {
        let mut ds = Dataset::new();
        ds.set_string(tags::STUDY_INSTANCE_UID, Vr::UI, "1.2.3");
        let err = SopId::from_dataset(&ds).unwrap_err();
        assert!(err.to_string().contains("SeriesInstanceUID"));
    }
}
