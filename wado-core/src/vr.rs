//! 值表示（Value Representation）

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// DICOM 值表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Vr {
    AE,
    AS,
    AT,
    CS,
    DA,
    DS,
    DT,
    FD,
    FL,
    IS,
    LO,
    LT,
    OB,
    OD,
    OF,
    OL,
    OV,
    OW,
    PN,
    SH,
    SL,
    SQ,
    SS,
    ST,
    SV,
    TM,
    UC,
    UI,
    UL,
    UN,
    UR,
    US,
    UT,
    UV,
}

impl Vr {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vr::AE => "AE",
            Vr::AS => "AS",
            Vr::AT => "AT",
            Vr::CS => "CS",
            Vr::DA => "DA",
            Vr::DS => "DS",
            Vr::DT => "DT",
            Vr::FD => "FD",
            Vr::FL => "FL",
            Vr::IS => "IS",
            Vr::LO => "LO",
            Vr::LT => "LT",
            Vr::OB => "OB",
            Vr::OD => "OD",
            Vr::OF => "OF",
            Vr::OL => "OL",
            Vr::OV => "OV",
            Vr::OW => "OW",
            Vr::PN => "PN",
            Vr::SH => "SH",
            Vr::SL => "SL",
            Vr::SQ => "SQ",
            Vr::SS => "SS",
            Vr::ST => "ST",
            Vr::SV => "SV",
            Vr::TM => "TM",
            Vr::UC => "UC",
            Vr::UI => "UI",
            Vr::UL => "UL",
            Vr::UN => "UN",
            Vr::UR => "UR",
            Vr::US => "US",
            Vr::UT => "UT",
            Vr::UV => "UV",
        }
    }

    /// 二进制整数类型及其字节宽度
    pub fn binary_int_width(&self) -> Option<usize> {
        match self {
            Vr::SS | Vr::US => Some(2),
            Vr::SL | Vr::UL | Vr::AT => Some(4),
            Vr::SV | Vr::UV => Some(8),
            _ => None,
        }
    }

    /// 以文本形式存储数值的类型（IS/DS）
    pub fn is_numeric_string(&self) -> bool {
        matches!(self, Vr::IS | Vr::DS)
    }

    /// 以数值形式编码到 JSON 的类型
    pub fn is_json_number(&self) -> bool {
        self.is_numeric_string()
            || self.binary_int_width().is_some() && *self != Vr::AT
            || matches!(self, Vr::FL | Vr::FD)
    }

    /// 二进制块数据类型
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Vr::OB | Vr::OD | Vr::OF | Vr::OL | Vr::OV | Vr::OW | Vr::UN
        )
    }

    /// UI 值使用 NUL 补齐，其他字符串类型使用空格
    pub fn padding(&self) -> u8 {
        match self {
            Vr::UI => 0,
            _ if self.is_binary() => 0,
            _ => b' ',
        }
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Vr> for String {
    fn from(vr: Vr) -> Self {
        vr.as_str().to_string()
    }
}

impl FromStr for Vr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vr = match s {
            "AE" => Vr::AE,
            "AS" => Vr::AS,
            "AT" => Vr::AT,
            "CS" => Vr::CS,
            "DA" => Vr::DA,
            "DS" => Vr::DS,
            "DT" => Vr::DT,
            "FD" => Vr::FD,
            "FL" => Vr::FL,
            "IS" => Vr::IS,
            "LO" => Vr::LO,
            "LT" => Vr::LT,
            "OB" => Vr::OB,
            "OD" => Vr::OD,
            "OF" => Vr::OF,
            "OL" => Vr::OL,
            "OV" => Vr::OV,
            "OW" => Vr::OW,
            "PN" => Vr::PN,
            "SH" => Vr::SH,
            "SL" => Vr::SL,
            "SQ" => Vr::SQ,
            "SS" => Vr::SS,
            "ST" => Vr::ST,
            "SV" => Vr::SV,
            "TM" => Vr::TM,
            "UC" => Vr::UC,
            "UI" => Vr::UI,
            "UL" => Vr::UL,
            "UN" => Vr::UN,
            "UR" => Vr::UR,
            "US" => Vr::US,
            "UT" => Vr::UT,
            "UV" => Vr::UV,
            other => return Err(format!("未知的 VR: {}", other)),
        };
        Ok(vr)
    }
}

impl TryFrom<String> for Vr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("UI".parse::<Vr>().unwrap(), Vr::UI);
        assert_eq!(Vr::SQ.to_string(), "SQ");
        assert!("XX".parse::<Vr>().is_err());
    }

    #[test]
    fn test_classification() {
        assert_eq!(Vr::US.binary_int_width(), Some(2));
        assert!(Vr::IS.is_json_number());
        assert!(Vr::FD.is_json_number());
        assert!(!Vr::AT.is_json_number());
        assert!(!Vr::CS.is_json_number());
        assert!(Vr::OB.is_binary());
        assert_eq!(Vr::UI.padding(), 0);
        assert_eq!(Vr::LO.padding(), b' ');
    }
}
