//! 传输语法标识

pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
pub const JPEG_EXTENDED: &str = "1.2.840.10008.1.2.4.51";
pub const JPEG_LOSSLESS: &str = "1.2.840.10008.1.2.4.57";
pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";
pub const JPEG_LS_LOSSLESS: &str = "1.2.840.10008.1.2.4.80";
pub const JPEG_LS_NEAR_LOSSLESS: &str = "1.2.840.10008.1.2.4.81";
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
pub const JPEG_2000: &str = "1.2.840.10008.1.2.4.91";
pub const MPEG2_MAIN: &str = "1.2.840.10008.1.2.4.100";
pub const MPEG2_HIGH: &str = "1.2.840.10008.1.2.4.101";
pub const MPEG4_HP41: &str = "1.2.840.10008.1.2.4.102";
pub const MPEG4_HP41_BD: &str = "1.2.840.10008.1.2.4.103";
pub const HEVC_MAIN: &str = "1.2.840.10008.1.2.4.107";
pub const HEVC_MAIN10: &str = "1.2.840.10008.1.2.4.108";
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";

/// 未压缩的传输语法（像素按原始字节存放）
pub fn is_uncompressed(tsuid: &str) -> bool {
    matches!(
        tsuid,
        IMPLICIT_VR_LE | EXPLICIT_VR_LE | DEFLATED_EXPLICIT_VR_LE | EXPLICIT_VR_BE
    )
}

/// 视频编码的传输语法
pub fn is_video(tsuid: &str) -> bool {
    matches!(
        tsuid,
        MPEG2_MAIN | MPEG2_HIGH | MPEG4_HP41 | MPEG4_HP41_BD | HEVC_MAIN | HEVC_MAIN10
    )
}

/// 每帧码流开头的标记，无固定标记的编码返回 `None`
pub fn frame_start_marker(tsuid: &str) -> Option<&'static [u8]> {
    match tsuid {
        JPEG_BASELINE | JPEG_EXTENDED | JPEG_LOSSLESS | JPEG_LOSSLESS_SV1 | JPEG_LS_LOSSLESS
        | JPEG_LS_NEAR_LOSSLESS => Some(&[0xFF, 0xD8]),
        JPEG_2000_LOSSLESS | JPEG_2000 => Some(&[0xFF, 0x4F]),
        _ => None,
    }
}

/// 封装片段是否恰好一帧一个
///
/// 片段数与帧数一致，并且每个片段都以该编码的帧起始标记开头。
pub fn fragments_are_frames(tsuid: &str, fragments: &[Vec<u8>], frames: usize) -> bool {
    if fragments.len() != frames {
        return false;
    }
    match frame_start_marker(tsuid) {
        Some(marker) => fragments.iter().all(|f| f.starts_with(marker)),
        None => true,
    }
}

/// 简称 → 传输语法，也接受完整 UID
pub fn from_name(name: &str) -> Option<&'static str> {
    let tsuid = match name.trim().to_ascii_lowercase().as_str() {
        "lei" | "implicit" => IMPLICIT_VR_LE,
        "lee" | "explicit" => EXPLICIT_VR_LE,
        "jpeg" | "jpg" => JPEG_BASELINE,
        "jll" | "jpeglossless" => JPEG_LOSSLESS_SV1,
        "jls" | "jpegls" => JPEG_LS_LOSSLESS,
        "j2k" | "jp2" => JPEG_2000_LOSSLESS,
        "rle" => RLE_LOSSLESS,
        other => return ALL.iter().copied().find(|uid| *uid == other),
    };
    Some(tsuid)
}

/// 传输语法 → 简称，用于重压缩列表匹配
pub fn simple_name(tsuid: &str) -> Option<&'static str> {
    let name = match tsuid {
        IMPLICIT_VR_LE | EXPLICIT_VR_LE | EXPLICIT_VR_BE | DEFLATED_EXPLICIT_VR_LE => "lei",
        JPEG_BASELINE | JPEG_EXTENDED => "jpeg",
        JPEG_LOSSLESS | JPEG_LOSSLESS_SV1 => "jll",
        JPEG_LS_LOSSLESS | JPEG_LS_NEAR_LOSSLESS => "jls",
        JPEG_2000_LOSSLESS | JPEG_2000 => "j2k",
        _ => return None,
    };
    Some(name)
}

const ALL: &[&str] = &[
    IMPLICIT_VR_LE,
    EXPLICIT_VR_LE,
    DEFLATED_EXPLICIT_VR_LE,
    EXPLICIT_VR_BE,
    JPEG_BASELINE,
    JPEG_EXTENDED,
    JPEG_LOSSLESS,
    JPEG_LOSSLESS_SV1,
    JPEG_LS_LOSSLESS,
    JPEG_LS_NEAR_LOSSLESS,
    JPEG_2000_LOSSLESS,
    JPEG_2000,
    MPEG2_MAIN,
    MPEG2_HIGH,
    MPEG4_HP41,
    MPEG4_HP41_BD,
    HEVC_MAIN,
    HEVC_MAIN10,
    RLE_LOSSLESS,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(from_name("j2k"), Some(JPEG_2000_LOSSLESS));
        assert_eq!(from_name("LEI"), Some(IMPLICIT_VR_LE));
        assert_eq!(from_name(JPEG_BASELINE), Some(JPEG_BASELINE));
        assert_eq!(from_name("1.2.3"), None);
        assert_eq!(simple_name(EXPLICIT_VR_LE), Some("lei"));
        assert_eq!(simple_name(MPEG2_MAIN), None);
    }

    #[test]
    fn test_classification() {
        assert!(is_uncompressed(EXPLICIT_VR_LE));
        assert!(!is_uncompressed(JPEG_BASELINE));
        assert!(is_video(HEVC_MAIN));
        assert!(!is_video(RLE_LOSSLESS));
    }

    #[test]
    fn test_fragments_are_frames() {
        let a = vec![0xFF, 0xD8, 1, 0xFF, 0xD9];
        let b = vec![0xFF, 0xD8, 2, 0xFF, 0xD9];
        assert!(fragments_are_frames(JPEG_BASELINE, &[a.clone(), b.clone()], 2));
        assert!(!fragments_are_frames(JPEG_BASELINE, &[a.clone(), b.clone()], 3));

        // 片段数与帧数相同但第二片不是帧开头
        let split = vec![a[..2].to_vec(), [&a[2..], &b[..]].concat()];
        assert!(!fragments_are_frames(JPEG_BASELINE, &split, 2));
        assert!(!fragments_are_frames(JPEG_2000, &[a], 1));
        assert!(fragments_are_frames(RLE_LOSSLESS, &[vec![0, 1]], 1));
    }
}
