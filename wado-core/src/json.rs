//! DICOM JSON 模型
//!
//! 元数据文件、查询结果和 JSON 数据集输入都使用这一编码：
//! 以 8 位十六进制标签为键，值对象包含 `vr` 以及 `Value`、
//! `BulkDataURI` 或 `InlineBinary` 之一。

use crate::bulk::BulkReference;
use crate::codec::{DatasetParser, ParsedDataset};
use crate::dataset::{Dataset, Element, ItemPath, Value};
use crate::error::{CoreError, Result};
use crate::tags::{self, Tag};
use crate::transfer;
use crate::vr::Vr;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value as Json, json};
use std::path::Path;

// ============================================================================
// 编码
// ============================================================================

/// 数据集 → JSON 对象
pub fn to_json(dataset: &Dataset) -> Result<Json> {
    let mut object = Map::new();
    for (tag, element) in dataset.iter() {
        object.insert(tags::to_key(tag), element_to_json(tag, element)?);
    }
    Ok(Json::Object(object))
}

/// 数据集列表 → JSON 数组
pub fn list_to_json(datasets: &[Dataset]) -> Result<Json> {
    datasets
        .iter()
        .map(to_json)
        .collect::<Result<Vec<_>>>()
        .map(Json::Array)
}

fn element_to_json(tag: Tag, element: &Element) -> Result<Json> {
    let vr = element.vr;
    let mut object = Map::new();
    object.insert("vr".into(), Json::String(vr.to_string()));

    match &element.value {
        Value::Empty => {}
        Value::Strings(values) => {
            let values = values.iter().map(|s| string_to_json(vr, s)).collect();
            object.insert("Value".into(), Json::Array(values));
        }
        Value::Ints(values) => {
            let values = values
                .iter()
                .map(|v| {
                    if vr == Vr::AT {
                        Json::String(tags::to_key(*v as Tag))
                    } else {
                        Json::Number(Number::from(*v))
                    }
                })
                .collect();
            object.insert("Value".into(), Json::Array(values));
        }
        Value::Floats(values) => {
            let values = values
                .iter()
                .map(|v| Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null))
                .collect();
            object.insert("Value".into(), Json::Array(values));
        }
        Value::Bytes(bytes) => {
            object.insert("InlineBinary".into(), Json::String(STANDARD.encode(bytes)));
        }
        Value::Sequence(items) => {
            let items = items.iter().map(to_json).collect::<Result<Vec<_>>>()?;
            object.insert("Value".into(), Json::Array(items));
        }
        Value::Bulk(bulk) => {
            object.insert("BulkDataURI".into(), Json::String(bulk.to_uri()));
        }
        Value::Encapsulated(_) => {
            return Err(CoreError::Malformed(format!(
                "封装像素数据无法编码为 JSON: {}",
                tags::to_key(tag)
            )));
        }
    }
    Ok(Json::Object(object))
}

fn string_to_json(vr: Vr, value: &str) -> Json {
    let trimmed = value.trim_end_matches(['\0', ' ']);
    match vr {
        Vr::PN => json!({ "Alphabetic": trimmed }),
        Vr::IS => trimmed
            .trim()
            .parse::<i64>()
            .map(|v| Json::Number(v.into()))
            .unwrap_or_else(|_| Json::String(trimmed.to_string())),
        Vr::DS => trimmed
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Json::Number)
            .unwrap_or_else(|| Json::String(trimmed.to_string())),
        _ => Json::String(trimmed.to_string()),
    }
}

// ============================================================================
// 解码
// ============================================================================

/// JSON 对象 → 数据集
pub fn from_json(json: &Json) -> Result<Dataset> {
    let object = json
        .as_object()
        .ok_or_else(|| CoreError::Malformed("数据集必须是 JSON 对象".into()))?;

    let mut dataset = Dataset::new();
    for (key, value) in object {
        let tag = tags::from_key(key)
            .ok_or_else(|| CoreError::Malformed(format!("无效的标签键: {}", key)))?;
        dataset.insert(tag, element_from_json(key, value)?);
    }
    Ok(dataset)
}

/// JSON 数组 → 数据集列表
pub fn list_from_json(json: &Json) -> Result<Vec<Dataset>> {
    json.as_array()
        .ok_or_else(|| CoreError::Malformed("期望 JSON 数组".into()))?
        .iter()
        .map(from_json)
        .collect()
}

fn element_from_json(key: &str, json: &Json) -> Result<Element> {
    let vr: Vr = json
        .get("vr")
        .and_then(Json::as_str)
        .ok_or_else(|| CoreError::Malformed(format!("{} 缺少 vr", key)))?
        .parse()
        .map_err(CoreError::Malformed)?;

    if let Some(uri) = json.get("BulkDataURI").and_then(Json::as_str) {
        return Ok(Element::new(vr, Value::Bulk(BulkReference::parse(uri)?)));
    }
    if let Some(encoded) = json.get("InlineBinary").and_then(Json::as_str) {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::Malformed(format!("{} InlineBinary 解码失败: {}", key, e)))?;
        return Ok(Element::new(vr, Value::Bytes(bytes)));
    }
    let Some(values) = json.get("Value").and_then(Json::as_array) else {
        return Ok(Element::new(vr, Value::Empty));
    };

    let value = match vr {
        Vr::SQ => Value::Sequence(values.iter().map(from_json).collect::<Result<_>>()?),
        Vr::AT => Value::Ints(
            values
                .iter()
                .map(|v| {
                    v.as_str()
                        .and_then(tags::from_key)
                        .map(i64::from)
                        .ok_or_else(|| CoreError::Malformed(format!("{} 的 AT 值无效", key)))
                })
                .collect::<Result<_>>()?,
        ),
        Vr::FL | Vr::FD => Value::Floats(
            values
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| CoreError::Malformed(format!("{} 的浮点值无效", key)))
                })
                .collect::<Result<_>>()?,
        ),
        _ if vr.binary_int_width().is_some() => Value::Ints(
            values
                .iter()
                .map(|v| {
                    v.as_i64()
                        .or_else(|| v.as_u64().map(|u| u as i64))
                        .ok_or_else(|| CoreError::Malformed(format!("{} 的整数值无效", key)))
                })
                .collect::<Result<_>>()?,
        ),
        _ => Value::Strings(values.iter().map(json_to_string).collect()),
    };
    Ok(Element::new(vr, value))
}

fn json_to_string(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Number(n) => n.to_string(),
        Json::Object(o) => o
            .get("Alphabetic")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// JSON 数据集解析器
// ============================================================================

/// 读取 DICOM JSON 文件（单个对象或只含一个对象的数组）的解析器
#[derive(Debug, Default, Clone)]
pub struct JsonDatasetParser;

impl JsonDatasetParser {
    pub fn new() -> Self {
        Self
    }
}

impl DatasetParser for JsonDatasetParser {
    fn parse(&self, bytes: &[u8], origin: Option<&Path>) -> Result<ParsedDataset> {
        let name = origin
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string());

        let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
        if !matches!(first, Some(b'{') | Some(b'[')) {
            return Err(CoreError::NotDicom(name));
        }
        let json: Json =
            serde_json::from_slice(bytes).map_err(|_| CoreError::NotDicom(name.clone()))?;

        let object = match &json {
            Json::Array(items) if items.len() == 1 => &items[0],
            Json::Array(_) => return Err(CoreError::NotDicom(name)),
            other => other,
        };
        let is_dataset = object
            .as_object()
            .is_some_and(|o| o.keys().all(|k| tags::from_key(k).is_some()));
        if !is_dataset {
            return Err(CoreError::NotDicom(name));
        }

        let mut dataset = from_json(object)?;
        if let Some(dir) = origin.and_then(Path::parent) {
            resolve_bulk_paths(&mut dataset, dir);
        }

        let transfer_syntax = dataset
            .string(tags::AVAILABLE_TRANSFER_SYNTAX_UID)
            .or_else(|| dataset.string(tags::TRANSFER_SYNTAX_UID))
            .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
            .unwrap_or_else(|| transfer::EXPLICIT_VR_LE.to_string());

        Ok(ParsedDataset {
            dataset,
            transfer_syntax,
        })
    }
}

/// 将相对 BulkData 路径解析为基于来源目录的绝对路径
fn resolve_bulk_paths(dataset: &mut Dataset, dir: &Path) {
    let relative: Vec<(ItemPath, Tag)> = dataset
        .walk()
        .filter_map(|visit| match visit.value {
            Value::Bulk(bulk) if !bulk.path.contains("://") && !Path::new(&bulk.path).is_absolute() => {
                Some((visit.path, visit.tag))
            }
            _ => None,
        })
        .collect();

    for (path, tag) in relative {
        if let Some(element) = dataset.element_at_mut(&path, tag)
            && let Value::Bulk(bulk) = &mut element.value
        {
            bulk.path = dir.join(&bulk.path).to_string_lossy().into_owned();
        }
    }
}
