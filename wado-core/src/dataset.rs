//! 数据集模型
//!
//! 数据集是 标签 → (VR, 值) 的有序映射，值可以是字符串、数值、
//! 嵌套序列或 BulkData 引用。底层使用 `BTreeMap`，遍历顺序恒为标签升序，
//! 因而规范编码与插入顺序无关。

use crate::bulk::BulkReference;
use crate::tags::{self, Tag};
use crate::vr::Vr;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::io::{self, Write};

/// 元素值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Strings(Vec<String>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bytes(Vec<u8>),
    Sequence(Vec<Dataset>),
    Bulk(BulkReference),
    /// 封装像素数据的片段，不含基本偏移表
    Encapsulated(Vec<Vec<u8>>),
}

impl Value {
    pub fn first_string(&self) -> Option<&str> {
        match self {
            Value::Strings(values) => values.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn first_int(&self) -> Option<i64> {
        match self {
            Value::Ints(values) => values.first().copied(),
            Value::Floats(values) => values.first().map(|v| *v as i64),
            Value::Strings(values) => values.first().and_then(|v| v.trim().parse().ok()),
            _ => None,
        }
    }

    pub fn first_float(&self) -> Option<f64> {
        match self {
            Value::Floats(values) => values.first().copied(),
            Value::Ints(values) => values.first().map(|v| *v as f64),
            Value::Strings(values) => values.first().and_then(|v| v.trim().parse().ok()),
            _ => None,
        }
    }
}

/// 数据元素
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub vr: Vr,
    pub value: Value,
}

impl Element {
    pub fn new(vr: Vr, value: Value) -> Self {
        Self { vr, value }
    }
}

/// 序列条目路径：从根开始依次经过的 (序列标签, 条目下标)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ItemPath(Vec<(Tag, usize)>);

impl ItemPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[(Tag, usize)] {
        &self.0
    }

    pub fn child(&self, tag: Tag, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push((tag, index));
        Self(segments)
    }
}

/// 遍历时访问到的一个元素
#[derive(Debug, Clone)]
pub struct Visit<'a> {
    pub path: ItemPath,
    pub tag: Tag,
    pub vr: Vr,
    pub value: &'a Value,
}

/// DICOM 数据集
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    elements: BTreeMap<Tag, Element>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    pub fn get(&self, tag: Tag) -> Option<&Element> {
        self.elements.get(&tag)
    }

    pub fn get_mut(&mut self, tag: Tag) -> Option<&mut Element> {
        self.elements.get_mut(&tag)
    }

    pub fn put(&mut self, tag: Tag, vr: Vr, value: Value) {
        self.elements.insert(tag, Element::new(vr, value));
    }

    pub fn insert(&mut self, tag: Tag, element: Element) {
        self.elements.insert(tag, element);
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Element> {
        self.elements.remove(&tag)
    }

    /// 标签升序迭代
    pub fn iter(&self) -> impl Iterator<Item = (Tag, &Element)> {
        self.elements.iter().map(|(tag, element)| (*tag, element))
    }

    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.elements.keys().copied()
    }

    // ========================================================================
    // 取值 / 赋值
    // ========================================================================

    pub fn string(&self, tag: Tag) -> Option<&str> {
        self.get(tag).and_then(|e| e.value.first_string())
    }

    pub fn strings(&self, tag: Tag) -> Option<&[String]> {
        match &self.get(tag)?.value {
            Value::Strings(values) => Some(values),
            _ => None,
        }
    }

    pub fn int(&self, tag: Tag) -> Option<i64> {
        self.get(tag).and_then(|e| e.value.first_int())
    }

    pub fn float(&self, tag: Tag) -> Option<f64> {
        self.get(tag).and_then(|e| e.value.first_float())
    }

    pub fn bulk(&self, tag: Tag) -> Option<&BulkReference> {
        match &self.get(tag)?.value {
            Value::Bulk(bulk) => Some(bulk),
            _ => None,
        }
    }

    pub fn set_string(&mut self, tag: Tag, vr: Vr, value: impl Into<String>) {
        self.put(tag, vr, Value::Strings(vec![value.into()]));
    }

    pub fn set_strings(&mut self, tag: Tag, vr: Vr, values: Vec<String>) {
        self.put(tag, vr, Value::Strings(values));
    }

    pub fn set_int(&mut self, tag: Tag, vr: Vr, value: i64) {
        self.put(tag, vr, Value::Ints(vec![value]));
    }

    pub fn set_bulk(&mut self, tag: Tag, vr: Vr, bulk: BulkReference) {
        self.put(tag, vr, Value::Bulk(bulk));
    }

    // ========================================================================
    // 子集操作
    // ========================================================================

    /// 复制给定标签组成新数据集，缺失的标签忽略
    pub fn select(&self, tags: &[Tag]) -> Dataset {
        let elements = tags
            .iter()
            .filter_map(|tag| self.elements.get(tag).map(|e| (*tag, e.clone())))
            .collect();
        Dataset { elements }
    }

    /// 原地删除给定标签
    pub fn remove_all(&mut self, tags: &[Tag]) {
        for tag in tags {
            self.elements.remove(tag);
        }
    }

    /// 删除满足条件的顶层元素
    pub fn retain(&mut self, mut keep: impl FnMut(Tag, &Element) -> bool) {
        self.elements.retain(|tag, element| keep(*tag, element));
    }

    /// 合并另一个数据集的全部元素，同标签以 `other` 为准
    pub fn merge(&mut self, other: &Dataset) {
        for (tag, element) in &other.elements {
            self.elements.insert(*tag, element.clone());
        }
    }

    // ========================================================================
    // 遍历
    // ========================================================================

    /// 深度优先遍历全部元素（含嵌套序列条目），序列元素先于其条目产出
    pub fn walk(&self) -> Walker<'_> {
        Walker {
            stack: vec![(ItemPath::root(), self.elements.iter())],
        }
    }

    /// 定位路径上的嵌套数据集
    pub fn item_mut(&mut self, path: &ItemPath) -> Option<&mut Dataset> {
        let mut current = self;
        for (tag, index) in path.segments() {
            current = match &mut current.elements.get_mut(tag)?.value {
                Value::Sequence(items) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// 按路径获取可变元素
    pub fn element_at_mut(&mut self, path: &ItemPath, tag: Tag) -> Option<&mut Element> {
        self.item_mut(path)?.get_mut(tag)
    }

    // ========================================================================
    // 规范编码
    // ========================================================================

    /// 以隐式 VR 小端格式写出规范字节流，用于内容哈希
    pub fn write_canonical<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for (tag, element) in &self.elements {
            write_tag(w, *tag)?;
            match &element.value {
                Value::Sequence(items) => {
                    w.write_all(&u32::MAX.to_le_bytes())?;
                    for item in items {
                        write_tag(w, tags::ITEM)?;
                        w.write_all(&u32::MAX.to_le_bytes())?;
                        item.write_canonical(w)?;
                        write_tag(w, tags::ITEM_DELIMITATION)?;
                        w.write_all(&0u32.to_le_bytes())?;
                    }
                    write_tag(w, tags::SEQUENCE_DELIMITATION)?;
                    w.write_all(&0u32.to_le_bytes())?;
                }
                value => {
                    let mut bytes = encode_value(element.vr, value);
                    if bytes.len() % 2 == 1 {
                        bytes.push(element.vr.padding());
                    }
                    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
                    w.write_all(&bytes)?;
                }
            }
        }
        Ok(())
    }

    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // 写入 Vec 不会失败
        let _ = self.write_canonical(&mut buf);
        buf
    }
}

impl FromIterator<(Tag, Element)> for Dataset {
    fn from_iter<I: IntoIterator<Item = (Tag, Element)>>(iter: I) -> Self {
        Dataset {
            elements: iter.into_iter().collect(),
        }
    }
}

fn write_tag<W: Write>(w: &mut W, tag: Tag) -> io::Result<()> {
    w.write_all(&tags::group(tag).to_le_bytes())?;
    w.write_all(&tags::element(tag).to_le_bytes())
}

fn encode_value(vr: Vr, value: &Value) -> Vec<u8> {
    match value {
        Value::Empty | Value::Sequence(_) => Vec::new(),
        Value::Strings(values) => values.join("\\").into_bytes(),
        Value::Ints(values) => match vr.binary_int_width() {
            Some(width) => {
                let mut out = Vec::with_capacity(values.len() * width);
                for v in values {
                    match (vr, width) {
                        (Vr::AT, _) => {
                            let tag = *v as u32;
                            out.extend_from_slice(&tags::group(tag).to_le_bytes());
                            out.extend_from_slice(&tags::element(tag).to_le_bytes());
                        }
                        (_, 2) => out.extend_from_slice(&(*v as u16).to_le_bytes()),
                        (_, 4) => out.extend_from_slice(&(*v as u32).to_le_bytes()),
                        _ => out.extend_from_slice(&v.to_le_bytes()),
                    }
                }
                out
            }
            None => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("\\")
                .into_bytes(),
        },
        Value::Floats(values) => match vr {
            Vr::FL => values
                .iter()
                .flat_map(|v| (*v as f32).to_le_bytes())
                .collect(),
            Vr::FD => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            _ => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("\\")
                .into_bytes(),
        },
        Value::Bytes(bytes) => bytes.clone(),
        Value::Bulk(bulk) => bulk.to_uri().into_bytes(),
        Value::Encapsulated(fragments) => {
            let mut out = Vec::new();
            for fragment in fragments {
                out.extend_from_slice(&tags::group(tags::ITEM).to_le_bytes());
                out.extend_from_slice(&tags::element(tags::ITEM).to_le_bytes());
                out.extend_from_slice(&(fragment.len() as u32).to_le_bytes());
                out.extend_from_slice(fragment);
            }
            out
        }
    }
}

/// 深度优先遍历器，惰性产出，遍历结束后不可重启
pub struct Walker<'a> {
    stack: Vec<(ItemPath, btree_map::Iter<'a, Tag, Element>)>,
}

impl<'a> Iterator for Walker<'a> {
    type Item = Visit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (path, iter) = self.stack.last_mut()?;
            let Some((tag, element)) = iter.next() else {
                self.stack.pop();
                continue;
            };
            let path = path.clone();
            if let Value::Sequence(items) = &element.value {
                for (index, item) in items.iter().enumerate().rev() {
                    self.stack
                        .push((path.child(*tag, index), item.elements.iter()));
                }
            }
            return Some(Visit {
                path,
                tag: *tag,
                vr: element.vr,
                value: &element.value,
            });
        }
    }
}
