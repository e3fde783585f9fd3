//! 核心存储原语
//!
//! 本模块包含与具体研究无关的底层能力：
//! - files: 原子写、gzip 透明读写、目录列举
//! - hasher: SHA-256 内容哈希与基数编码
//! - multipart: multipart/related 单部件封装与范围读取
//! - persist: 数据集列表的 JSON 持久化

pub mod files;
pub mod hasher;
pub mod multipart;
pub mod persist;

pub use files::{DirEntryInfo, FileStore, GZ_EXT};
pub use hasher::{content_hash, hash_dataset, hash_tokens};
