// Static WADO 库接口
// 用于测试和外部集成

pub mod association;
pub mod batch;
pub mod codecs;
pub mod config;
pub mod error;

// Re-export core types and storage
pub use wado_core;
pub use wado_storage;

pub use association::{AssociationRegistry, StoreStatus};
pub use batch::{BatchImporter, BatchReport};
pub use config::Config;
pub use error::{Result, WadoError};
