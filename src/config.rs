use crate::association::AssociationRegistry;
use crate::codecs::{JpegFrameDecoderFactory, JpegFrameEncoder};
use crate::error::{Result, WadoError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use wado_core::transfer;
use wado_storage::{DEFAULT_RECOMPRESS, ImageConverter, StoreContext, TagProfile};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub image: ImageConfig,
    /// 网络接收配置
    #[serde(default)]
    pub scp: ScpConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root_path: PathBuf,
    /// 查询结果和元数据是否 gzip
    #[serde(default = "StorageConfig::default_gzip_json")]
    pub gzip_json: bool,
}

impl StorageConfig {
    fn default_gzip_json() -> bool {
        true
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("./dicomweb"),
            gzip_json: Self::default_gzip_json(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// 目标传输语法，简称或 UID
    pub transfer_syntax: String,
    /// 需要重压缩的源编码简称，逗号分隔
    #[serde(default = "ImageConfig::default_recompress")]
    pub recompress: String,
    #[serde(default = "ImageConfig::default_thumbnails")]
    pub thumbnails: bool,
}

impl ImageConfig {
    fn default_recompress() -> String {
        DEFAULT_RECOMPRESS.to_string()
    }
    fn default_thumbnails() -> bool {
        true
    }

    /// 解析后的目标传输语法 UID
    pub fn destination(&self) -> Result<&'static str> {
        transfer::from_name(&self.transfer_syntax).ok_or_else(|| {
            WadoError::Config(format!("未知的传输语法: {}", self.transfer_syntax))
        })
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            transfer_syntax: transfer::IMPLICIT_VR_LE.to_string(),
            recompress: Self::default_recompress(),
            thumbnails: Self::default_thumbnails(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScpConfig {
    pub ae_title: String,
    pub port: u16,
    /// 同时打开的关联上限
    pub max_associations: usize,
}

impl Default for ScpConfig {
    fn default() -> Self {
        Self {
            ae_title: "STATICWADO".to_string(),
            port: 11112,
            max_associations: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| WadoError::Config(format!("无法读取配置文件: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| WadoError::Config(format!("配置文件解析失败: {}", e)))?;
        Ok(config)
    }

    /// 读取 `config.toml`（不存在时用默认值），再应用环境变量覆盖
    pub fn load() -> Self {
        let mut config = Self::from_file("config.toml").unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    /// 读取指定配置文件，再应用环境变量覆盖
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// 应用环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("WADO_ROOT") {
            self.storage.root_path = PathBuf::from(root);
        }
        if let Ok(tsuid) = std::env::var("WADO_TRANSFER_SYNTAX") {
            self.image.transfer_syntax = tsuid;
        }
        if let Ok(list) = std::env::var("WADO_RECOMPRESS") {
            self.image.recompress = list;
        }
        if let Ok(enable) = std::env::var("WADO_THUMBNAILS") {
            self.image.thumbnails = enable.to_lowercase() == "true" || enable == "1";
        }
        if let Ok(v) = std::env::var("WADO_SCP_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.scp.port = port;
        }
        if let Ok(level) = std::env::var("WADO_LOG_LEVEL") {
            self.log.level = level;
        }
    }

    // ========================================================================
    // 组件构造
    // ========================================================================

    /// 存储上下文
    pub fn store_context(&self) -> Arc<StoreContext> {
        Arc::new(
            StoreContext::new(&self.storage.root_path, Arc::new(TagProfile::standard()))
                .with_gzip_json(self.storage.gzip_json),
        )
    }

    /// 按图像配置构造转换器，目标编码不可用时立即失败
    pub fn image_converter(&self) -> Result<Arc<ImageConverter>> {
        let converter = ImageConverter::new(self.image.destination()?, &self.image.recompress)
            .with_encoder(Box::new(JpegFrameEncoder::new()))
            .with_decoder(Arc::new(JpegFrameDecoderFactory))
            .with_thumbnails(self.image.thumbnails);
        converter.validate()?;
        Ok(Arc::new(converter))
    }

    /// 网络接收端使用的关联注册表
    pub fn association_registry(&self) -> Result<AssociationRegistry> {
        let registry = AssociationRegistry::new(
            self.store_context(),
            self.image_converter()?,
            self.scp.max_associations,
        );
        info!(
            "关联注册表就绪: {}@{}，上限 {}",
            self.scp.ae_title, self.scp.port, self.scp.max_associations
        );
        Ok(registry)
    }
}
