use clap::{Parser, Subcommand};
use static_wado::batch::BatchImporter;
use static_wado::config::Config;
use static_wado::error::{Result, WadoError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wado_core::JsonDatasetParser;
use wado_core::json::list_to_json;
use wado_storage::{MetadataAssembler, StudyData};

#[derive(Parser)]
#[command(name = "static-wado")]
#[command(about = "将 DICOM 数据集导入为去重的静态 DICOMweb 目录树")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径（默认读取当前目录的 config.toml）
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// 输出根目录（覆盖配置文件）
    #[arg(short = 'd', long, global = true)]
    root: Option<PathBuf>,

    /// 目标传输语法，简称或 UID（覆盖配置文件）
    #[arg(long, global = true)]
    tsuid: Option<String>,

    /// 需要重压缩的源编码简称，逗号分隔（覆盖配置文件）
    #[arg(long, global = true)]
    recompress: Option<String>,

    /// 不生成缩略图
    #[arg(long, global = true)]
    no_thumbnails: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 导入文件或目录（递归）
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// 从磁盘恢复研究并输出重建的实例元数据
    Metadata {
        study: String,
        /// 只输出指定 SOP 实例
        sop: Option<String>,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    // 初始化日志，RUST_LOG 优先
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli.command, config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(root) = &cli.root {
        config.storage.root_path = root.clone();
    }
    if let Some(tsuid) = &cli.tsuid {
        config.image.transfer_syntax = tsuid.clone();
    }
    if let Some(list) = &cli.recompress {
        config.image.recompress = list.clone();
    }
    if cli.no_thumbnails {
        config.image.thumbnails = false;
    }
    Ok(config)
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let ctx = config.store_context();
    match command {
        Commands::Import { paths } => {
            let converter = config.image_converter()?;
            info!(
                "导入 {} 个路径到 {:?}，目标编码 {}",
                paths.len(),
                config.storage.root_path,
                converter.destination()
            );
            let importer = BatchImporter::new(ctx, converter, Arc::new(JsonDatasetParser::new()));
            let report = tokio::task::spawn_blocking(move || importer.import(&paths))
                .await
                .map_err(|e| WadoError::Other(format!("导入任务异常退出: {}", e)))??;
            for study in &report.studies {
                println!("{}", study);
            }
            Ok(())
        }
        Commands::Metadata { study, sop } => {
            wado_storage::validate_uid("StudyInstanceUID", &study)?;
            let mut data = StudyData::open(study.as_str(), ctx)?;
            if data.is_empty() {
                return Err(WadoError::Other(format!("研究 {} 不存在", study)));
            }
            let keys: Vec<String> = match sop {
                Some(sop) => vec![sop],
                None => data.residues().map(|(hash, _)| hash.clone()).collect(),
            };
            let mut assembler = MetadataAssembler::new(&mut data);
            let mut instances = Vec::with_capacity(keys.len());
            for key in &keys {
                let metadata = assembler
                    .get_metadata(key)
                    .ok_or_else(|| WadoError::Other(format!("实例 {} 不存在", key)))?;
                instances.push(metadata);
            }
            let json = list_to_json(&instances)?;
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
    }
}
