use clap::Parser;
use savesync_lib::config::{self, expand_home, AppConfig, Credentials, StorageConfig, SyncUri};
use savesync_lib::core::{ScanConfig, SyncConfig, SyncEngine, SyncMode};
use savesync_lib::error::ConfigError;
use savesync_lib::logging::{init_logging, log_dir};
use savesync_lib::storage::create_storage;
use std::path::Path;
use std::process::ExitCode;

/// 把目录同步到 S3 或另一个目录，再同步回来
#[derive(Debug, Parser)]
#[command(name = "savesync", version, about)]
struct Cli {
    /// 本地同步目录（也可以是单个文件）
    #[arg(short, long)]
    directory: String,

    /// 远端地址: file://<path> 或 s3://<bucket>/<prefix>
    #[arg(short, long)]
    backup_uri: String,

    /// S3 access key id
    #[arg(long, env = "SAVESYNC_ACCESS_KEY")]
    access_key: Option<String>,

    /// S3 secret access key
    #[arg(long, env = "SAVESYNC_ACCESS_SECRET", hide_env_values = true)]
    access_secret: Option<String>,

    /// S3 region（默认取 config.json）
    #[arg(long)]
    region: Option<String>,

    /// S3 兼容服务的 endpoint
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(short, long, value_enum, default_value_t = SyncMode::Sync)]
    mode: SyncMode,

    /// 排除规则，可重复（如 `*.tmp`、`cache/**`）
    #[arg(short, long = "exclude")]
    exclude: Vec<String>,

    /// 以 JSON 输出同步报告
    #[arg(long)]
    json: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn storage_config(&self, app: &AppConfig) -> Result<StorageConfig, ConfigError> {
        let uri: SyncUri = self.backup_uri.parse()?;

        let mut s3 = app.s3.clone();
        if let Some(region) = &self.region {
            s3.region = region.clone();
        }
        if self.endpoint.is_some() {
            s3.endpoint = self.endpoint.clone();
        }

        let credentials = Credentials::from_parts(self.access_key.clone(), self.access_secret.clone());
        StorageConfig::new(expand_home(&self.directory), uri, credentials, &s3)
    }
}

/// 读取 config.json 并校验参数，通过后才打开日志文件
fn prepare(cli: &Cli, config_dir: &Path) -> Result<StorageConfig, ConfigError> {
    let app = AppConfig::load(config_dir);
    let storage_config = cli.storage_config(&app)?;
    init_logging(&app.log, &log_dir(config_dir), cli.verbose);
    Ok(storage_config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let storage_config = match prepare(&cli, &config::config_dir()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("配置错误: {}", e);
            return ExitCode::from(2);
        }
    };

    let result = async {
        let storage = create_storage(&storage_config).await?;
        let engine = SyncEngine::with_config(
            storage,
            SyncConfig {
                scan_config: ScanConfig {
                    exclude_patterns: cli.exclude.clone(),
                },
            },
        );
        engine.run(cli.mode).await
    }
    .await;

    match result {
        Ok(report) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("无法输出报告: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{} 失败: {:#}", cli.mode, e);
            eprintln!("同步失败: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
