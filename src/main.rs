use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relaycast::database::{import_seed, init_database, load_seed, SqliteStore};
use relaycast::{load_config, logger, Router};

#[derive(Parser)]
#[command(name = "relaycast")]
#[command(about = "Credential and egress route selection for an LLM reverse proxy", long_about = None)]
struct Cli {
    /// YAML 配置文件
    #[arg(short, long, default_value = "relaycast.yaml")]
    config: PathBuf,

    /// 启动前导入的种子文件
    #[arg(long)]
    seed: Option<PathBuf>,

    /// 覆盖配置中的日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 统计日志间隔（秒），0 表示关闭
    #[arg(long, default_value_t = 60)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config).map_err(anyhow::Error::msg)?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    logger::init(&config.logging);

    let db_path = config
        .resolve_database_path()
        .map_err(anyhow::Error::msg)?;
    let db = init_database(&db_path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("打开数据库 {db_path:?} 失败"))?;
    let store = Arc::new(SqliteStore::new(db, config.store_timeout()));
    tracing::info!("[Main] 数据库: {:?}", db_path);

    if let Some(seed_path) = &cli.seed {
        let seed = load_seed(seed_path).map_err(anyhow::Error::msg)?;
        let report = import_seed(store.as_ref(), &seed).await?;
        tracing::info!(
            "[Main] 种子导入: 新增 {} 条，跳过 {} 条",
            report.inserted,
            report.skipped
        );
    }

    let router = Router::init(store, config).await?;

    let stats_task = (cli.stats_interval > 0).then(|| {
        let router = router.clone();
        let period = Duration::from_secs(cli.stats_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let stats = router.stats().await;
                tracing::info!("[Stats] {}", stats.summary_line());
                match serde_json::to_string(&stats) {
                    Ok(json) => tracing::debug!("[Stats] {}", json),
                    Err(e) => tracing::warn!("[Stats] 序列化统计失败: {}", e),
                }
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("等待 Ctrl-C 信号失败")?;
    tracing::info!("[Main] 收到 Ctrl-C，正在退出");

    if let Some(task) = stats_task {
        task.abort();
    }
    router.shutdown().await;
    Ok(())
}
