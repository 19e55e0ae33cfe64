use verifactu_server::{Config, Server, init_logger_with_file, print_banner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境变量 (.env 可选)
    dotenv::dotenv().ok();

    // 2. 加载配置
    let config = Config::from_env();
    config.ensure_work_dir_structure()?;

    // 3. 日志
    init_logger_with_file(
        &config.log_level,
        config.log_json,
        Some(config.log_dir().as_path()),
    )?;

    print_banner();
    tracing::info!(
        env = config.verifactu_env.as_str(),
        work_dir = %config.work_dir,
        "🧾 Verifactu server starting..."
    );
    if config.is_production() && !config.signing_required {
        tracing::warn!("Signing is optional in production; unsigned records will be accepted");
    }

    // 4. 启动 HTTP 服务器 (Server::run 会自动启动后台任务)
    let server = Server::new(config);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        return Err(anyhow::anyhow!(e.to_string()));
    }

    Ok(())
}
