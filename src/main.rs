use anyhow::Result;
use panel_curation::utils::logging;
use panel_curation::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init(&logging::startup_level());

    // 加载配置
    let config = Config::load()?;

    // 初始化并运行应用
    let _stats = App::initialize(config).await?.run().await?;

    Ok(())
}
