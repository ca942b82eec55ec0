use anyhow::Result;
use doc_quiz_parser::{App, Config};
use doc_quiz_parser::utils::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置（config.toml + 环境变量覆盖）
    let config = Config::load();

    // 初始化并运行应用
    App::initialize(config)?.run().await?;

    Ok(())
}
