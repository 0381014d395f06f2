mod adapters;
mod command;
mod config;
mod event;
mod log;
mod matcher;
mod message;
mod plugins;
mod relay;
mod scheduler;

use crate::config::AppConfig;
use crate::event::{Context, EventType};
use crate::matcher::Matcher;
use crate::scheduler::Scheduler;
use anyhow::anyhow;
use std::sync::{Arc, RwLock};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 加载配置，缺失的插件配置自动补齐
    let app_config = AppConfig::load_or_init(CONFIG_PATH, plugins::default_configs())
        .await
        .map_err(|e| anyhow!("加载配置失败: {}", e))?;
    log::set_debug(app_config.debug);

    let bots = app_config.bots.clone();
    let config = Arc::new(RwLock::new(app_config));
    let scheduler = Arc::new(Scheduler::new());

    // 2. 插件初始化
    let init_ctx = Context {
        event: EventType::Init,
        config: config.clone(),
        scheduler: scheduler.clone(),
        matcher: Arc::new(Matcher::new()),
    };
    plugins::do_init(init_ctx)
        .await
        .map_err(|e| anyhow!("插件初始化失败: {}", e))?;

    // 3. 启动所有启用的 Bot
    let mut started = 0;
    for bot in bots.into_iter().filter(|b| b.enabled) {
        let Some(adapter) = adapters::find_adapter(&bot.protocol) else {
            warn!(target: "System", "未知协议 [{}]，已跳过", bot.protocol);
            continue;
        };
        let fut = (adapter.handler)(bot, config.clone(), scheduler.clone());
        tokio::spawn(fut);
        started += 1;
    }

    if started == 0 {
        warn!(target: "System", "没有启用任何 Bot，请检查 {} 中的 bots 配置", CONFIG_PATH);
    }
    info!(target: "System", "已启动 {} 个 Bot，按 Ctrl+C 退出", started);

    tokio::signal::ctrl_c().await?;
    info!(target: "System", "收到退出信号，正在关闭...");
    scheduler.shutdown();
    Ok(())
}
