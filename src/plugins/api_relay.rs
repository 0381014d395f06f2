//! 用户自定义的接口中转：天气、黄历、游戏战绩、绘图、OCR 等。
//!
//! 配置示例：
//!
//! ```toml
//! [[api_relay.endpoints]]
//! command = "天气"
//! name = "天气查询"
//! url = "https://example.com/api/weather"
//! query_key = "city"
//! reply = "json"
//! json_path = "/data/text"
//! usage_hint = "城市"
//! usage_example = "北京"
//! ```

use crate::adapters::onebot::LockedWriter;
use crate::config::build_config;
use crate::event::Context;
use crate::plugins::{PluginError, config_or_default};
use crate::relay::{self, Endpoint, ThinkMode};
use crate::{info, warn};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use toml::Value;

const PLUGIN_NAME: &str = "api_relay";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub enabled: bool,
    #[serde(default)]
    pub think: ThinkMode,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

pub fn default_config() -> Value {
    build_config(Config {
        enabled: true,
        think: ThinkMode::Keep,
        endpoints: Vec::new(),
    })
}

/// 启动时检查一遍配置，无效条目只告警不阻断
pub fn init(ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        let config = config_or_default::<Config>(&ctx, PLUGIN_NAME, default_config)
            .ok_or("api_relay 配置格式错误")?;

        let mut usable = 0;
        for ep in &config.endpoints {
            match ep.validate() {
                Ok(()) => usable += 1,
                Err(reason) => {
                    warn!(target: "ApiRelay", "指令 [{}] 配置无效: {}", ep.command, reason)
                }
            }
        }
        info!(target: "ApiRelay", "已加载 {}/{} 个自定义接口", usable, config.endpoints.len());
        Ok(())
    })
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        if ctx.as_message().is_none() {
            return Ok(Some(ctx));
        }

        let Some(config) = config_or_default::<Config>(&ctx, PLUGIN_NAME, default_config) else {
            return Ok(Some(ctx));
        };
        if config.endpoints.is_empty() {
            return Ok(Some(ctx));
        }

        relay::dispatch(ctx, writer, &config.endpoints, config.think, "ApiRelay").await
    })
}
