use crate::adapters::onebot::LockedWriter;
use crate::config::build_config;
use crate::event::Context;
use crate::plugins::{PluginError, config_or_default};
use crate::relay::{self, Endpoint, ThinkMode};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use toml::Value;

const PLUGIN_NAME: &str = "ai_chat";
const API_BASE: &str = "https://api.jkyai.top/API";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub enabled: bool,
    /// 推理段处理：keep / strip / fold
    #[serde(default)]
    pub think: ThinkMode,
    pub endpoints: Vec<Endpoint>,
}

fn jky(command: &str, name: &str, path: &str, timeout_secs: u64) -> Endpoint {
    Endpoint::new(command, name, &format!("{}/{}", API_BASE, path)).timeout_secs(timeout_secs)
}

/// 内置的 AI 对话接口
pub fn builtin_endpoints() -> Vec<Endpoint> {
    vec![
        jky("腾讯元宝", "腾讯元宝助手", "yuanbao.php", 30),
        jky("deep3.2", "DeepSeek-3.2助手", "depsek3.2.php", 60),
        jky("deep3.1", "DeepSeek-3.1助手", "depsek3.1.php", 60),
        jky("gpt5", "GPT5-nano助手", "gpt5-nano/index.php", 60).memory_key("uid"),
        jky("克劳德", "Claude4.5-hiku助手", "hiku-4.5/index.php", 60).memory_key("uid"),
        jky("通义千问", "通义千问助手", "qwen3-coder/index.php", 60).memory_key("uid"),
        jky("deepR1", "DeepSeek-R1助手", "deepseek.php", 120),
        jky("智谱", "智谱GLM4.6助手", "glm4.6.php", 60),
        jky("夸克", "夸克AI助手", "kkaimx.php", 60).query_key("content"),
        jky("蚂蚁", "蚂蚁AI助手", "ling-1t.php", 120),
        jky("豆包", "豆包AI助手", "doubao.php", 60),
        jky("gpt", "ChatGPT-ossAI助手", "chatgpt-oss/index.php", 60).memory_key("uid"),
        jky("谷歌", "谷歌Gemini-2.5AI助手", "gemini2.5/index.php", 60).memory_key("uid"),
        jky("阿里", "阿里AI助手", "qwen3.php", 60),
        jky("讯飞", "讯飞AI助手", "xfxhx1.php", 120).query_key("content"),
        jky("小米", "小米MiMo-V2助手", "xiaomi/index.php", 60).memory_key("uid"),
    ]
}

pub fn default_config() -> Value {
    build_config(Config {
        enabled: true,
        think: ThinkMode::Keep,
        endpoints: builtin_endpoints(),
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

        relay::dispatch(ctx, writer, &config.endpoints, config.think, "AiChat").await
    })
}
