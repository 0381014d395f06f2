use crate::adapters::onebot::{LockedWriter, send_frame_raw};
use crate::event::{Context, EventType};
use crate::{error, info};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::fs;
use toml::Value;

pub mod ai_chat;
pub mod api_relay;
pub mod help;
pub mod sleep_tracker;

pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

pub type PluginHandler =
    fn(Context, LockedWriter) -> BoxFuture<'static, Result<Option<Context>, PluginError>>;

pub type PluginInitHandler = fn(Context) -> BoxFuture<'static, Result<(), PluginError>>;

pub struct Plugin {
    pub name: &'static str,
    pub handler: PluginHandler,
    pub on_init: Option<PluginInitHandler>,
    pub default_config: fn() -> Value,
}

static PLUGINS: OnceLock<Vec<Plugin>> = OnceLock::new();

/// 获取全局插件列表 (顺序即流水线顺序)
pub fn get_plugins() -> &'static [Plugin] {
    PLUGINS.get_or_init(|| {
        vec![
            Plugin {
                name: "help",
                handler: help::handle,
                on_init: None,
                default_config: help::default_config,
            },
            Plugin {
                name: "sleep_tracker",
                handler: sleep_tracker::handle,
                on_init: Some(sleep_tracker::init),
                default_config: sleep_tracker::default_config,
            },
            Plugin {
                name: "ai_chat",
                handler: ai_chat::handle,
                on_init: None,
                default_config: ai_chat::default_config,
            },
            Plugin {
                name: "api_relay",
                handler: api_relay::handle,
                on_init: Some(api_relay::init),
                default_config: api_relay::default_config,
            },
        ]
    })
}

/// 所有插件的默认配置，用于补全配置文件
pub fn default_configs() -> Vec<(&'static str, Value)> {
    get_plugins()
        .iter()
        .map(|p| (p.name, (p.default_config)()))
        .collect()
}

fn enabled_plugins(ctx: &Context) -> Vec<&'static Plugin> {
    let Ok(guard) = ctx.config.read() else {
        return Vec::new();
    };
    get_plugins()
        .iter()
        .filter(|p| guard.plugin_enabled(p.name))
        .collect()
}

/// 执行所有已启用插件的初始化逻辑
pub async fn do_init(ctx: Context) -> Result<(), PluginError> {
    let enabled = enabled_plugins(&ctx);

    info!(
        target: "System",
        "正在加载插件系统 (已启用 {}/{})",
        enabled.len(),
        get_plugins().len()
    );

    for plugin in enabled {
        match plugin.on_init {
            Some(init_fn) => match init_fn(ctx.with_event(EventType::Init)).await {
                Ok(_) => info!(target: "Plugin", "✅ [{}] 就绪 (Init Success)", plugin.name),
                Err(e) => error!(target: "Plugin", "❌ [{}] 初始化失败: {}", plugin.name, e),
            },
            None => info!(target: "Plugin", "✅ [{}] 就绪", plugin.name),
        }
    }
    Ok(())
}

/// 运行插件流水线；插件返回 None 表示事件已被消费
pub async fn run(mut ctx: Context, writer: LockedWriter) -> Result<(), PluginError> {
    for plugin in enabled_plugins(&ctx) {
        match (plugin.handler)(ctx, writer.clone()).await? {
            Some(next_ctx) => ctx = next_ctx,
            None => return Ok(()),
        }
    }

    if let EventType::BeforeSend(packet) = ctx.event {
        let json_str = simd_json::to_string(&packet)?;
        send_frame_raw(writer, json_str).await?;
    }

    Ok(())
}

// ================= 工具函数 =================

/// 插件数据目录 `data/<plugin_name>/`，不存在时自动创建
pub async fn get_data_dir(plugin_name: &str) -> Result<PathBuf, PluginError> {
    let path = PathBuf::from("data").join(plugin_name);
    if !path.exists() {
        fs::create_dir_all(&path).await?;
    }
    Ok(path)
}

pub fn get_config<T>(ctx: &Context, plugin_name: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    let guard = ctx.config.read().ok()?;
    guard
        .plugins
        .get(plugin_name)
        .and_then(|v| T::deserialize(v.clone()).ok())
}

/// 读取插件配置，缺失或格式错误时回落到默认配置
pub fn config_or_default<T>(ctx: &Context, plugin_name: &str, default: fn() -> Value) -> Option<T>
where
    T: DeserializeOwned,
{
    get_config(ctx, plugin_name).or_else(|| T::deserialize(default()).ok())
}
