use crate::adapters::onebot::{LockedWriter, send_msg};
use crate::command::match_command;
use crate::config::build_config;
use crate::event::Context;
use crate::message::Message;
use crate::plugins::{PluginError, ai_chat, api_relay, config_or_default};
use crate::relay::Endpoint;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use toml::Value;

const PLUGIN_NAME: &str = "help";

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Config {
    enabled: bool,
    commands: Vec<String>,
}

pub fn default_config() -> Value {
    build_config(Config {
        enabled: true,
        commands: vec!["帮助".into(), "菜单".into()],
    })
}

fn plugin_enabled(ctx: &Context, name: &str) -> bool {
    ctx.config
        .read()
        .map(|c| c.plugin_enabled(name))
        .unwrap_or(false)
}

/// 收集已启用插件中的中转指令，按分组返回
fn collect_sections(ctx: &Context) -> Vec<(&'static str, Vec<Endpoint>)> {
    let mut sections = Vec::new();

    if plugin_enabled(ctx, "ai_chat")
        && let Some(cfg) =
            config_or_default::<ai_chat::Config>(ctx, "ai_chat", ai_chat::default_config)
    {
        sections.push(("AI 对话", cfg.endpoints));
    }
    if plugin_enabled(ctx, "api_relay")
        && let Some(cfg) =
            config_or_default::<api_relay::Config>(ctx, "api_relay", api_relay::default_config)
    {
        sections.push(("接口中转", cfg.endpoints));
    }
    sections
}

pub fn render_menu(sections: &[(&str, Vec<Endpoint>)]) -> String {
    let mut out = String::from("📖 可用指令");
    let mut listed = 0;

    for (title, endpoints) in sections {
        let enabled: Vec<&Endpoint> = endpoints.iter().filter(|e| e.enabled).collect();
        if enabled.is_empty() {
            continue;
        }
        out.push_str(&format!("\n\n【{}】", title));
        for ep in enabled {
            out.push_str(&format!("\n{} - {}", ep.command, ep.name));
            listed += 1;
        }
    }

    if listed == 0 {
        out.push_str("\n\n暂无可用指令");
    } else {
        out.push_str("\n\n发送指令但不带内容可查看用法");
    }
    out
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let Some(msg) = ctx.as_message() else {
            return Ok(Some(ctx));
        };

        let Some(config) = config_or_default::<Config>(&ctx, PLUGIN_NAME, default_config) else {
            return Ok(Some(ctx));
        };

        if !config.commands.iter().any(|c| match_command(&ctx, c).is_some()) {
            return Ok(Some(ctx));
        }

        let (group_id, user_id, message_id) = (msg.group_id(), msg.user_id(), msg.message_id());
        let menu = render_menu(&collect_sections(&ctx));

        send_msg(
            &ctx,
            writer,
            group_id,
            Some(user_id),
            Message::new().reply(message_id).text(menu),
        )
        .await?;
        Ok(None)
    })
}
