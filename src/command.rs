use crate::event::Context;
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsArray, ValueObjectAccessAsScalar};

pub struct CommandMatch {
    /// 匹配后的参数列表（剩余的消息段）
    pub args: Vec<OwnedValue>,
}

impl CommandMatch {
    /// 拼接参数中所有文本段，去除首尾空白
    pub fn text(&self) -> String {
        let mut acc = String::new();
        for seg in &self.args {
            if seg.get_str("type") == Some("text")
                && let Some(t) = seg.get("data").and_then(|d| d.get_str("text"))
            {
                acc.push_str(t);
            }
        }
        acc.trim().to_string()
    }
}

pub fn get_prefixes(ctx: &Context) -> Vec<String> {
    match ctx.config.read() {
        Ok(guard) => guard.command_prefix.clone(),
        Err(_) => Vec::new(),
    }
}

/// 解析指令：自动过滤头部的 Reply/At/空白，匹配 [Prefix][Command]，返回参数。
/// 指令名之后必须是空白、文本结尾或其他消息段，避免 `gpt` 误吞 `gpt5`。
pub fn match_command(ctx: &Context, command_name: &str) -> Option<CommandMatch> {
    if command_name.is_empty() {
        return None;
    }

    let prefixes = get_prefixes(ctx);
    let msg_arr = ctx.as_message()?.0.get_array("message")?;

    for (i, segment) in msg_arr.iter().enumerate() {
        let type_ = segment.get_str("type")?;
        let data = segment.get("data")?;

        match type_ {
            "reply" | "at" => continue,
            "text" => {
                let trimmed_start = data.get_str("text").unwrap_or("").trim_start();
                if trimmed_start.is_empty() {
                    continue;
                }

                for prefix in &prefixes {
                    let target = format!("{}{}", prefix, command_name);
                    let Some(rest) = trimmed_start.strip_prefix(&target) else {
                        continue;
                    };
                    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                        continue;
                    }

                    let mut args = Vec::new();
                    let args_text = rest.trim_start();
                    if !args_text.is_empty() {
                        let mut new_seg = segment.clone();
                        new_seg["data"]["text"] = OwnedValue::from(args_text);
                        args.push(new_seg);
                    }
                    args.extend(msg_arr.iter().skip(i + 1).cloned());

                    return Some(CommandMatch { args });
                }
                // 第一个有效文本未匹配，视为匹配失败
                return None;
            }
            // 遇到其他类型（如图片）且未匹配到指令，停止
            _ => return None,
        }
    }

    None
}
