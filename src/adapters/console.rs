use crate::adapters::onebot::{LockedWriter, process_frame};
use crate::config::{AppConfig, BotConfig};
use crate::matcher::Matcher;
use crate::message::Message;
use crate::scheduler::Scheduler;
use crate::{info, warn};
use futures_util::Sink;
use futures_util::future::BoxFuture;
use serde::Serialize;
use simd_json::prelude::*;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

const CONSOLE_USER_ID: i64 = 1;

#[derive(Serialize)]
struct MockSender {
    user_id: i64,
    nickname: String,
    card: String,
}

#[derive(Serialize)]
struct MockMessageEvent {
    post_type: &'static str,
    message_type: &'static str,
    time: i64,
    self_id: i64,
    sub_type: &'static str,
    user_id: i64,
    message_id: i64,
    sender: MockSender,
    raw_message: String,
    message: Message,
}

/// 控制台适配器入口：每行输入视为用户 1 的私聊消息
pub fn entry(
    _bot_config: BotConfig,
    global_config: Arc<RwLock<AppConfig>>,
    scheduler: Arc<Scheduler>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        info!(target: "Console", "已启动控制台模式。请输入指令 (例如: 腾讯元宝 1+1 / 晚安)");

        let mut reader = BufReader::new(tokio::io::stdin()).lines();
        let writer: LockedWriter = Arc::new(AsyncMutex::new(Box::new(ConsoleSink)));
        let matcher = Arc::new(Matcher::new());

        while let Ok(Some(line)) = reader.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let now = chrono::Local::now();
            let event = MockMessageEvent {
                post_type: "message",
                message_type: "private",
                time: now.timestamp(),
                self_id: 0,
                sub_type: "friend",
                user_id: CONSOLE_USER_ID,
                message_id: now.timestamp_millis(),
                sender: MockSender {
                    user_id: CONSOLE_USER_ID,
                    nickname: "ConsoleUser".to_string(),
                    card: String::new(),
                },
                raw_message: line.to_string(),
                message: Message::new().text(line),
            };

            let mut json_bytes = match simd_json::to_vec(&event) {
                Ok(b) => b,
                Err(e) => {
                    warn!(target: "Console", "构造模拟消息失败: {}", e);
                    continue;
                }
            };

            // 控制台串行处理，回复按输入顺序输出
            if let Err(e) = process_frame(
                &mut json_bytes,
                writer.clone(),
                global_config.clone(),
                scheduler.clone(),
                matcher.clone(),
            )
            .await
            {
                warn!(target: "Console", "处理消息时出错: {}", e);
            }
        }
    })
}

/// 把消息段渲染成一行可读文本，图片只显示占位
fn render_message(msg_val: &simd_json::OwnedValue) -> String {
    if let Some(s) = msg_val.as_str() {
        return s.to_string();
    }
    let Some(segments) = msg_val.as_array() else {
        return format!("{:?}", msg_val);
    };

    let mut out = String::new();
    for seg in segments {
        let data = seg.get("data");
        match seg.get_str("type").unwrap_or("") {
            "text" => out.push_str(data.and_then(|d| d.get_str("text")).unwrap_or("")),
            "image" => {
                let file = data.and_then(|d| d.get_str("file")).unwrap_or("");
                if file.starts_with("base64://") {
                    out.push_str(&format!("[图片 {} 字节 base64]", file.len() - 9));
                } else {
                    out.push_str(&format!("[图片 {}]", file));
                }
            }
            "reply" => out.push_str("[回复] "),
            "at" => out.push_str(&format!(
                "@{} ",
                data.and_then(|d| d.get_str("qq")).unwrap_or("")
            )),
            other => out.push_str(&format!("[{}]", other)),
        }
    }
    out
}

struct ConsoleSink;

impl Sink<WsMessage> for ConsoleSink {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsMessage) -> Result<(), Self::Error> {
        if let WsMessage::Text(text) = item {
            let mut data = text.as_bytes().to_vec();
            match simd_json::to_owned_value(&mut data) {
                Ok(val) => {
                    let action = val.get_str("action").unwrap_or("unknown");
                    if action == "send_msg"
                        && let Some(msg_val) = val.get("params").and_then(|p| p.get("message"))
                    {
                        println!("\x1b[36m[Bot Reply] > \x1b[0m{}", render_message(msg_val));
                    } else {
                        println!("\x1b[90m[API Call] > {}\x1b[0m", action);
                    }
                }
                Err(_) => println!("\x1b[36m[Bot Raw] > \x1b[0m{}", text.as_str()),
            }
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
