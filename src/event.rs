use crate::config::AppConfig;
use crate::matcher::Matcher;
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::sync::{Arc, RwLock};

pub type Event = OwnedValue;

/// 统一的上下文，在插件链中按值移交
#[derive(Clone)]
pub struct Context {
    pub event: EventType,
    pub config: Arc<RwLock<AppConfig>>,
    pub scheduler: Arc<Scheduler>,
    pub matcher: Arc<Matcher>,
}

impl Context {
    /// 基于当前上下文替换事件，其余共享状态保持不变
    pub fn with_event(&self, event: EventType) -> Self {
        Self {
            event,
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
            matcher: self.matcher.clone(),
        }
    }

    /// 尝试将当前事件视为 OneBot 消息事件
    pub fn as_message(&self) -> Option<MessageEvent<'_>> {
        match &self.event {
            EventType::Onebot(event) if event.get_str("post_type") == Some("message") => {
                Some(MessageEvent(event))
            }
            _ => None,
        }
    }
}

fn read_id(value: &Event, key: &str) -> Option<i64> {
    value
        .get_i64(key)
        .or_else(|| value.get_u64(key).map(|v| v as i64))
}

/// 消息事件封装，提供便捷的强类型访问
pub struct MessageEvent<'a>(pub &'a Event);

impl<'a> MessageEvent<'a> {
    pub fn group_id(&self) -> Option<i64> {
        read_id(self.0, "group_id")
    }

    pub fn user_id(&self) -> i64 {
        read_id(self.0, "user_id").unwrap_or(0)
    }

    pub fn message_id(&self) -> i64 {
        read_id(self.0, "message_id").unwrap_or(0)
    }

    pub fn is_group(&self) -> bool {
        self.0.get_str("message_type") == Some("group")
    }

    pub fn sender_nickname(&self) -> Option<&'a str> {
        self.0
            .get("sender")
            .and_then(|s| s.get_str("nickname"))
            .filter(|s| !s.is_empty())
    }

    pub fn sender_card(&self) -> Option<&'a str> {
        self.0
            .get("sender")
            .and_then(|s| s.get_str("card"))
            .filter(|s| !s.is_empty())
    }

    /// 发送者显示名称 (优先名片，其次昵称)
    pub fn sender_name(&self) -> &'a str {
        self.sender_card()
            .or_else(|| self.sender_nickname())
            .unwrap_or("你")
    }

    /// 会话键：群聊为 `group_<群号>`，私聊为 `private_<QQ>`
    pub fn chat_key(&self) -> String {
        match self.group_id().filter(|&id| id != 0) {
            Some(gid) => format!("group_{}", gid),
            None => format!("private_{}", self.user_id()),
        }
    }
}

/// 事件类型
#[derive(Debug, Clone)]
pub enum EventType {
    /// 来自 OneBot 的原始事件
    Onebot(Event),
    /// 插件准备发送消息前的拦截事件
    BeforeSend(SendPacket),
    /// 系统初始化事件 (用于插件 on_init 生命周期)
    Init,
}

/// 发送包结构，用于在 BeforeSend 中传递
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SendPacket {
    pub action: String,
    pub params: OwnedValue,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::AppConfig;

    /// 构造一条 OneBot 群消息事件
    pub fn group_message(group_id: i64, user_id: i64, text: &str) -> Event {
        let mut raw = serde_json::json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": group_id,
            "user_id": user_id,
            "message_id": 42,
            "raw_message": text,
            "sender": { "user_id": user_id, "nickname": "小明", "card": "" },
            "message": [ { "type": "text", "data": { "text": text } } ]
        })
        .to_string()
        .into_bytes();
        simd_json::to_owned_value(&mut raw).unwrap()
    }

    /// 构造一条 OneBot 私聊消息事件，没有 group_id
    pub fn private_message(user_id: i64, text: &str) -> Event {
        let mut raw = serde_json::json!({
            "post_type": "message",
            "message_type": "private",
            "user_id": user_id,
            "message_id": 43,
            "raw_message": text,
            "sender": { "user_id": user_id, "nickname": "小红" },
            "message": [ { "type": "text", "data": { "text": text } } ]
        })
        .to_string()
        .into_bytes();
        simd_json::to_owned_value(&mut raw).unwrap()
    }

    pub fn context(event: Event, config: AppConfig) -> Context {
        Context {
            event: EventType::Onebot(event),
            config: Arc::new(RwLock::new(config)),
            scheduler: Arc::new(Scheduler::new()),
            matcher: Arc::new(Matcher::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use crate::config::AppConfig;

    #[test]
    fn message_view_reads_fields() {
        let ctx = context(group_message(1001, 2002, "早安"), AppConfig::default());
        let msg = ctx.as_message().unwrap();
        assert_eq!(msg.group_id(), Some(1001));
        assert_eq!(msg.user_id(), 2002);
        assert_eq!(msg.message_id(), 42);
        assert!(msg.is_group());
        assert_eq!(msg.sender_name(), "小明");
        assert_eq!(msg.chat_key(), "group_1001");
    }

    #[test]
    fn private_message_keys_by_user() {
        let ctx = context(private_message(3003, "晚安"), AppConfig::default());
        let msg = ctx.as_message().unwrap();
        assert_eq!(msg.group_id(), None);
        assert!(!msg.is_group());
        assert_eq!(msg.sender_name(), "小红");
        assert_eq!(msg.chat_key(), "private_3003");
    }
}
