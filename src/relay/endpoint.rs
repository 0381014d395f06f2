use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    Get,
    /// 表单提交 (application/x-www-form-urlencoded)
    Post,
}

/// 响应如何转成回复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// 原样转发响应文本
    #[default]
    Text,
    /// 按 json_path 取 JSON 字段
    Json,
    /// 响应本身是图片，或是一个图片链接
    Image,
    /// 按 json_path 取图片链接后下载
    JsonImage,
}

/// `<think>...</think>` 推理段的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThinkMode {
    #[default]
    Keep,
    Strip,
    Fold,
}

/// 一个中转指令：指令名 -> 固定的第三方接口
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub command: String,
    /// 展示名，出现在错误提示中
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: Method,
    /// 用户输入对应的参数名，留空表示该指令不需要输入
    #[serde(default = "default_query_key")]
    pub query_key: String,
    /// 记忆 ID 参数名；设置后输入格式为 `<6位记忆数> <内容>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_key: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_params: BTreeMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub reply: ReplyMode,
    /// JSON Pointer，如 `/data/content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    /// 覆盖插件级别的 think 配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think: Option<ThinkMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_example: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_query_key() -> String {
    "question".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Endpoint {
    pub fn new(command: &str, name: &str, url: &str) -> Self {
        Self {
            command: command.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            method: Method::Get,
            query_key: default_query_key(),
            memory_key: None,
            extra_params: BTreeMap::new(),
            timeout_secs: default_timeout(),
            reply: ReplyMode::Text,
            json_path: None,
            think: None,
            usage_hint: None,
            usage_example: None,
            enabled: true,
        }
    }

    pub fn query_key(mut self, key: &str) -> Self {
        self.query_key = key.to_string();
        self
    }

    pub fn memory_key(mut self, key: &str) -> Self {
        self.memory_key = Some(key.to_string());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[cfg(test)]
    pub fn reply(mut self, mode: ReplyMode, json_path: Option<&str>) -> Self {
        self.reply = mode;
        self.json_path = json_path.map(String::from);
        self
    }

    #[cfg(test)]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn takes_input(&self) -> bool {
        !self.query_key.is_empty()
    }

    /// 检查配置是否可用，返回人类可读的原因
    pub fn validate(&self) -> Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("command 不能为空".into());
        }
        if self.command.chars().any(char::is_whitespace) {
            return Err(format!("command `{}` 不能包含空白", self.command));
        }
        let parsed = Url::parse(&self.url).map_err(|e| format!("url 无效: {}", e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("url 协议不受支持: {}", parsed.scheme()));
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs 必须大于 0".into());
        }
        if matches!(self.reply, ReplyMode::Json | ReplyMode::JsonImage) {
            match self.json_path.as_deref() {
                Some(p) if p.is_empty() || p.starts_with('/') => {}
                Some(p) => return Err(format!("json_path `{}` 必须以 / 开头", p)),
                None => return Err("json 回复模式需要 json_path".into()),
            }
        }
        if self.memory_key.is_some() && !self.takes_input() {
            return Err("memory_key 需要配合 query_key 使用".into());
        }
        Ok(())
    }
}
