//! 第三方接口中转：指令参数 -> HTTP 请求 -> 回复内容

use crate::adapters::onebot::{LockedWriter, send_msg};
use crate::command::match_command;
use crate::event::Context;
use crate::message::Message;
use crate::plugins::PluginError;
use crate::{debug, error, warn};
use base64::{Engine as _, engine::general_purpose};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

pub mod endpoint;
pub mod query;
pub mod response;

pub use endpoint::{Endpoint, Method, ReplyMode, ThinkMode};
pub use query::{Query, parse_query};

const USER_AGENT: &str = concat!("relaybot/", env!("CARGO_PKG_VERSION"));

/// 单张图片的下载上限
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// 中转结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Image(Vec<u8>),
}

impl Reply {
    /// 转成引用原消息的消息链
    pub fn into_message(self, reply_to: i64) -> Message {
        let msg = Message::new().reply(reply_to);
        match self {
            Reply::Text(t) => msg.text(t),
            Reply::Image(bytes) => {
                msg.image(format!("base64://{}", general_purpose::STANDARD.encode(bytes)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// 服务器返回了非 200 状态码
    Status(u16),
    Connect,
    Timeout,
    /// 响应体为空白
    Empty,
    /// 响应内容无法按配置解析
    Decode(String),
    Other(String),
}

impl RelayError {
    /// 面向用户的提示语
    pub fn describe(&self, name: &str) -> String {
        match self {
            RelayError::Status(code) => {
                format!("请求{}失败，服务器返回错误状态码：{}", name, code)
            }
            RelayError::Connect => {
                format!("无法连接到{}服务器，请稍后重试或检查网络连接", name)
            }
            RelayError::Timeout => "请求超时，请稍后重试".to_string(),
            RelayError::Empty => format!("{}没有返回内容", name),
            RelayError::Decode(detail) | RelayError::Other(detail) => {
                format!("请求{}时发生错误：{}", name, detail)
            }
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Status(code) => write!(f, "unexpected status {}", code),
            RelayError::Connect => write!(f, "connection failed"),
            RelayError::Timeout => write!(f, "request timed out"),
            RelayError::Empty => write!(f, "empty response body"),
            RelayError::Decode(detail) => write!(f, "decode error: {}", detail),
            RelayError::Other(detail) => write!(f, "{}", detail),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RelayError::Timeout
        } else if e.is_connect() {
            RelayError::Connect
        } else if let Some(status) = e.status() {
            RelayError::Status(status.as_u16())
        } else if e.is_decode() || e.is_body() {
            RelayError::Decode(e.to_string())
        } else {
            RelayError::Other(e.to_string())
        }
    }
}

/// 共享一个连接池的 HTTP 客户端，超时按接口单独设置
pub struct RelayClient {
    http: reqwest::Client,
    max_image_bytes: usize,
}

static SHARED: OnceLock<RelayClient> = OnceLock::new();

impl RelayClient {
    pub fn new() -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RelayError::Other(format!("初始化 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            http,
            max_image_bytes: MAX_IMAGE_BYTES,
        })
    }

    pub fn shared() -> Result<&'static RelayClient, RelayError> {
        if let Some(client) = SHARED.get() {
            return Ok(client);
        }
        let client = RelayClient::new()?;
        Ok(SHARED.get_or_init(|| client))
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        query: &Query,
    ) -> Result<reqwest::Response, RelayError> {
        let params = query.params(endpoint);
        let builder = match endpoint.method {
            Method::Get => self.http.get(&endpoint.url).query(&params),
            Method::Post => self.http.post(&endpoint.url).form(&params),
        };

        let resp = builder
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .send()
            .await?;

        if resp.status().as_u16() != 200 {
            return Err(RelayError::Status(resp.status().as_u16()));
        }
        Ok(resp)
    }

    /// 第二次请求：下载图片链接
    async fn download_image(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, RelayError> {
        let resp = self.http.get(url).timeout(timeout).send().await?;
        if resp.status().as_u16() != 200 {
            return Err(RelayError::Status(resp.status().as_u16()));
        }
        let content_type = header_content_type(&resp);
        let bytes = self.read_capped(resp).await?;
        if !response::looks_like_image(content_type.as_deref(), &bytes) {
            return Err(RelayError::Decode("图片链接返回的不是图片".into()));
        }
        Ok(bytes)
    }

    /// 分块读取响应体，超过图片上限立即放弃
    async fn read_capped(&self, mut resp: reqwest::Response) -> Result<Vec<u8>, RelayError> {
        let too_large = || RelayError::Decode("图片体积超过上限".into());
        if resp
            .content_length()
            .is_some_and(|len| len > self.max_image_bytes as u64)
        {
            return Err(too_large());
        }

        let mut buf = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if buf.len() + chunk.len() > self.max_image_bytes {
                return Err(too_large());
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }

    /// 调用接口并按回复模式转换结果
    pub async fn fetch(
        &self,
        endpoint: &Endpoint,
        query: &Query,
        think: ThinkMode,
    ) -> Result<Reply, RelayError> {
        let timeout = Duration::from_secs(endpoint.timeout_secs);
        let resp = self.send(endpoint, query).await?;
        let pointer = endpoint.json_path.as_deref().unwrap_or("");

        let reply = match endpoint.reply {
            ReplyMode::Text => Reply::Text(response::apply_think(&resp.text().await?, think)),
            ReplyMode::Json => {
                let body = resp.text().await?;
                let value = response::extract_json(&body, pointer).map_err(RelayError::Decode)?;
                Reply::Text(response::apply_think(&value, think))
            }
            ReplyMode::Image => {
                let content_type = header_content_type(&resp);
                let bytes = self.read_capped(resp).await?;
                if response::looks_like_image(content_type.as_deref(), &bytes) {
                    Reply::Image(bytes)
                } else {
                    let body = String::from_utf8_lossy(&bytes);
                    let link = response::as_link(&body)
                        .ok_or_else(|| RelayError::Decode("返回内容不是图片".into()))?;
                    Reply::Image(self.download_image(link, timeout).await?)
                }
            }
            ReplyMode::JsonImage => {
                let body = resp.text().await?;
                let value = response::extract_json(&body, pointer).map_err(RelayError::Decode)?;
                let link = response::as_link(&value)
                    .ok_or_else(|| RelayError::Decode(format!("字段 {} 不是图片链接", pointer)))?;
                Reply::Image(self.download_image(link, timeout).await?)
            }
        };

        match reply {
            Reply::Text(t) if t.trim().is_empty() => Err(RelayError::Empty),
            other => Ok(other),
        }
    }

    /// 完整处理一次指令：校验输入、请求、错误转提示。结果总是可以直接回复
    pub async fn answer(&self, endpoint: &Endpoint, raw_args: &str, think: ThinkMode) -> Reply {
        let query = match parse_query(endpoint, raw_args) {
            Ok(q) => q,
            Err(usage) => return Reply::Text(usage),
        };

        debug!(target: "Relay", "[{}] -> {} {:?}", endpoint.command, endpoint.url, query);

        match self.fetch(endpoint, &query, think).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(target: "Relay", "请求{}失败: {}", endpoint.name, e);
                Reply::Text(e.describe(&endpoint.name))
            }
        }
    }
}

fn header_content_type(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// 在一组接口中查找被触发的指令并回复。长指令名优先匹配
pub async fn dispatch(
    ctx: Context,
    writer: LockedWriter,
    endpoints: &[Endpoint],
    default_think: ThinkMode,
    log_target: &str,
) -> Result<Option<Context>, PluginError> {
    let mut candidates: Vec<&Endpoint> = endpoints.iter().filter(|e| e.enabled).collect();
    candidates.sort_by_key(|e| std::cmp::Reverse(e.command.chars().count()));

    for endpoint in candidates {
        let Some(cmd) = match_command(&ctx, &endpoint.command) else {
            continue;
        };
        if let Err(reason) = endpoint.validate() {
            warn!(target: log_target, "指令 [{}] 配置无效: {}", endpoint.command, reason);
            return Ok(Some(ctx));
        }
        let Some(msg) = ctx.as_message() else {
            return Ok(Some(ctx));
        };
        let (group_id, user_id, message_id) = (msg.group_id(), msg.user_id(), msg.message_id());

        let think = endpoint.think.unwrap_or(default_think);
        let reply = match RelayClient::shared() {
            Ok(client) => client.answer(endpoint, &cmd.text(), think).await,
            Err(e) => {
                error!(target: log_target, "{}", e);
                Reply::Text(e.describe(&endpoint.name))
            }
        };

        send_msg(
            &ctx,
            writer,
            group_id,
            Some(user_id),
            reply.into_message(message_id),
        )
        .await?;
        return Ok(None);
    }

    Ok(Some(ctx))
}
