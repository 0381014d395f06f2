use super::endpoint::ThinkMode;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

static THINK_BLOCK: OnceLock<Regex> = OnceLock::new();
static THINK_TAIL: OnceLock<Regex> = OnceLock::new();
static URL_REGEX: OnceLock<Regex> = OnceLock::new();

fn think_block() -> &'static Regex {
    THINK_BLOCK.get_or_init(|| Regex::new(r"(?is)<think>(.*?)</think>").expect("Invalid Regex"))
}

// 只有闭合标签：开头到 </think> 都是推理内容
fn think_tail() -> &'static Regex {
    THINK_TAIL.get_or_init(|| Regex::new(r"(?is)^(.*?)</think>").expect("Invalid Regex"))
}

fn url_regex() -> &'static Regex {
    URL_REGEX.get_or_init(|| Regex::new(r"^https?://\S+$").expect("Invalid Regex"))
}

/// 拆分推理段与回答，返回 (推理, 回答)
pub fn split_think(text: &str) -> (Option<String>, String) {
    let blocks = think_block();
    let reasoning: Vec<String> = blocks
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if blocks.is_match(text) {
        let answer = blocks.replace_all(text, "").trim().to_string();
        let reasoning = (!reasoning.is_empty()).then(|| reasoning.join("\n"));
        return (reasoning, answer);
    }

    if let Some(caps) = think_tail().captures(text) {
        let head = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let answer = text[caps.get(0).map(|m| m.end()).unwrap_or(0)..]
            .trim()
            .to_string();
        let reasoning = (!head.is_empty()).then(|| head.to_string());
        return (reasoning, answer);
    }

    (None, text.to_string())
}

/// 按配置处理推理段
pub fn apply_think(text: &str, mode: ThinkMode) -> String {
    if mode == ThinkMode::Keep {
        return text.to_string();
    }

    let (reasoning, answer) = split_think(text);
    match (mode, reasoning) {
        (ThinkMode::Fold, Some(r)) => {
            let quoted: Vec<String> = r.lines().map(|l| format!("> {}", l)).collect();
            format!("💭 思考过程：\n{}\n\n{}", quoted.join("\n"), answer)
        }
        _ => answer,
    }
}

/// 以 JSON Pointer 取字段；字符串原样返回，其他值输出紧凑 JSON
pub fn extract_json(body: &str, pointer: &str) -> Result<String, String> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| format!("响应不是有效的 JSON: {}", e))?;
    match root.pointer(pointer) {
        None | Some(Value::Null) => Err(format!("响应中缺少字段 {}", pointer)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
    }
}

/// 文本是否是单个 http(s) 链接
pub fn as_link(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    url_regex().is_match(trimmed).then_some(trimmed)
}

/// 判断响应是否是图片。
/// 有明确的 Content-Type 时以它为准；缺失或为 `application/octet-stream` 时才按文件头识别
pub fn looks_like_image(content_type: Option<&str>, bytes: &[u8]) -> bool {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty());

    match mime.as_deref() {
        Some(m) if m.starts_with("image/") => true,
        None | Some("application/octet-stream") => image::guess_format(bytes).is_ok(),
        Some(_) => false,
    }
}
