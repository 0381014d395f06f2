use super::endpoint::Endpoint;

const MEMORY_ID_LEN: usize = 6;

/// 从指令参数中解析出的请求内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub input: String,
    pub memory_id: Option<String>,
}

impl Query {
    /// 组装请求参数：输入、记忆 ID、固定参数
    pub fn params<'a>(&'a self, endpoint: &'a Endpoint) -> Vec<(&'a str, &'a str)> {
        let mut params = Vec::with_capacity(endpoint.extra_params.len() + 2);
        if endpoint.takes_input() {
            params.push((endpoint.query_key.as_str(), self.input.as_str()));
        }
        if let (Some(key), Some(id)) = (&endpoint.memory_key, &self.memory_id) {
            params.push((key.as_str(), id.as_str()));
        }
        for (k, v) in &endpoint.extra_params {
            params.push((k.as_str(), v.as_str()));
        }
        params
    }
}

fn usage_shape(endpoint: &Endpoint) -> (String, String) {
    if endpoint.memory_key.is_some() {
        let hint = endpoint.usage_hint.as_deref().unwrap_or("提问内容");
        let example = endpoint.usage_example.as_deref().unwrap_or("你好");
        (format!("<记忆数> <{}>", hint), format!("123456 {}", example))
    } else {
        let hint = endpoint.usage_hint.as_deref().unwrap_or("提问内容");
        let example = endpoint.usage_example.as_deref().unwrap_or("1+1");
        (format!("<{}>", hint), example.to_string())
    }
}

/// 空输入时的用法提示
pub fn usage(endpoint: &Endpoint) -> String {
    let (shape, example) = usage_shape(endpoint);
    format!(
        "正确指令：{cmd} {shape}\n\n示例：{cmd} {example}",
        cmd = endpoint.command
    )
}

fn format_hint(endpoint: &Endpoint) -> String {
    let (shape, example) = usage_shape(endpoint);
    format!(
        "正确格式：{cmd} {shape}\n\n示例：{cmd} {example}",
        cmd = endpoint.command
    )
}

/// 校验并拆分用户输入；失败时返回可直接回复给用户的提示
pub fn parse_query(endpoint: &Endpoint, raw: &str) -> Result<Query, String> {
    if !endpoint.takes_input() {
        return Ok(Query {
            input: String::new(),
            memory_id: None,
        });
    }

    let msg = raw.trim();
    if msg.is_empty() {
        return Err(usage(endpoint));
    }

    if endpoint.memory_key.is_none() {
        return Ok(Query {
            input: msg.to_string(),
            memory_id: None,
        });
    }

    // 记忆模式：首个空格前为记忆数
    let Some((uid, question)) = msg.split_once(' ') else {
        return Err(format_hint(endpoint));
    };
    let uid = uid.trim();
    let question = question.trim();

    if uid.len() != MEMORY_ID_LEN || !uid.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!(
            "记忆数必须是{}位数字\n\n{}",
            MEMORY_ID_LEN,
            format_hint(endpoint)
        ));
    }
    if question.is_empty() {
        return Err(format_hint(endpoint));
    }

    Ok(Query {
        input: question.to_string(),
        memory_id: Some(uid.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Endpoint {
        Endpoint::new("腾讯元宝", "腾讯元宝助手", "https://example.com/yuanbao.php")
    }

    fn memory() -> Endpoint {
        Endpoint::new("gpt5", "GPT5-nano助手", "https://example.com/gpt5").memory_key("uid")
    }

    #[test]
    fn plain_query_passes_text_through() {
        let q = parse_query(&plain(), "  1+1 等于几 ").unwrap();
        assert_eq!(q.input, "1+1 等于几");
        assert_eq!(q.memory_id, None);
    }

    #[test]
    fn empty_input_returns_usage() {
        let err = parse_query(&plain(), "   ").unwrap_err();
        assert_eq!(err, "正确指令：腾讯元宝 <提问内容>\n\n示例：腾讯元宝 1+1");

        let err = parse_query(&memory(), "").unwrap_err();
        assert_eq!(err, "正确指令：gpt5 <记忆数> <提问内容>\n\n示例：gpt5 123456 你好");
    }

    #[test]
    fn memory_query_splits_on_first_space() {
        let q = parse_query(&memory(), "123456 你好 世界").unwrap();
        assert_eq!(q.memory_id.as_deref(), Some("123456"));
        assert_eq!(q.input, "你好 世界");
    }

    #[test]
    fn memory_query_requires_two_parts() {
        let err = parse_query(&memory(), "123456").unwrap_err();
        assert_eq!(err, "正确格式：gpt5 <记忆数> <提问内容>\n\n示例：gpt5 123456 你好");
    }

    #[test]
    fn memory_id_must_be_six_ascii_digits() {
        for bad in ["12345 hi", "1234567 hi", "12a456 hi", "１２３４５６ hi"] {
            let err = parse_query(&memory(), bad).unwrap_err();
            assert!(err.starts_with("记忆数必须是6位数字\n\n正确格式：gpt5"), "{}", bad);
        }
    }

    #[test]
    fn params_follow_endpoint_keys() {
        let mut ep = memory();
        ep.extra_params.insert("type".into(), "text".into());
        let q = parse_query(&ep, "654321 hi").unwrap();
        assert_eq!(
            q.params(&ep),
            vec![("question", "hi"), ("uid", "654321"), ("type", "text")]
        );
    }

    #[test]
    fn no_input_endpoint_ignores_arguments() {
        let ep = Endpoint::new("一言", "一言", "https://example.com/hitokoto").query_key("");
        let q = parse_query(&ep, "随便写点").unwrap();
        assert!(q.params(&ep).is_empty());
    }
}
