use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use toml::Value;

pub type ConfigError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    // 全局指令前缀（支持多个，空字符串表示无需前缀）
    #[serde(default = "default_prefix")]
    pub command_prefix: Vec<String>,

    // 是否输出 Debug 日志
    #[serde(default)]
    pub debug: bool,

    // Bot 连接配置
    #[serde(default = "default_bots")]
    pub bots: Vec<BotConfig>,

    // 插件配置
    #[serde(flatten)]
    pub plugins: HashMap<String, Value>,
}

impl AppConfig {
    pub async fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).await?;
        Ok(())
    }

    /// 读取配置文件；文件不存在时按默认值生成。
    /// 缺失的插件配置表会用 `defaults` 补齐并写回磁盘。
    pub async fn load_or_init<I>(path: &str, defaults: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let mut config = if Path::new(path).exists() {
            let raw = fs::read_to_string(path).await?;
            toml::from_str::<AppConfig>(&raw)
                .map_err(|e| format!("配置文件 {} 解析失败: {}", path, e))?
        } else {
            AppConfig::default()
        };

        let mut changed = !Path::new(path).exists();
        for (name, value) in defaults {
            if !config.plugins.contains_key(name) {
                config.plugins.insert(name.to_string(), value);
                changed = true;
            }
        }

        if changed {
            config.save(path).await?;
        }

        Ok(config)
    }

    /// 插件是否启用 (缺省视为关闭)
    pub fn plugin_enabled(&self, name: &str) -> bool {
        self.plugins
            .get(name)
            .and_then(|v| v.get("enabled"))
            .and_then(|x| x.as_bool())
            .unwrap_or(false)
    }
}

fn default_prefix() -> Vec<String> {
    vec!["/".to_string(), String::new()]
}

fn default_bots() -> Vec<BotConfig> {
    vec![
        // 控制台适配器：保持简洁，仅需启用
        BotConfig {
            enabled: true,
            protocol: "console".to_string(),
            url: None,
            access_token: None,
        },
        // OneBot 适配器：生成配置占位符，默认禁用以防误连
        BotConfig {
            enabled: false,
            protocol: "onebot".to_string(),
            url: Some("ws://127.0.0.1:3001".to_string()),
            access_token: Some("YOUR_TOKEN_HERE".to_string()),
        },
    ]
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    // 协议类型 ("onebot" / "console")
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_protocol() -> String {
    "onebot".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_prefix(),
            debug: false,
            bots: default_bots(),
            plugins: HashMap::new(),
        }
    }
}

/// 辅助函数：构建默认配置 Value，并确保包含 enabled 字段
pub fn build_config<T: Serialize>(data: T) -> Value {
    let mut val = Value::try_from(data).unwrap_or(Value::Table(Default::default()));
    if let Value::Table(ref mut map) = val
        && !map.contains_key("enabled")
    {
        map.insert("enabled".to_string(), Value::Boolean(true));
    }
    val
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Dummy {
        cooldown: u64,
    }

    #[test]
    fn build_config_injects_enabled() {
        let val = build_config(Dummy { cooldown: 5 });
        assert_eq!(val.get("enabled").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(val.get("cooldown").and_then(|v| v.as_integer()), Some(5));
    }

    #[tokio::test]
    async fn load_or_init_creates_file_and_fills_plugins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let cfg = AppConfig::load_or_init(path, vec![("demo", build_config(Dummy { cooldown: 1 }))])
            .await
            .unwrap();
        assert!(cfg.plugin_enabled("demo"));
        assert!(!cfg.plugin_enabled("missing"));
        assert_eq!(cfg.command_prefix, vec!["/".to_string(), String::new()]);

        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains("[demo]"));
    }

    #[tokio::test]
    async fn load_or_init_keeps_user_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "command_prefix = [\"#\"]\ndebug = true\n\n[demo]\nenabled = false\ncooldown = 9\n",
        )
        .unwrap();

        let cfg = AppConfig::load_or_init(
            path.to_str().unwrap(),
            vec![("demo", build_config(Dummy { cooldown: 1 }))],
        )
        .await
        .unwrap();

        assert!(cfg.debug);
        assert_eq!(cfg.command_prefix, vec!["#".to_string()]);
        assert!(!cfg.plugin_enabled("demo"));
        let cooldown = cfg.plugins["demo"].get("cooldown").and_then(|v| v.as_integer());
        assert_eq!(cooldown, Some(9));
    }
}
