use crate::config::{AppConfig, BotConfig};
use crate::scheduler::Scheduler;
use futures_util::future::BoxFuture;
use std::sync::{Arc, OnceLock, RwLock};

pub mod console;
pub mod onebot;

/// 适配器处理函数签名
pub type AdapterHandler =
    fn(BotConfig, Arc<RwLock<AppConfig>>, Arc<Scheduler>) -> BoxFuture<'static, ()>;

/// 适配器定义
pub struct Adapter {
    /// 协议名称，在配置文件中通过 protocol 字段指定
    pub protocol: &'static str,
    /// 启动处理函数
    pub handler: AdapterHandler,
}

static ADAPTERS: OnceLock<Vec<Adapter>> = OnceLock::new();

pub fn get_adapters() -> &'static [Adapter] {
    ADAPTERS.get_or_init(|| {
        vec![
            Adapter {
                protocol: "onebot",
                handler: onebot::entry,
            },
            Adapter {
                protocol: "console",
                handler: console::entry,
            },
        ]
    })
}

/// 根据协议名称查找适配器
pub fn find_adapter(protocol: &str) -> Option<&'static Adapter> {
    get_adapters().iter().find(|a| a.protocol == protocol)
}
