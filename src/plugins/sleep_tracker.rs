use crate::adapters::onebot::{LockedWriter, send_msg};
use crate::command::match_command;
use crate::config::build_config;
use crate::event::Context;
use crate::message::Message;
use crate::plugins::{PluginError, config_or_default, get_data_dir};
use crate::{debug, error, info};
use chrono::{DateTime, Local, TimeDelta};
use futures_util::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use toml::Value;

pub mod store;

use store::SleepBook;

const PLUGIN_NAME: &str = "sleep_tracker";
const PURGE_INTERVAL: Duration = Duration::from_secs(600);
/// 作息记录保留天数，每天凌晨 4 点清理
const RETENTION_DAYS: i64 = 7;
/// `max_sleep_hours` 配置越界时使用的默认值
const FALLBACK_MAX_SLEEP_HOURS: i64 = 24;

const NIGHT_LINES: &[&str] = &["好梦～", "早点休息，别熬夜啦", "明天见！", "睡个好觉，做个美梦"];
const MORNING_LINES: &[&str] = &[
    "新的一天也要元气满满！",
    "记得吃早饭哦",
    "今天也要加油呀",
    "又是美好的一天",
];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub enabled: bool,
    pub morning_commands: Vec<String>,
    pub night_commands: Vec<String>,
    /// 同一用户重复问候的冷却时间 (秒)，0 表示不限制
    pub cooldown_secs: u64,
    /// 超过该时长的入睡记录不计算睡眠时长
    pub max_sleep_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            morning_commands: vec!["早安".into()],
            night_commands: vec!["晚安".into()],
            cooldown_secs: 1800,
            max_sleep_hours: 24,
        }
    }
}

pub fn default_config() -> Value {
    build_config(Config::default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Morning,
    Night,
}

impl Kind {
    fn word(self) -> &'static str {
        match self {
            Kind::Morning => "早安",
            Kind::Night => "晚安",
        }
    }
}

/// 问候冷却表，记录每个 (会话, 用户, 类型) 的过期时刻。`None` 表示永不过期
#[derive(Default)]
struct Cooldown {
    until: HashMap<(String, i64, Kind), Option<Instant>>,
}

impl Cooldown {
    /// 冷却中返回 false；否则登记新的冷却并返回 true。
    /// 冷却时长大到无法表示时视为永久冷却
    fn try_acquire(&mut self, key: (String, i64, Kind), ttl: Duration, now: Instant) -> bool {
        if ttl.is_zero() {
            return true;
        }
        if self.until.get(&key).is_some_and(|t| t.is_none_or(|t| t > now)) {
            return false;
        }
        self.until.insert(key, now.checked_add(ttl));
        true
    }

    fn purge(&mut self, now: Instant) -> usize {
        let before = self.until.len();
        self.until.retain(|_, t| t.is_none_or(|t| t > now));
        before - self.until.len()
    }
}

fn max_sleep(config: &Config) -> TimeDelta {
    TimeDelta::try_hours(config.max_sleep_hours)
        .or_else(|| TimeDelta::try_hours(FALLBACK_MAX_SLEEP_HOURS))
        .unwrap_or(TimeDelta::MAX)
}

pub struct Greeting<'a> {
    pub kind: Kind,
    pub chat_key: String,
    pub user_id: i64,
    pub name: &'a str,
    pub in_group: bool,
}

pub struct Tracker {
    path: PathBuf,
    book: AsyncMutex<SleepBook>,
    cooldown: Mutex<Cooldown>,
}

static TRACKER: OnceLock<Arc<Tracker>> = OnceLock::new();

fn pick_line(lines: &[&'static str]) -> &'static str {
    lines[rand::rng().random_range(0..lines.len())]
}

impl Tracker {
    pub async fn open(path: PathBuf) -> Self {
        let book = SleepBook::load(&path).await;
        Self {
            path,
            book: AsyncMutex::new(book),
            cooldown: Mutex::new(Cooldown::default()),
        }
    }

    /// 处理一次问候并生成回复。写盘失败只记日志，不影响回复
    pub async fn greet(&self, greeting: Greeting<'_>, config: &Config, now: DateTime<Local>) -> String {
        let key = (greeting.chat_key.clone(), greeting.user_id, greeting.kind);
        let ttl = Duration::from_secs(config.cooldown_secs);
        let acquired = match self.cooldown.lock() {
            Ok(mut cd) => cd.try_acquire(key, ttl, Instant::now()),
            Err(_) => true,
        };
        if !acquired {
            return format!("你刚刚已经说过{}啦", greeting.kind.word());
        }

        let scope = if greeting.in_group { "你是本群" } else { "你是" };
        let mut book = self.book.lock().await;

        let reply = match greeting.kind {
            Kind::Night => {
                let rank = book.record_sleep(&greeting.chat_key, greeting.user_id, now);
                format!(
                    "晚安，{}！{}今天第{}个睡觉的\n{}",
                    greeting.name,
                    scope,
                    rank,
                    pick_line(NIGHT_LINES)
                )
            }
            Kind::Morning => {
                let out = book.record_wake(
                    &greeting.chat_key,
                    greeting.user_id,
                    now,
                    max_sleep(config),
                );
                let mut text = format!(
                    "早安，{}！{}今天第{}个起床的",
                    greeting.name, scope, out.rank
                );
                if let Some(slept) = out.slept {
                    let minutes = slept.num_minutes();
                    text.push_str(&format!("\n你睡了{}小时{}分钟", minutes / 60, minutes % 60));
                }
                text.push('\n');
                text.push_str(pick_line(MORNING_LINES));
                text
            }
        };

        if let Err(e) = book.save(&self.path).await {
            error!(target: "Sleep", "保存作息记录失败: {:#}", e);
        }
        reply
    }

    /// 清理过期的作息记录并写盘
    pub async fn prune_records(&self, now: DateTime<Local>) -> usize {
        let before = (now - TimeDelta::days(RETENTION_DAYS)).timestamp();
        let mut book = self.book.lock().await;
        let removed = book.prune(before);
        if removed > 0
            && let Err(e) = book.save(&self.path).await
        {
            error!(target: "Sleep", "保存作息记录失败: {:#}", e);
        }
        removed
    }

    pub fn purge_cooldowns(&self) -> usize {
        self.cooldown
            .lock()
            .map(|mut cd| cd.purge(Instant::now()))
            .unwrap_or(0)
    }
}

pub fn init(ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        let path = get_data_dir(PLUGIN_NAME).await?.join("records.json");
        let tracker = Arc::new(Tracker::open(path).await);

        if TRACKER.set(tracker.clone()).is_err() {
            return Err("sleep_tracker 已经初始化过".into());
        }

        let cooldown_tracker = tracker.clone();
        ctx.scheduler.add_interval(PURGE_INTERVAL, move || {
            let tracker = cooldown_tracker.clone();
            async move {
                let purged = tracker.purge_cooldowns();
                if purged > 0 {
                    debug!(target: "Sleep", "清理了 {} 条过期冷却", purged);
                }
            }
        });

        ctx.scheduler.add_daily_at(4, 0, 0, move || {
            let tracker = tracker.clone();
            async move {
                let removed = tracker.prune_records(Local::now()).await;
                info!(target: "Sleep", "已清理 {} 条超过 {} 天的作息记录", removed, RETENTION_DAYS);
            }
        });

        info!(target: "Sleep", "作息记录已加载");
        Ok(())
    })
}

fn matched_kind(ctx: &Context, config: &Config) -> Option<Kind> {
    let hit = |cmds: &[String]| cmds.iter().any(|c| match_command(ctx, c).is_some());
    if hit(&config.morning_commands) {
        Some(Kind::Morning)
    } else if hit(&config.night_commands) {
        Some(Kind::Night)
    } else {
        None
    }
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
        let Some(kind) = matched_kind(&ctx, &config) else {
            return Ok(Some(ctx));
        };
        let Some(tracker) = TRACKER.get() else {
            debug!(target: "Sleep", "插件未初始化，忽略 {}", kind.word());
            return Ok(Some(ctx));
        };

        respond(&ctx, writer, tracker, kind, &config, Local::now()).await?;
        Ok(None)
    })
}

/// 记录问候并引用原消息回复
async fn respond(
    ctx: &Context,
    writer: LockedWriter,
    tracker: &Tracker,
    kind: Kind,
    config: &Config,
    now: DateTime<Local>,
) -> Result<(), PluginError> {
    let Some(msg) = ctx.as_message() else {
        return Ok(());
    };
    let greeting = Greeting {
        kind,
        chat_key: msg.chat_key(),
        user_id: msg.user_id(),
        name: msg.sender_name(),
        in_group: msg.is_group(),
    };
    let reply = tracker.greet(greeting, config, now).await;

    send_msg(
        ctx,
        writer,
        msg.group_id(),
        Some(msg.user_id()),
        Message::new().reply(msg.message_id()).text(reply),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::onebot::testing::capture_writer;
    use crate::config::AppConfig;
    use crate::event::testing::{context, group_message, private_message};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, day, hour, min, 0).unwrap()
    }

    fn greeting(kind: Kind, user_id: i64) -> Greeting<'static> {
        Greeting {
            kind,
            chat_key: "group_100".to_string(),
            user_id,
            name: "小明",
            in_group: true,
        }
    }

    #[tokio::test]
    async fn night_then_morning_reports_rank_and_duration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        let tracker = Tracker::open(path.clone()).await;
        let config = Config::default();

        let night = tracker.greet(greeting(Kind::Night, 1), &config, at(1, 23, 0)).await;
        assert!(night.starts_with("晚安，小明！你是本群今天第1个睡觉的\n"));
        assert!(NIGHT_LINES.iter().any(|l| night.ends_with(l)));

        let morning = tracker
            .greet(greeting(Kind::Morning, 1), &config, at(2, 6, 45))
            .await;
        assert!(morning.starts_with("早安，小明！你是本群今天第1个起床的\n你睡了7小时45分钟\n"));

        // 每次问候后整体写盘
        let reopened = Tracker::open(path).await;
        let book = reopened.book.lock().await;
        assert_eq!(
            book.get("group_100", 1).and_then(|r| r.wake_at),
            Some(at(2, 6, 45).timestamp())
        );
    }

    #[tokio::test]
    async fn repeated_greeting_hits_cooldown() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::open(dir.path().join("records.json")).await;
        let config = Config::default();

        tracker.greet(greeting(Kind::Night, 2), &config, at(1, 23, 0)).await;
        let again = tracker.greet(greeting(Kind::Night, 2), &config, at(1, 23, 1)).await;
        assert_eq!(again, "你刚刚已经说过晚安啦");

        // 其他用户不受影响
        let other = tracker.greet(greeting(Kind::Night, 3), &config, at(1, 23, 2)).await;
        assert!(other.contains("今天第2个睡觉的"));
    }

    #[tokio::test]
    async fn private_reply_omits_group_wording() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::open(dir.path().join("records.json")).await;
        let config = Config {
            cooldown_secs: 0,
            ..Config::default()
        };
        let g = Greeting {
            kind: Kind::Night,
            chat_key: "private_9".to_string(),
            user_id: 9,
            name: "你",
            in_group: false,
        };
        let reply = tracker.greet(g, &config, at(1, 22, 0)).await;
        assert!(reply.starts_with("晚安，你！你是今天第1个睡觉的"));
    }

    #[tokio::test]
    async fn prune_records_persists_removal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        let tracker = Tracker::open(path.clone()).await;
        let config = Config::default();

        tracker.greet(greeting(Kind::Night, 1), &config, at(1, 23, 0)).await;
        assert_eq!(tracker.prune_records(at(20, 4, 0)).await, 1);

        let reopened = Tracker::open(path).await;
        assert!(reopened.book.lock().await.get("group_100", 1).is_none());
    }

    #[test]
    fn cooldown_expires_and_purges() {
        let mut cd = Cooldown::default();
        let now = Instant::now();
        let key = ("group_1".to_string(), 1, Kind::Morning);
        let ttl = Duration::from_secs(60);

        assert!(cd.try_acquire(key.clone(), ttl, now));
        assert!(!cd.try_acquire(key.clone(), ttl, now + Duration::from_secs(30)));
        assert!(cd.try_acquire(key.clone(), ttl, now + Duration::from_secs(61)));

        assert_eq!(cd.purge(now + Duration::from_secs(200)), 1);
        assert!(cd.until.is_empty());
    }

    #[test]
    fn unbounded_cooldown_never_expires() {
        let mut cd = Cooldown::default();
        let now = Instant::now();
        let key = ("group_1".to_string(), 1, Kind::Night);

        assert!(cd.try_acquire(key.clone(), Duration::MAX, now));
        assert!(!cd.try_acquire(key.clone(), Duration::MAX, now + Duration::from_secs(86400)));
        assert_eq!(cd.purge(now + Duration::from_secs(86400)), 0);
    }

    #[tokio::test]
    async fn huge_limits_do_not_panic() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::open(dir.path().join("records.json")).await;
        let config = Config {
            cooldown_secs: u64::MAX,
            max_sleep_hours: i64::MAX,
            ..Config::default()
        };
        assert_eq!(max_sleep(&config), TimeDelta::hours(FALLBACK_MAX_SLEEP_HOURS));

        tracker.greet(greeting(Kind::Night, 1), &config, at(1, 23, 0)).await;
        let morning = tracker
            .greet(greeting(Kind::Morning, 1), &config, at(2, 7, 0))
            .await;
        assert!(morning.contains("你睡了8小时0分钟"));
        let again = tracker
            .greet(greeting(Kind::Morning, 1), &config, at(2, 7, 1))
            .await;
        assert_eq!(again, "你刚刚已经说过早安啦");
    }

    #[tokio::test]
    async fn group_greeting_is_sent_as_quoted_reply() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::open(dir.path().join("records.json")).await;
        let config = Config::default();
        let (writer, sent) = capture_writer();
        let ctx = context(group_message(100, 1, "早安"), AppConfig::default());

        let kind = matched_kind(&ctx, &config).unwrap();
        respond(&ctx, writer, &tracker, kind, &config, at(2, 7, 0))
            .await
            .unwrap();

        let frames = sent.lock().await;
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["action"], "send_msg");
        assert_eq!(frame["params"]["message_type"], "group");
        assert_eq!(frame["params"]["group_id"], 100);
        assert_eq!(frame["params"]["message"][0]["type"], "reply");
        assert_eq!(frame["params"]["message"][0]["data"]["id"], "42");
        let text = frame["params"]["message"][1]["data"]["text"].as_str().unwrap();
        assert!(text.starts_with("早安，小明！你是本群今天第1个起床的"));
    }

    #[tokio::test]
    async fn private_greeting_goes_back_to_the_user() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        let tracker = Tracker::open(path.clone()).await;
        let config = Config::default();
        let (writer, sent) = capture_writer();
        let ctx = context(private_message(3003, "晚安"), AppConfig::default());

        let kind = matched_kind(&ctx, &config).unwrap();
        respond(&ctx, writer, &tracker, kind, &config, at(1, 23, 0))
            .await
            .unwrap();

        let frames = sent.lock().await;
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["params"]["message_type"], "private");
        assert_eq!(frame["params"]["user_id"], 3003);
        assert!(frame["params"]["group_id"].is_null());
        assert_eq!(frame["params"]["message"][0]["data"]["id"], "43");
        let text = frame["params"]["message"][1]["data"]["text"].as_str().unwrap();
        assert!(text.starts_with("晚安，小红！你是今天第1个睡觉的"));

        let book = SleepBook::load(&path).await;
        assert!(book.get("private_3003", 3003).and_then(|r| r.sleep_at).is_some());
    }

    #[test]
    fn commands_map_to_kinds() {
        let config = Config::default();
        let ctx = context(group_message(1, 2, "早安"), AppConfig::default());
        assert_eq!(matched_kind(&ctx, &config), Some(Kind::Morning));
        let ctx = context(group_message(1, 2, "/晚安"), AppConfig::default());
        assert_eq!(matched_kind(&ctx, &config), Some(Kind::Night));
        let ctx = context(group_message(1, 2, "晚安啦大家"), AppConfig::default());
        assert_eq!(matched_kind(&ctx, &config), None);
    }
}
