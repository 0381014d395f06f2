use crate::warn;
use anyhow::Context as _;
use chrono::{DateTime, Local, TimeDelta, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// 单个用户在某个会话中的最近一次作息，时间为 Unix 秒
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<i64>,
}

/// 作息簿：`会话键 -> 用户 ID -> 记录`，整体读写一个 JSON 文件
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SleepBook {
    chats: BTreeMap<String, BTreeMap<String, Record>>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct WakeOutcome {
    /// 本会话今天第几个起床
    pub rank: usize,
    /// 可信的睡眠时长
    pub slept: Option<TimeDelta>,
}

fn on_same_day(ts: Option<i64>, now: &DateTime<Local>) -> bool {
    ts.and_then(|t| Local.timestamp_opt(t, 0).single())
        .is_some_and(|t| t.date_naive() == now.date_naive())
}

impl SleepBook {
    /// 读取作息簿。文件不存在或已损坏时返回空簿
    pub async fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(target: "Sleep", "读取作息记录 {} 失败: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(book) => book,
            Err(e) => {
                warn!(target: "Sleep", "作息记录 {} 已损坏，重新开始记录: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("创建目录 {} 失败", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .await
            .with_context(|| format!("写入 {} 失败", path.display()))?;
        Ok(())
    }

    /// 删除两项时间都早于 `before` 的记录，以及因此变空的会话。返回删除条数
    pub fn prune(&mut self, before: i64) -> usize {
        let stale = |t: Option<i64>| t.is_none_or(|t| t < before);
        let mut removed = 0;
        for users in self.chats.values_mut() {
            let len = users.len();
            users.retain(|_, r| !(stale(r.sleep_at) && stale(r.wake_at)));
            removed += len - users.len();
        }
        self.chats.retain(|_, users| !users.is_empty());
        removed
    }

    #[cfg(test)]
    pub fn get(&self, chat_key: &str, user_id: i64) -> Option<&Record> {
        self.chats.get(chat_key)?.get(&user_id.to_string())
    }

    fn entry(&mut self, chat_key: &str, user_id: i64) -> &mut Record {
        self.chats
            .entry(chat_key.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_default()
    }

    fn count_today(
        &self,
        chat_key: &str,
        now: &DateTime<Local>,
        pick: fn(&Record) -> Option<i64>,
    ) -> usize {
        self.chats
            .get(chat_key)
            .map(|users| users.values().filter(|r| on_same_day(pick(r), now)).count())
            .unwrap_or(0)
    }

    /// 记录入睡，返回本会话今天第几个睡觉
    pub fn record_sleep(&mut self, chat_key: &str, user_id: i64, now: DateTime<Local>) -> usize {
        self.entry(chat_key, user_id).sleep_at = Some(now.timestamp());
        self.count_today(chat_key, &now, |r| r.sleep_at)
    }

    /// 记录起床。入睡时间晚于上次起床且不超过 `max_sleep` 时才计算睡眠时长
    pub fn record_wake(
        &mut self,
        chat_key: &str,
        user_id: i64,
        now: DateTime<Local>,
        max_sleep: TimeDelta,
    ) -> WakeOutcome {
        let ts = now.timestamp();
        let record = self.entry(chat_key, user_id);

        let slept = match record.sleep_at {
            Some(sleep_at) if record.wake_at.is_none_or(|w| sleep_at > w) => {
                let d = TimeDelta::seconds(ts - sleep_at);
                (d > TimeDelta::zero() && d < max_sleep).then_some(d)
            }
            _ => None,
        };
        record.wake_at = Some(ts);

        WakeOutcome {
            rank: self.count_today(chat_key, &now, |r| r.wake_at),
            slept,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, day, hour, min, 0).unwrap()
    }

    #[test]
    fn sleep_rank_counts_today_only() {
        let mut book = SleepBook::default();
        assert_eq!(book.record_sleep("group_1", 10, at(1, 23, 0)), 1);
        // 次日的第一个睡觉的人不计入前一天
        assert_eq!(book.record_sleep("group_1", 11, at(2, 22, 0)), 1);
        assert_eq!(book.record_sleep("group_1", 12, at(2, 23, 0)), 2);
        // 其他会话互不影响
        assert_eq!(book.record_sleep("group_2", 10, at(2, 23, 30)), 1);
    }

    #[test]
    fn wake_reports_duration_after_sleep() {
        let mut book = SleepBook::default();
        book.record_sleep("private_5", 5, at(1, 23, 0));
        let out = book.record_wake("private_5", 5, at(2, 7, 30), TimeDelta::hours(24));
        assert_eq!(out.rank, 1);
        assert_eq!(out.slept, Some(TimeDelta::minutes(8 * 60 + 30)));

        // 没有新的入睡记录，第二次起床不再计算
        let again = book.record_wake("private_5", 5, at(2, 9, 0), TimeDelta::hours(24));
        assert_eq!(again.slept, None);
    }

    #[test]
    fn stale_sleep_is_ignored() {
        let mut book = SleepBook::default();
        book.record_sleep("group_1", 1, at(1, 22, 0));
        let out = book.record_wake("group_1", 1, at(3, 8, 0), TimeDelta::hours(24));
        assert_eq!(out.slept, None);
        assert_eq!(book.get("group_1", 1).unwrap().wake_at, Some(at(3, 8, 0).timestamp()));
    }

    #[test]
    fn prune_drops_old_records_and_empty_chats() {
        let mut book = SleepBook::default();
        book.record_sleep("group_1", 1, at(1, 23, 0));
        book.record_sleep("group_2", 2, at(1, 23, 0));
        book.record_wake("group_2", 2, at(9, 7, 0), TimeDelta::hours(24));

        assert_eq!(book.prune(at(5, 0, 0).timestamp()), 1);
        assert!(!book.chats.contains_key("group_1"));
        assert!(book.get("group_2", 2).is_some());
    }

    #[tokio::test]
    async fn save_then_load_keeps_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sleep_tracker").join("records.json");

        let mut book = SleepBook::default();
        book.record_sleep("group_9", 42, at(1, 23, 0));
        book.save(&path).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["group_9"]["42"]["sleep_at"], at(1, 23, 0).timestamp());

        let loaded = SleepBook::load(&path).await;
        assert_eq!(
            loaded.get("group_9", 42).and_then(|r| r.sleep_at),
            Some(at(1, 23, 0).timestamp())
        );
    }

    #[tokio::test]
    async fn missing_or_corrupt_file_gives_empty_book() {
        let dir = tempdir().unwrap();
        let missing = SleepBook::load(&dir.path().join("none.json")).await;
        assert!(missing.get("group_1", 1).is_none());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        let book = SleepBook::load(&broken).await;
        assert!(book.chats.is_empty());
    }
}
