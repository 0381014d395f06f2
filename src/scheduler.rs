use crate::info;
use chrono::{DateTime, Local, TimeZone};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;

/// 全局定时任务管理器
pub struct Scheduler {
    tasks: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 添加一个灵活调度任务
    ///
    /// - `next_run_calculator`: 接收当前时间，返回下一次执行时间；返回 None 时任务停止。
    /// - `task_gen`: 每次触发时生成要执行的 Future。
    pub fn add_schedule<C, F, Fut>(&self, mut next_run_calculator: C, mut task_gen: F) -> u64
    where
        C: FnMut(DateTime<Local>) -> Option<DateTime<Local>> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut next_time = next_run_calculator(Local::now());

        let handle = tokio::spawn(async move {
            while let Some(target_time) = next_time {
                let now = Local::now();
                if target_time > now {
                    let duration = (target_time - now).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(duration).await;
                }

                task_gen().await;

                next_time = next_run_calculator(Local::now());
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(id, handle.abort_handle());
        }
        id
    }

    /// 固定间隔执行
    pub fn add_interval<F, Fut>(&self, duration: Duration, task_gen: F) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::seconds(60));
        self.add_schedule(move |now| Some(now + step), task_gen)
    }

    /// 每天在本地时间 HH:MM:SS 执行
    pub fn add_daily_at<F, Fut>(&self, hour: u32, minute: u32, second: u32, task_gen: F) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_schedule(move |now| next_daily_run(now, hour, minute, second), task_gen)
    }

    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            info!(target: "Scheduler", "正在清理 {} 个定时任务...", tasks.len());
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}

/// 下一次到达 HH:MM:SS 的时刻；今天已过或该时刻不存在 (夏令时跳变) 时顺延到明天
fn next_daily_run(now: DateTime<Local>, hour: u32, minute: u32, second: u32) -> Option<DateTime<Local>> {
    let today = now.date_naive();
    let at = |day: chrono::NaiveDate| {
        day.and_hms_opt(hour, minute, second)
            .and_then(|t| Local.from_local_datetime(&t).single())
    };

    match at(today) {
        Some(target) if target > now => Some(target),
        _ => at(today.succ_opt()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn interval_runs_until_shutdown() {
        let scheduler = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        scheduler.add_interval(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown();
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn daily_run_rolls_over_to_tomorrow() {
        let morning = Local.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();
        let next = next_daily_run(morning, 4, 0, 0).unwrap();
        assert_eq!(next, Local.with_ymd_and_hms(2026, 3, 1, 4, 0, 0).unwrap());

        let evening = Local.with_ymd_and_hms(2026, 3, 1, 5, 0, 0).unwrap();
        let next = next_daily_run(evening, 4, 0, 0).unwrap();
        assert_eq!(next, Local.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap());

        assert!(next_daily_run(evening, 25, 0, 0).is_none());
    }

    #[tokio::test]
    async fn schedule_stops_when_calculator_returns_none() {
        let scheduler = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut fired = false;

        let counter = hits.clone();
        scheduler.add_schedule(
            move |now| {
                if fired {
                    None
                } else {
                    fired = true;
                    Some(now)
                }
            },
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }
}
