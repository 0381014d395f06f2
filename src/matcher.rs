use crate::event::Event;
use simd_json::derived::ValueObjectAccessAsScalar;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};

/// API 响应匹配器：按 echo 把 OneBot 的动作响应送回调用方
pub struct Matcher {
    waiters: AsyncMutex<HashMap<String, oneshot::Sender<Event>>>,
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            waiters: AsyncMutex::new(HashMap::new()),
        }
    }

    /// 注册一个响应等待者，需在发送请求之前调用
    pub async fn register(&self, echo: String) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(echo, tx);
        rx
    }

    /// 等待已注册的响应，超时后清理等待者
    pub async fn wait_resp(
        &self,
        echo: &str,
        rx: oneshot::Receiver<Event>,
        timeout_duration: Duration,
    ) -> Option<Event> {
        match tokio::time::timeout(timeout_duration, rx).await {
            Ok(Ok(event)) => Some(event),
            _ => {
                self.waiters.lock().await.remove(echo);
                None
            }
        }
    }

    /// 尝试分发事件。被等待者消费时返回 None，否则原样返还
    pub async fn dispatch(&self, event: Event) -> Option<Event> {
        let echo = match event.get_str("echo") {
            Some(e) => e.to_string(),
            None => return Some(event),
        };

        let waiter = self.waiters.lock().await.remove(&echo);
        match waiter {
            Some(sender) => {
                // 等待者可能已超时，忽略发送失败
                let _ = sender.send(event);
                None
            }
            None => Some(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(echo: &str) -> Event {
        let mut raw = format!(r#"{{"status":"ok","retcode":0,"data":{{}},"echo":"{}"}}"#, echo)
            .into_bytes();
        simd_json::to_owned_value(&mut raw).unwrap()
    }

    #[tokio::test]
    async fn dispatch_routes_response_to_waiter() {
        let matcher = Matcher::new();
        let rx = matcher.register("api-req-1".to_string()).await;

        assert!(matcher.dispatch(response("api-req-1")).await.is_none());
        let got = matcher
            .wait_resp("api-req-1", rx, Duration::from_secs(1))
            .await;
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn unmatched_events_pass_through() {
        let matcher = Matcher::new();
        assert!(matcher.dispatch(response("nobody")).await.is_some());
    }

    #[tokio::test]
    async fn timeout_cleans_up_waiter() {
        let matcher = Matcher::new();
        let rx = matcher.register("slow".to_string()).await;
        let got = matcher
            .wait_resp("slow", rx, Duration::from_millis(10))
            .await;
        assert!(got.is_none());
        // 超时后迟到的响应不再被吞掉
        assert!(matcher.dispatch(response("slow")).await.is_some());
    }
}
