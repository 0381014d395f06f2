use super::{LockedWriter, send_frame_raw};
use crate::event::Context;
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub type ApiError = Box<dyn std::error::Error + Send + Sync>;

const API_TIMEOUT: Duration = Duration::from_secs(30);

static ECHO_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_echo() -> String {
    let count = ECHO_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("api-req-{}", count)
}

#[derive(Serialize)]
struct ApiRequest<T> {
    action: String,
    params: T,
    echo: String,
}

/// 通用 API 调用：发送动作并等待同 echo 的响应，返回 data 字段
pub async fn call_action<P, R>(
    ctx: &Context,
    writer: LockedWriter,
    action: &str,
    params: P,
) -> Result<R, ApiError>
where
    P: Serialize,
    R: serde::de::DeserializeOwned,
{
    let echo = next_echo();
    let req = ApiRequest {
        action: action.to_string(),
        params,
        echo: echo.clone(),
    };
    let json_str = simd_json::to_string(&req)?;

    // 先注册再发送，避免响应先于注册到达
    let rx = ctx.matcher.register(echo.clone()).await;
    send_frame_raw(writer, json_str).await?;

    let resp_event = ctx
        .matcher
        .wait_resp(&echo, rx, API_TIMEOUT)
        .await
        .ok_or("API 请求超时")?;

    let retcode = resp_event
        .get_i64("retcode")
        .or_else(|| resp_event.get_u64("retcode").map(|v| v as i64))
        .unwrap_or(-1);

    if retcode != 0 {
        let msg = resp_event
            .get_str("wording")
            .or_else(|| resp_event.get_str("msg"))
            .unwrap_or("Unknown Error");
        return Err(format!("API 调用失败 (retcode={}): {}", retcode, msg).into());
    }

    let data_val = resp_event
        .get("data")
        .cloned()
        .unwrap_or(OwnedValue::from(()));

    Ok(simd_json::serde::from_owned_value(data_val)?)
}

// --- get_login_info ---

#[derive(Serialize)]
struct GetLoginInfoParams {}

#[derive(Debug, Deserialize)]
pub struct LoginInfo {
    pub user_id: i64,
    pub nickname: String,
}

pub async fn get_login_info(ctx: &Context, writer: LockedWriter) -> Result<LoginInfo, ApiError> {
    call_action(ctx, writer, "get_login_info", GetLoginInfoParams {}).await
}
