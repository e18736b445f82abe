//! Demonstration handlers served by the `rpcpiped` binary.

use std::thread;
use std::time::Duration;

use rpcpipe_protocol::RequestId;
use rpcpipe_protocol::notifications::ProgressParams;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::handler::{HandlerError, HandlerRegistry, RegistryError, RequestContext};

const BUILTIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::builtin");
const SLEEP_STEPS: u32 = 4;

/// Returns a registry holding `echo` and `sleep`.
///
/// `echo` answers with its parameters. `sleep` waits `params.millis`
/// milliseconds, emitting `notifications/progress` along the way when the
/// request carries `params._meta.progressToken`.
///
/// # Errors
///
/// Returns a [`RegistryError`] if registration fails.
pub fn builtin_registry() -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();
    registry.register("echo", echo)?;
    registry.register("sleep", sleep)?;
    Ok(registry)
}

fn echo(params: Option<Value>, _: &RequestContext) -> Result<Value, HandlerError> {
    Ok(params.unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct SleepParams {
    millis: u64,
    #[serde(default, rename = "_meta")]
    meta: Option<SleepMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SleepMeta {
    progress_token: Option<RequestId>,
}

fn sleep(params: Option<Value>, context: &RequestContext) -> Result<Value, HandlerError> {
    let parsed: SleepParams = serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|error| HandlerError::invalid_params(error.to_string()))?;
    let token = parsed.meta.and_then(|meta| meta.progress_token);
    let step = Duration::from_millis(parsed.millis)
        .checked_div(SLEEP_STEPS)
        .unwrap_or_default();

    for completed in 1..=SLEEP_STEPS {
        thread::sleep(step);
        let Some(progress_token) = token.clone() else {
            continue;
        };
        let report = ProgressParams {
            progress_token,
            progress: f64::from(completed),
            total: Some(f64::from(SLEEP_STEPS)),
            message: None,
        };
        if let Err(error) = context.notifier().progress(&report) {
            debug!(
                target: BUILTIN_TARGET,
                id = %context.id(),
                error = %error,
                "progress notification dropped"
            );
        }
    }
    Ok(json!({ "slept": parsed.millis }))
}

#[cfg(test)]
mod tests {
    use std::io;

    use rstest::rstest;
    use rpcpipe_transport::WriteSerializer;

    use super::*;
    use crate::notify::NotificationSender;

    fn context() -> RequestContext {
        RequestContext::new(
            RequestId::from(1),
            "sleep".to_owned(),
            NotificationSender::new(WriteSerializer::new(io::sink())),
        )
    }

    #[rstest]
    fn registry_holds_both_builtins() {
        let registry = builtin_registry().expect("builtins register");

        assert!(registry.contains("echo"));
        assert!(registry.contains("sleep"));
    }

    #[rstest]
    fn echo_returns_params() {
        let value = echo(Some(json!({"a": [1, 2]})), &context()).expect("echo");

        assert_eq!(value, json!({"a": [1, 2]}));
    }

    #[rstest]
    fn sleep_rejects_missing_millis() {
        let error = sleep(Some(json!({})), &context()).expect_err("missing millis");

        assert!(matches!(error, HandlerError::InvalidParams { .. }));
    }

    #[rstest]
    fn sleep_reports_duration() {
        let value = sleep(
            Some(json!({"millis": 4, "_meta": {"progressToken": "p"}})),
            &context(),
        )
        .expect("sleep");

        assert_eq!(value, json!({"slept": 4}));
    }
}
