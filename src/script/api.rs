use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rquickjs::{Ctx, Function, Object};

use crate::domain::{ResolvedRequest, ResponseRecord};

use super::result::TestOutcome;

type Tests = Arc<Mutex<Vec<TestOutcome>>>;
type Console = Arc<Mutex<Vec<String>>>;
type Environment = Arc<Mutex<BTreeMap<String, String>>>;

fn poisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Rebinds the `console.{log,info,warn,error}` functions against a fresh
/// output buffer; called once per script invocation so each run's captured
/// output starts empty.
pub fn bind_console(ctx: &Ctx<'_>, output: Console) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    for level in ["log", "info", "warn", "error"] {
        let output = output.clone();
        let level_owned = level.to_owned();
        let func = Function::new(ctx.clone(), move |rest: rquickjs::function::Rest<rquickjs::Value<'_>>| {
            let joined = rest
                .0
                .iter()
                .map(|v| v.to_string().unwrap_or_else(|_| "<unprintable>".to_owned()))
                .collect::<Vec<_>>()
                .join(" ");
            poisoned(&output).push(format!("[{level_owned}] {joined}"));
        })?;
        console.set(level, func)?;
    }
    ctx.globals().set("console", console)?;
    Ok(())
}

/// Rebinds `pm.test` against a fresh test-outcome buffer.
pub fn bind_test(ctx: &Ctx<'_>, pm: &Object<'_>, tests: Tests) -> rquickjs::Result<()> {
    let test_fn = Function::new(ctx.clone(), move |ctx: Ctx<'_>, name: String, func: Function<'_>| {
        let outcome = match func.call::<(), ()>(()) {
            Ok(()) => TestOutcome {
                name,
                passed: true,
                error_message: None,
            },
            Err(err) => TestOutcome {
                name,
                passed: false,
                error_message: Some(describe_exception(&ctx, &err)),
            },
        };
        poisoned(&tests).push(outcome);
    })?;
    pm.set("test", test_fn)
}

/// Rebinds `pm.environment.get/set` against the run's shared environment
/// map. Mutations are in-memory only, per spec.md §4.5 — persistence
/// happens (if at all) when the coordinator folds the final environment
/// state back in on a successful run.
pub fn bind_environment(ctx: &Ctx<'_>, pm: &Object<'_>, environment: Environment) -> rquickjs::Result<()> {
    let env_obj = Object::new(ctx.clone())?;

    let env_for_get = environment.clone();
    let get_fn = Function::new(ctx.clone(), move |key: String| poisoned(&env_for_get).get(&key).cloned())?;
    env_obj.set("get", get_fn)?;

    let set_fn = Function::new(ctx.clone(), move |key: String, value: String| {
        poisoned(&environment).insert(key, value);
    })?;
    env_obj.set("set", set_fn)?;

    pm.set("environment", env_obj)
}

/// Builds the `pm.request` object (read-only snapshot of the resolved
/// request being sent or already sent).
pub fn bind_request(ctx: &Ctx<'_>, pm: &Object<'_>, request: &ResolvedRequest) -> rquickjs::Result<()> {
    let obj = Object::new(ctx.clone())?;
    obj.set("url", request.url.clone())?;
    obj.set("method", request.method.as_str())?;
    obj.set("body", String::from_utf8_lossy(&request.body).into_owned())?;

    let headers_obj = Object::new(ctx.clone())?;
    for (name, value) in &request.headers {
        headers_obj.set(name.as_str(), value.as_str())?;
    }
    obj.set("headers", headers_obj)?;

    pm.set("request", obj)
}

/// Builds the `pm.response` object; only present for `test_script` runs —
/// `pre_script` runs never call this.
pub fn bind_response(ctx: &Ctx<'_>, pm: &Object<'_>, response: &ResponseRecord) -> rquickjs::Result<()> {
    let obj = Object::new(ctx.clone())?;
    obj.set("code", response.status)?;
    obj.set("status", response.status)?;
    obj.set("responseTime", response.timing.total_ms)?;

    let headers_obj = Object::new(ctx.clone())?;
    for (name, value) in &response.response_headers {
        headers_obj.set(name.as_str(), value.as_str())?;
    }
    let headers_for_get = response.response_headers.clone();
    let get_fn = Function::new(ctx.clone(), move |name: String| {
        headers_for_get
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
            .map(|(_, v)| v.clone())
    })?;
    headers_obj.set("get", get_fn)?;
    obj.set("headers", headers_obj)?;

    let body_for_text = response.body_bytes.clone();
    let text_fn = Function::new(ctx.clone(), move || String::from_utf8_lossy(&body_for_text).into_owned())?;
    obj.set("text", text_fn)?;

    let body_for_json = response.body_bytes.clone();
    let json_fn = Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<rquickjs::Value<'_>> {
        let json_global: Object = ctx.globals().get("JSON")?;
        let parse: Function = json_global.get("parse")?;
        let text = String::from_utf8_lossy(&body_for_json).into_owned();
        parse.call((text,))
    })?;
    obj.set("json", json_fn)?;

    pm.set("response", obj)
}

/// Extracts a human-readable message from a thrown JS exception, falling
/// back to the error's own `Display` for non-exception QuickJS errors
/// (syntax errors, interrupted execution, and the like).
pub fn describe_exception(ctx: &Ctx<'_>, err: &rquickjs::Error) -> String {
    if matches!(err, rquickjs::Error::Exception) {
        let exception = ctx.catch();
        if let Some(obj) = exception.as_object() {
            if let Ok(message) = obj.get::<_, String>("message") {
                return message;
            }
        }
        exception
            .as_string()
            .and_then(|s| s.to_string().ok())
            .unwrap_or_else(|| "script raised a non-string exception".to_owned())
    } else {
        err.to_string()
    }
}
