use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rquickjs::Object;

use crate::domain::{ResolvedRequest, ResponseRecord};
use crate::error::ScriptError;

use super::api::{bind_console, bind_environment, bind_request, bind_response, bind_test};
use super::pool::ContextPool;
use super::result::ScriptResult;

/// Runs `pre_script`/`test_script` bodies against a pool of QuickJS
/// contexts. Every call happens inside `tokio::task::spawn_blocking` —
/// QuickJS execution is synchronous CPU work and must never run on the
/// reactor alongside in-flight HTTP requests (spec.md §4.5, §5).
pub struct Sandbox {
    pool: Arc<ContextPool>,
}

impl Sandbox {
    /// # Errors
    ///
    /// Returns an error if the underlying context pool fails to build.
    pub fn new(
        pool_size: usize,
        recycle_after: u32,
        memory_limit_bytes: usize,
        max_stack_size_bytes: usize,
    ) -> Result<Self, ScriptError> {
        let pool = ContextPool::new(pool_size, recycle_after, memory_limit_bytes, max_stack_size_bytes)?;
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Runs `script` before dispatch. No `pm.response` is bound — scripts
    /// that reference it see `undefined`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptError` when the script exceeds its deadline, exhausts
    /// the context pool, or the interpreter reports a non-exception fault.
    /// A caught or uncaught JS exception is reported as a failed
    /// `ScriptResult`, not an `Err` — spec.md §7 treats pre-script failure
    /// as the caller's decision to abort dispatch, not the sandbox's.
    pub async fn run_pre(
        &self,
        script: String,
        request: ResolvedRequest,
        environment: Arc<Mutex<BTreeMap<String, String>>>,
        deadline_ms: u64,
    ) -> Result<ScriptResult, ScriptError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || execute(&pool, &script, &request, None, environment, deadline_ms))
            .await
            .map_err(|source| ScriptError::Interpreter {
                message: source.to_string(),
            })?
    }

    /// Runs `script` after a response is available.
    ///
    /// # Errors
    ///
    /// See [`Sandbox::run_pre`].
    pub async fn run_test(
        &self,
        script: String,
        request: ResolvedRequest,
        response: ResponseRecord,
        environment: Arc<Mutex<BTreeMap<String, String>>>,
        deadline_ms: u64,
    ) -> Result<ScriptResult, ScriptError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || execute(&pool, &script, &request, Some(&response), environment, deadline_ms))
            .await
            .map_err(|source| ScriptError::Interpreter {
                message: source.to_string(),
            })?
    }
}

fn execute(
    pool: &ContextPool,
    script: &str,
    request: &ResolvedRequest,
    response: Option<&ResponseRecord>,
    environment: Arc<Mutex<BTreeMap<String, String>>>,
    deadline_ms: u64,
) -> Result<ScriptResult, ScriptError> {
    let pooled = pool.acquire()?;
    let tests = Arc::new(Mutex::new(Vec::new()));
    let console_output = Arc::new(Mutex::new(Vec::new()));
    let deadline = Instant::now() + Duration::from_millis(deadline_ms.max(1));

    pool.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));

    let wrapped = format!("(function () {{\n{script}\n}})();");
    let eval_result: rquickjs::Result<()> = pooled.context.with(|ctx| {
        bind_console(&ctx, console_output.clone())?;
        let pm: Object = ctx.globals().get("pm")?;
        bind_test(&ctx, &pm, tests.clone())?;
        bind_environment(&ctx, &pm, environment)?;
        bind_request(&ctx, &pm, request)?;
        match response {
            Some(response) => bind_response(&ctx, &pm, response)?,
            None => pm.set("response", rquickjs::Undefined)?,
        }
        ctx.eval::<(), _>(wrapped.as_bytes())
    });

    let deadline_exceeded = Instant::now() >= deadline;
    pool.set_interrupt_handler(None);
    pool.release(pooled);

    let collected_tests = std::mem::take(&mut *tests.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
    let collected_console = std::mem::take(&mut *console_output.lock().unwrap_or_else(std::sync::PoisonError::into_inner));

    match eval_result {
        Ok(()) => Ok(ScriptResult::ok(collected_tests, collected_console)),
        Err(_) if deadline_exceeded => Err(ScriptError::DeadlineExceeded { deadline_ms }),
        Err(rquickjs::Error::Exception) => Ok(ScriptResult::failed(
            collected_tests,
            collected_console,
            "uncaught exception escaped the script body",
        )),
        Err(source) => Err(ScriptError::Interpreter {
            message: source.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuthConfig, HttpMethod, Timing};

    fn request() -> ResolvedRequest {
        ResolvedRequest {
            method: HttpMethod::Get,
            url: "http://example.test/".to_owned(),
            headers: Vec::new(),
            body: Vec::new(),
            auth: AuthConfig::None,
            timeout_ms: 1_000,
            follow_redirects: false,
            max_redirects: 0,
            verify_tls: true,
        }
    }

    fn response(status: u16) -> ResponseRecord {
        ResponseRecord {
            status,
            status_text: "OK".to_owned(),
            response_headers: vec![("content-type".to_owned(), "application/json".to_owned())],
            body_bytes: br#"{"ok":true}"#.to_vec(),
            body_size: 11,
            timing: Timing::default(),
            request_headers_sent: Vec::new(),
            raw_request_bytes: 0,
            error: crate::domain::ErrorKind::None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn passing_assertion_marks_result_successful() -> Result<(), String> {
        let sandbox = Sandbox::new(2, 500, 16 * 1024 * 1024, 1024 * 1024).map_err(|e| e.to_string())?;
        let environment = Arc::new(Mutex::new(BTreeMap::new()));
        let script = "pm.test('status is 200', () => pm.expect(pm.response.code).to.equal(200));".to_owned();

        let result = sandbox
            .run_test(script, request(), response(200), environment, 500)
            .await
            .map_err(|e| e.to_string())?;

        assert!(result.success);
        assert_eq!(result.tests.len(), 1);
        assert!(result.tests[0].passed);
        Ok(())
    }

    #[tokio::test]
    async fn failing_assertion_records_failed_test_without_erroring() -> Result<(), String> {
        let sandbox = Sandbox::new(2, 500, 16 * 1024 * 1024, 1024 * 1024).map_err(|e| e.to_string())?;
        let environment = Arc::new(Mutex::new(BTreeMap::new()));
        let script = "pm.test('status is 404', () => pm.expect(pm.response.code).to.equal(404));".to_owned();

        let result = sandbox
            .run_test(script, request(), response(200), environment, 500)
            .await
            .map_err(|e| e.to_string())?;

        assert!(!result.success);
        assert!(!result.tests[0].passed);
        Ok(())
    }

    #[tokio::test]
    async fn environment_mutation_is_visible_to_caller() -> Result<(), String> {
        let sandbox = Sandbox::new(2, 500, 16 * 1024 * 1024, 1024 * 1024).map_err(|e| e.to_string())?;
        let environment = Arc::new(Mutex::new(BTreeMap::new()));
        let script = "pm.environment.set('token', 'abc123');".to_owned();

        sandbox
            .run_pre(script, request(), environment.clone(), 500)
            .await
            .map_err(|e| e.to_string())?;

        let guard = environment.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(guard.get("token").map(String::as_str), Some("abc123"));
        Ok(())
    }

    #[tokio::test]
    async fn console_output_is_captured() -> Result<(), String> {
        let sandbox = Sandbox::new(2, 500, 16 * 1024 * 1024, 1024 * 1024).map_err(|e| e.to_string())?;
        let environment = Arc::new(Mutex::new(BTreeMap::new()));
        let script = "console.log('hello', 'world');".to_owned();

        let result = sandbox
            .run_pre(script, request(), environment, 500)
            .await
            .map_err(|e| e.to_string())?;

        assert_eq!(result.console_output, vec!["[log] hello world".to_owned()]);
        Ok(())
    }

    #[tokio::test]
    async fn deadline_exceeded_reports_script_error() -> Result<(), String> {
        let sandbox = Sandbox::new(2, 500, 16 * 1024 * 1024, 1024 * 1024).map_err(|e| e.to_string())?;
        let environment = Arc::new(Mutex::new(BTreeMap::new()));
        let script = "while (true) {}".to_owned();

        let result = sandbox.run_pre(script, request(), environment, 20).await;

        assert!(matches!(result, Err(ScriptError::DeadlineExceeded { .. })));
        Ok(())
    }
}
