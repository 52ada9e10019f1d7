use serde::{Deserialize, Serialize};

/// One `pm.test(name, fn)` invocation's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    pub error_message: Option<String>,
}

/// What a `pre_script` or `test_script` run produced: spec.md §4.5.
/// `success` is false if any test failed or an exception escaped the
/// wrapping IIFE — a thrown error inside the top-level body, not caught by
/// any `pm.test`, still marks the whole result failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptResult {
    pub success: bool,
    pub tests: Vec<TestOutcome>,
    pub console_output: Vec<String>,
    pub error_message: Option<String>,
}

impl ScriptResult {
    #[must_use]
    pub fn ok(tests: Vec<TestOutcome>, console_output: Vec<String>) -> Self {
        let success = tests.iter().all(|t| t.passed);
        Self {
            success,
            tests,
            console_output,
            error_message: None,
        }
    }

    #[must_use]
    pub fn failed(
        tests: Vec<TestOutcome>,
        console_output: Vec<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            tests,
            console_output,
            error_message: Some(error_message.into()),
        }
    }
}
