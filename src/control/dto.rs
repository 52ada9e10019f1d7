use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{HttpRequestTemplate, LoadProfile};
use crate::variables::VariableContext;

/// Inputs to the single-shot "execute one request" operation (spec.md
/// §4.10, §6). Collection/environment CRUD is out of scope (spec.md §1
/// Non-goals), so instead of resolving an `environment_id` against a store
/// this daemon doesn't own, the caller may pass an ad-hoc `variables` map
/// that is applied as the highest-precedence layer — the external UI is
/// expected to have already flattened whichever environment/collection/
/// global variables apply before calling in.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequestBody {
    pub template: HttpRequestTemplate,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub variables: Option<BTreeMap<String, String>>,
}

impl ExecuteRequestBody {
    #[must_use]
    pub fn variable_context(&self) -> VariableContext {
        let mut ctx = VariableContext::default();
        if let Some(vars) = &self.variables {
            ctx.environment = vars.clone();
        }
        ctx
    }
}

/// Inputs to `start_load_test` (spec.md §6): `comment` is free-form
/// operator annotation carried through to the run's persisted
/// `config_snapshot`, not otherwise interpreted.
#[derive(Debug, Deserialize)]
pub struct StartLoadTestBody {
    pub template: HttpRequestTemplate,
    pub profile: LoadProfile,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub variables: Option<BTreeMap<String, String>>,
}

impl StartLoadTestBody {
    #[must_use]
    pub fn variable_context(&self) -> VariableContext {
        let mut ctx = VariableContext::default();
        if let Some(vars) = &self.variables {
            ctx.environment = vars.clone();
        }
        ctx
    }
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub ok: bool,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StartLoadTestResponse {
    pub run_id: String,
    pub status: &'static str,
    pub stream_url: String,
}

#[derive(Debug, Serialize)]
pub struct StopRunResponse {
    pub status: &'static str,
}

/// Query parameters accepted by `list_runs` (spec.md §6 "optional
/// filters"). Both are applied client-side against the full list the store
/// returns — the daemon's run count is bounded by how much history an
/// operator keeps locally, not large enough to warrant SQL-side filtering.
#[derive(Debug, Deserialize, Default)]
pub struct ListRunsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub run_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_context_applies_overrides_as_environment_layer() {
        let mut vars = BTreeMap::new();
        vars.insert("host".to_owned(), "example.com".to_owned());
        let body = ExecuteRequestBody {
            template: crate::domain::HttpRequestTemplate {
                method: crate::domain::HttpMethod::Get,
                url: "http://{{host}}/".to_owned(),
                headers: Vec::new(),
                body: crate::domain::BodySource::None,
                auth: crate::domain::AuthConfig::None,
                pre_script: None,
                test_script: None,
                timeout_ms: 1_000,
                follow_redirects: true,
                max_redirects: 5,
                verify_tls: true,
            },
            environment_id: None,
            variables: Some(vars),
        };
        let ctx = body.variable_context();
        assert_eq!(ctx.get("host"), Some("example.com"));
    }
}
