//! Applies environment/collection/global variables to a request template
//! immediately before dispatch, producing a `ResolvedRequest`. The
//! `{{name}}` interpolation syntax itself is an external contract (spec.md
//! §1 lists it as used-but-not-defined here); this module implements the
//! simplest faithful reading of it: literal substring replacement of
//! `{{name}}` tokens, left unresolved if no variable matches.

use std::collections::BTreeMap;

use crate::domain::{BodySource, HttpRequestTemplate, ResolvedRequest};
use crate::error::ValidationError;

/// Layered variable context: globals are overridden by collection
/// variables, which are overridden by the active environment, mirroring
/// the precedence order of the external UI this core is embedded in.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub globals: BTreeMap<String, String>,
    pub collection: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
}

impl VariableContext {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.environment
            .get(name)
            .or_else(|| self.collection.get(name))
            .or_else(|| self.globals.get(name))
            .map(String::as_str)
    }

    pub fn set_environment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(key.into(), value.into());
    }
}

/// Replaces every `{{name}}` occurrence in `input` with its resolved value.
/// Unresolved placeholders are left verbatim — treating a missing variable
/// as fatal would make single-shot design runs unusable against partially
/// configured environments.
#[must_use]
pub fn interpolate(input: &str, ctx: &VariableContext) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = input[i + 2..].find("}}") {
                let name = input[i + 2..i + 2 + end].trim();
                if let Some(value) = ctx.get(name) {
                    out.push_str(value);
                } else {
                    out.push_str(&input[i..i + 2 + end + 2]);
                }
                i += 2 + end + 2;
                continue;
            }
        }
        let ch = input[i..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Resolves a `HttpRequestTemplate` against a `VariableContext`. Same
/// template + same context must always yield byte-identical output (R2).
///
/// # Errors
///
/// Returns an error if the interpolated URL is empty.
pub fn resolve(
    template: &HttpRequestTemplate,
    ctx: &VariableContext,
) -> Result<ResolvedRequest, ValidationError> {
    let url = interpolate(&template.url, ctx);
    if url.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let headers = template
        .headers
        .iter()
        .map(|(k, v)| (interpolate(k, ctx), interpolate(v, ctx)))
        .collect();

    let body = match &template.body {
        BodySource::None => Vec::new(),
        BodySource::Json { content }
        | BodySource::Text { content }
        | BodySource::FormUrlEncoded { content }
        | BodySource::Binary { content } => interpolate_bytes(content, ctx),
        BodySource::Multipart { content, .. } => interpolate_bytes(content, ctx),
    };

    Ok(ResolvedRequest {
        method: template.method,
        url,
        headers,
        body,
        auth: template.auth.clone(),
        timeout_ms: template.timeout_ms,
        follow_redirects: template.follow_redirects,
        max_redirects: template.max_redirects,
        verify_tls: template.verify_tls,
    })
}

/// Interpolates variables inside a byte body, assuming UTF-8 text content.
/// Binary bodies with non-UTF-8 content pass through unchanged since there
/// is no placeholder syntax to find.
fn interpolate_bytes(content: &[u8], ctx: &VariableContext) -> Vec<u8> {
    match std::str::from_utf8(content) {
        Ok(text) => interpolate(text, ctx).into_bytes(),
        Err(_) => content.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuthConfig, HttpMethod};

    fn ctx() -> VariableContext {
        let mut ctx = VariableContext::default();
        ctx.globals.insert("host".to_owned(), "global.example.com".to_owned());
        ctx.collection.insert("host".to_owned(), "collection.example.com".to_owned());
        ctx.environment.insert("token".to_owned(), "abc123".to_owned());
        ctx
    }

    #[test]
    fn environment_overrides_collection_overrides_globals() {
        let ctx = ctx();
        assert_eq!(ctx.get("host"), Some("collection.example.com"));
    }

    #[test]
    fn interpolates_known_variable() {
        let ctx = ctx();
        assert_eq!(
            interpolate("https://{{host}}/api", &ctx),
            "https://collection.example.com/api"
        );
    }

    #[test]
    fn leaves_unknown_placeholder_verbatim() {
        let ctx = ctx();
        assert_eq!(interpolate("{{missing}}", &ctx), "{{missing}}");
    }

    #[test]
    fn resolving_twice_is_byte_identical() -> Result<(), String> {
        let ctx = ctx();
        let template = HttpRequestTemplate {
            method: HttpMethod::Get,
            url: "https://{{host}}/x?auth={{token}}".to_owned(),
            headers: vec![("X-Token".to_owned(), "{{token}}".to_owned())],
            body: BodySource::None,
            auth: AuthConfig::None,
            pre_script: None,
            test_script: None,
            timeout_ms: 1000,
            follow_redirects: true,
            max_redirects: 5,
            verify_tls: true,
        };
        let a = resolve(&template, &ctx).map_err(|e| e.to_string())?;
        let b = resolve(&template, &ctx).map_err(|e| e.to_string())?;
        assert_eq!(a.url, b.url);
        assert_eq!(a.headers, b.headers);
        assert_eq!(a.body, b.body);
        Ok(())
    }
}
