use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(crate::error::ValidationError::InvalidMethod {
                method: other.to_owned(),
            }),
        }
    }
}

/// Tagged request body. `content` is opaque bytes already encoded for the
/// wire — the template carries no reference back to whatever produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodySource {
    None,
    Json { content: Vec<u8> },
    Text { content: Vec<u8> },
    FormUrlEncoded { content: Vec<u8> },
    Multipart { content: Vec<u8>, boundary: String },
    Binary { content: Vec<u8> },
}

impl BodySource {
    #[must_use]
    pub fn content(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Json { content }
            | Self::Text { content }
            | Self::FormUrlEncoded { content }
            | Self::Binary { content } => content,
            Self::Multipart { content, .. } => content,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Digest {
        username: String,
        password: String,
    },
    OAuth2 {
        access_token: String,
    },
    AwsSigV4 {
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
        region: String,
        service: String,
    },
}

/// Request definition as authored; may still contain unresolved
/// `{{variable}}` placeholders in `url`, header values, or body content.
/// Immutable once a run starts — a snapshot is stored on the run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestTemplate {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: BodySource,
    pub auth: AuthConfig,
    pub pre_script: Option<String>,
    pub test_script: Option<String>,
    pub timeout_ms: u64,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub verify_tls: bool,
}

impl HttpRequestTemplate {
    /// Case-insensitive header lookup, first match wins (headers are an
    /// ordered list so later duplicates are intentionally shadowed, matching
    /// typical HTTP client semantics).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Product of a template resolved against a variable context. Literal,
/// wire-ready, no back-reference to the source template.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub auth: AuthConfig,
    pub timeout_ms: u64,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub verify_tls: bool,
}

impl ResolvedRequest {
    #[must_use]
    pub fn headers_map(&self) -> BTreeMap<String, String> {
        self.headers.iter().cloned().collect()
    }
}
