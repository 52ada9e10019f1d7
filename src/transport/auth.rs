//! Materialises an `AuthConfig` into the headers to attach to a request.
//! Grounded in the teacher's `apply_auth_headers`, generalised from
//! reqwest's `RequestBuilder` to a plain header list since the transport
//! builds raw `hyper::Request`s.

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use crate::domain::AuthConfig;
use crate::error::TransportError;

/// # Errors
///
/// Returns an error if AWS SigV4 signing fails to build its parameters or
/// sign the request.
pub fn auth_headers(
    auth: &AuthConfig,
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<Vec<(String, String)>, TransportError> {
    match auth {
        AuthConfig::None => Ok(Vec::new()),
        AuthConfig::Bearer { token } => Ok(vec![("Authorization".to_owned(), format!("Bearer {token}"))]),
        AuthConfig::Basic { username, password } => {
            let encoded = B64.encode(format!("{username}:{password}"));
            Ok(vec![("Authorization".to_owned(), format!("Basic {encoded}"))])
        }
        AuthConfig::OAuth2 { access_token } => Ok(vec![(
            "Authorization".to_owned(),
            format!("Bearer {access_token}"),
        )]),
        // Digest requires a challenge round-trip the transport doesn't model
        // at request-build time; only the Authorization scheme name can be
        // pre-populated, the realised challenge response is left to a future
        // 401-retry leg the event loop does not yet implement.
        AuthConfig::Digest { username, .. } => Ok(vec![(
            "X-Auth-Scheme".to_owned(),
            format!("Digest username=\"{username}\""),
        )]),
        AuthConfig::AwsSigV4 {
            access_key,
            secret_key,
            session_token,
            region,
            service,
        } => sign_v4(
            access_key,
            secret_key,
            session_token.as_deref(),
            region,
            service,
            method,
            url,
            headers,
            body,
        ),
    }
}

#[expect(clippy::too_many_arguments)]
fn sign_v4(
    access_key: &str,
    secret_key: &str,
    session_token: Option<&str>,
    region: &str,
    service: &str,
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<Vec<(String, String)>, TransportError> {
    let identity: Identity = Credentials::new(
        access_key,
        secret_key,
        session_token.map(str::to_owned),
        None,
        "loadcore",
    )
    .into();
    let signing_settings = SigningSettings::default();
    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(service)
        .time(std::time::SystemTime::now())
        .settings(signing_settings)
        .build()
        .map_err(|err| TransportError::Internal {
            message: format!("sigv4 params: {err}"),
        })?
        .into();

    let signable = SignableRequest::new(
        method,
        url,
        headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        SignableBody::Bytes(body),
    )
    .map_err(|err| TransportError::Internal {
        message: format!("sigv4 request: {err}"),
    })?;

    let (instructions, _signature) = sign(signable, &signing_params)
        .map_err(|err| TransportError::Internal {
            message: format!("sigv4 sign: {err}"),
        })?
        .into_parts();

    let mut builder = http::Request::builder().method(method).uri(url);
    for (key, value) in headers {
        builder = builder.header(key, value);
    }
    let mut request = builder.body(()).map_err(|err| TransportError::Internal {
        message: format!("sigv4 build: {err}"),
    })?;
    instructions.apply_to_request_http1x(&mut request);

    let mut out = Vec::new();
    for (name, value) in request.headers() {
        let value = value.to_str().map_err(|err| TransportError::Internal {
            message: format!("sigv4 header value: {err}"),
        })?;
        out.push((name.as_str().to_owned(), value.to_owned()));
    }
    Ok(out)
}
