use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1 as h1;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::domain::{ErrorKind, ResolvedRequest, ResponseRecord, Timing};

use super::auth::auth_headers;
use super::conn::MaybeTlsStream;
use super::phases::PhaseClock;

/// Per-request HTTP/1.1 client with phase timing. Stateless beyond its two
/// cached TLS configs — every call opens a fresh connection, matching the
/// "no shared mutable state beyond optional pool handles" note in spec.md
/// §4.2 (pooling is left as a future optimisation, not a contract
/// requirement).
pub struct Transport {
    tls_verify: Arc<ClientConfig>,
    tls_insecure: Arc<ClientConfig>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tls_verify: super::tls::client_config(true),
            tls_insecure: super::tls::client_config(false),
        }
    }

    /// Executes one resolved request end to end, including redirects.
    /// Always returns a `ResponseRecord` — failures are encoded in
    /// `error`/`status`, never raised to the caller.
    pub async fn execute(&self, resolved: &ResolvedRequest) -> ResponseRecord {
        let dispatch = Instant::now();
        let deadline = Duration::from_millis(resolved.timeout_ms.max(1));
        match tokio::time::timeout(deadline, self.execute_inner(resolved)).await {
            Ok(record) => record,
            Err(_) => {
                let mut record = ResponseRecord::failure(
                    ErrorKind::Timeout,
                    format!("request timed out after {}ms", resolved.timeout_ms),
                );
                record.timing.total_ms = crate::time::millis_between(dispatch, Instant::now()) as f64;
                record
            }
        }
    }

    async fn execute_inner(&self, resolved: &ResolvedRequest) -> ResponseRecord {
        let dispatch = Instant::now();
        let mut url = match Url::parse(&resolved.url) {
            Ok(u) => u,
            Err(err) => {
                return ResponseRecord::failure(
                    ErrorKind::InvalidUrl,
                    format!("invalid url '{}': {err}", resolved.url),
                )
            }
        };

        let mut method = resolved.method;
        let mut headers = resolved.headers.clone();
        let mut body = resolved.body.clone();
        let mut hops = 0u32;
        let mut clock = PhaseClock::start(dispatch);
        let mut request_headers_sent = Vec::new();
        let mut raw_request_bytes = 0u64;

        loop {
            let hop_result = self
                .execute_hop(
                    &url,
                    method,
                    &headers,
                    &body,
                    &resolved.auth,
                    resolved.verify_tls,
                    &mut clock,
                )
                .await;

            let (response, sent_headers, sent_bytes) = match hop_result {
                Ok(hop) => hop,
                Err((kind, message)) => {
                    let mut record = ResponseRecord::failure(kind, message);
                    record.timing = clock.finish();
                    return record;
                }
            };
            request_headers_sent = sent_headers;
            raw_request_bytes = sent_bytes;

            let status = response.status;
            let is_redirect = (300..400).contains(&status);

            if is_redirect && resolved.follow_redirects && hops < resolved.max_redirects {
                if let Some(location) = response
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("location"))
                    .map(|(_, v)| v.clone())
                {
                    match url.join(&location) {
                        Ok(next) => {
                            url = next;
                            hops += 1;
                            // Redirects to GET per the common 303/302 browser
                            // convention; POST bodies are not re-sent across
                            // hops.
                            if matches!(status, 302 | 303) {
                                method = crate::domain::HttpMethod::Get;
                                body = Vec::new();
                            }
                            continue;
                        }
                        Err(_) => {
                            let mut record = response;
                            record.timing = clock.finish();
                            record.request_headers_sent = request_headers_sent;
                            record.raw_request_bytes = raw_request_bytes;
                            return record;
                        }
                    }
                }
            }

            let mut record = response;
            record.timing = clock.finish();
            record.request_headers_sent = request_headers_sent;
            record.raw_request_bytes = raw_request_bytes;
            return record;
        }
    }

    #[expect(clippy::too_many_arguments)]
    async fn execute_hop(
        &self,
        url: &Url,
        method: crate::domain::HttpMethod,
        headers: &[(String, String)],
        body: &[u8],
        auth: &crate::domain::AuthConfig,
        verify_tls: bool,
        clock: &mut PhaseClock,
    ) -> Result<(ResponseRecord, Vec<(String, String)>, u64), (ErrorKind, String)> {
        let host = url
            .host_str()
            .ok_or_else(|| (ErrorKind::InvalidUrl, "url has no host".to_owned()))?
            .to_owned();
        let is_https = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err((
                    ErrorKind::InvalidUrl,
                    format!("unsupported scheme '{other}'"),
                ))
            }
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| (ErrorKind::InvalidUrl, "url has no resolvable port".to_owned()))?;

        let mut addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|err| (ErrorKind::DnsError, format!("{host}: {err}")))?;
        let addr = addrs
            .next()
            .ok_or_else(|| (ErrorKind::DnsError, format!("no addresses for '{host}'")))?;
        clock.dns_done = Some(Instant::now());

        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|err| (ErrorKind::ConnectionFailed, err.to_string()))?;
        clock.connect_done = Some(Instant::now());

        let io = if is_https {
            let config = if verify_tls {
                self.tls_verify.clone()
            } else {
                self.tls_insecure.clone()
            };
            let connector = TlsConnector::from(config);
            let server_name = ServerName::try_from(host.clone())
                .map_err(|err| (ErrorKind::SslError, err.to_string()))?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|err| (ErrorKind::SslError, err.to_string()))?;
            clock.tls_done = Some(Instant::now());
            MaybeTlsStream::Tls(Box::new(tls))
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let io = TokioIo::new(io);
        let (mut sender, connection) = h1::handshake(io)
            .await
            .map_err(|err| (ErrorKind::ConnectionFailed, err.to_string()))?;
        tokio::spawn(async move {
            let _ = connection.await;
        });

        let path = if url.query().is_some() {
            format!("{}?{}", url.path(), url.query().unwrap_or(""))
        } else {
            url.path().to_owned()
        };

        let auth_extra = auth_headers(auth, method.as_str(), url.as_str(), headers, body)
            .map_err(|err| (ErrorKind::InternalError, err.to_string()))?;

        let mut builder = hyper::Request::builder().method(method.as_str()).uri(path);
        if let Some(h) = builder.headers_mut() {
            h.insert(hyper::header::HOST, host.parse().map_err(|_| {
                (ErrorKind::InvalidUrl, "invalid host header".to_owned())
            })?);
        }
        let mut sent_headers = Vec::new();
        for (k, v) in headers.iter().chain(auth_extra.iter()) {
            builder = builder.header(k.as_str(), v.as_str());
            sent_headers.push((k.clone(), v.clone()));
        }
        let body_bytes = Bytes::copy_from_slice(body);
        let raw_len = body_bytes.len() as u64;
        let request = builder
            .body(Full::new(body_bytes))
            .map_err(|err| (ErrorKind::InternalError, err.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|err| (ErrorKind::ConnectionFailed, err.to_string()))?;
        clock.first_byte = Some(Instant::now());

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_owned();
        let response_headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_owned(), v.to_str().unwrap_or_default().to_owned()))
            .collect::<Vec<_>>();

        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|err| (ErrorKind::InternalError, err.to_string()))?;
        let body_bytes = collected.to_bytes();
        clock.last_byte = Some(Instant::now());

        let record = ResponseRecord {
            status,
            status_text,
            response_headers,
            body_size: body_bytes.len() as u64,
            body_bytes: body_bytes.to_vec(),
            timing: Timing::default(),
            request_headers_sent: Vec::new(),
            raw_request_bytes: 0,
            error: ErrorKind::None,
            error_message: None,
        };

        Ok((record, sent_headers, raw_len))
    }
}
