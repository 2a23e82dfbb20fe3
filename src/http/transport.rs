// HTTP transport.
// Wraps reqwest with base URL, timeout, cookie jar, transient retry and status classification.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::{
    Client, StatusCode,
    cookie::{CookieStore, Jar},
    header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT},
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result, default_status_message};

use super::request::{RequestBody, RequestDescriptor};

/// A response that was received, successful or not.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    /// Parsed JSON, the raw text as a string when not JSON, or null when empty.
    pub body: Value,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Server-provided message from `detail`, `message` or a plain-text body.
    pub fn server_message(&self) -> Option<String> {
        server_message(&self.body)
    }

    /// Convert a failed reply into the error surfaced to callers.
    pub fn into_error(self) -> ClientError {
        let status = self.status.as_u16();
        let message = self
            .server_message()
            .unwrap_or_else(|| default_status_message(status).to_string());

        match self.status {
            StatusCode::BAD_REQUEST => match validation_fields(&self.body) {
                Some(fields) => ClientError::ValidationFailed(fields),
                None => ClientError::HttpStatus { status, message },
            },
            StatusCode::UNAUTHORIZED => ClientError::AuthExpired(message),
            StatusCode::FORBIDDEN => ClientError::Forbidden(message),
            _ => ClientError::HttpStatus { status, message },
        }
    }
}

pub(crate) fn server_message(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => ["detail", "message", "error"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .filter(|message| !message.is_empty())
            .map(String::from),
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

/// Extract `{field: [messages]}` validation errors from a 400 body.
fn validation_fields(body: &Value) -> Option<BTreeMap<String, Vec<String>>> {
    let map = body.as_object()?;
    if map.contains_key("detail") {
        return None;
    }

    let mut fields = BTreeMap::new();
    for (field, value) in map {
        let messages: Vec<String> = match value {
            Value::String(message) => vec![message.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect(),
            _ => continue,
        };
        if !messages.is_empty() {
            fields.insert(field.clone(), messages);
        }
    }

    (!fields.is_empty()).then_some(fields)
}

/// HTTP client bound to one API base URL.
pub struct Transport {
    client: Client,
    config: Arc<ClientConfig>,
    cookies: Arc<Jar>,
}

impl Transport {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        // Form and multipart bodies set their own content type
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("mediacms-client/", env!("CARGO_PKG_VERSION"))),
        );

        let cookies = Arc::new(Jar::default());
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .cookie_provider(Arc::clone(&cookies))
            .build()?;

        Ok(Self {
            client,
            config,
            cookies,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Cookie jar shared with the underlying client.
    pub fn cookies(&self) -> &Arc<Jar> {
        &self.cookies
    }

    /// Read a cookie the server set for the API base URL.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let url = url::Url::parse(&self.config.base_url).ok()?;
        let header = self.cookies.cookies(&url)?;
        let header = header.to_str().ok()?;

        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
    }

    /// Send once, without retry.
    async fn send_once(&self, req: &RequestDescriptor, headers: &HeaderMap) -> Result<HttpReply> {
        let url = self.config.url(&req.path);
        let mut builder = self
            .client
            .request(req.method.clone(), &url)
            .headers(headers.clone());

        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        builder = match &req.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Multipart(parts) => builder.multipart(RequestBody::to_multipart(parts)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(HttpReply { status, body })
    }

    /// Send with retry of transient failures: network errors, timeouts and 5xx.
    ///
    /// Backoff is linear in the attempt number. Once retries are exhausted the
    /// last outcome is returned as-is: the transport error, or the 5xx reply.
    pub async fn send(&self, req: &RequestDescriptor, headers: &HeaderMap) -> Result<HttpReply> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                method = %req.method,
                path = %req.path,
                attempt = attempt,
                "Sending API request"
            );

            match self.send_once(req, headers).await {
                Ok(reply) if reply.status.is_server_error() && attempt <= retry.max_retries => {
                    let backoff = retry.backoff(attempt);
                    warn!(
                        path = %req.path,
                        status = %reply.status,
                        attempt = attempt,
                        wait_ms = backoff.as_millis(),
                        "Server error, retrying with backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Ok(reply) => {
                    debug!(path = %req.path, status = %reply.status, "Received API response");
                    return Ok(reply);
                }
                Err(e) if e.is_transient() && attempt <= retry.max_retries => {
                    let backoff = retry.backoff(attempt);
                    warn!(
                        path = %req.path,
                        error = %e,
                        attempt = attempt,
                        wait_ms = backoff.as_millis(),
                        "Request failed, retrying with backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn reply(status: u16, body: Value) -> HttpReply {
        HttpReply {
            status: StatusCode::from_u16(status).unwrap(),
            body,
        }
    }

    #[test]
    fn test_server_detail_is_surfaced() {
        let err = reply(404, json!({"detail": "Media not found"})).into_error();
        assert_eq!(
            err,
            ClientError::HttpStatus {
                status: 404,
                message: "Media not found".into()
            }
        );
    }

    #[test]
    fn test_generic_message_without_detail() {
        let err = reply(500, Value::Null).into_error();
        assert_eq!(
            err,
            ClientError::HttpStatus {
                status: 500,
                message: "Server error, please try again later".into()
            }
        );
    }

    #[test]
    fn test_plain_text_body_message() {
        let err = reply(502, Value::String("Bad Gateway".into())).into_error();
        assert_eq!(err.to_string(), "HTTP 502: Bad Gateway");
    }

    #[test]
    fn test_validation_fields() {
        let err = reply(
            400,
            json!({"email": ["Enter a valid email."], "password": "Too short", "count": 3}),
        )
        .into_error();

        let ClientError::ValidationFailed(fields) = err else {
            panic!("expected validation error, got {:?}", err);
        };
        assert_eq!(fields["email"], vec!["Enter a valid email."]);
        assert_eq!(fields["password"], vec!["Too short"]);
        assert!(!fields.contains_key("count"));
    }

    #[test]
    fn test_400_with_detail_is_plain_status() {
        let err = reply(400, json!({"detail": "Bad captcha"})).into_error();
        assert_eq!(err.status(), Some(400));
        assert!(matches!(err, ClientError::HttpStatus { .. }));
    }

    #[test]
    fn test_auth_statuses() {
        assert!(matches!(
            reply(401, json!({})).into_error(),
            ClientError::AuthExpired(_)
        ));
        assert!(matches!(
            reply(403, json!({"detail": "nope"})).into_error(),
            ClientError::Forbidden(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbuildable_request_not_retried() {
        let config = ClientConfig::new("http://localhost:8000/api")
            .with_retry(crate::config::RetryConfig::new(3, 200));
        let transport = Transport::new(Arc::new(config)).unwrap();
        let req = RequestDescriptor::get("http://[::1");

        let started = tokio::time::Instant::now();
        let err = transport.send(&req, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)), "got {:?}", err);
        // No backoff sleep ran
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_cookie_lookup() {
        let config = Arc::new(ClientConfig::new("http://localhost:8000/api"));
        let transport = Transport::new(config).unwrap();
        let url = url::Url::parse("http://localhost:8000/api").unwrap();
        transport
            .cookies()
            .add_cookie_str("csrftoken=abc123; Path=/", &url);
        transport.cookies().add_cookie_str("sessionid=s1; Path=/", &url);

        assert_eq!(transport.cookie("csrftoken").as_deref(), Some("abc123"));
        assert_eq!(transport.cookie("missing"), None);
    }
}
