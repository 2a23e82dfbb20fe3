// Request descriptors.
// Method, path, query and body of an API call, plus its explicit lifecycle phase.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::cache::cache_key;
use crate::error::Result;

/// Where a request is in its lifecycle.
///
/// `Initial → Sent → Refreshing → Retried → Settled`. A request that has
/// reached `Retried` never starts another token refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPhase {
    #[default]
    Initial,
    Sent,
    Refreshing,
    Retried,
    Settled,
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        bytes: Vec<u8>,
        mime: Option<String>,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormPart::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            bytes,
            mime: None,
        }
    }
}

/// Request payload. Kept as data so a replay can rebuild it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Build a multipart form for one attempt.
    pub(crate) fn to_multipart(parts: &[FormPart]) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for part in parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    file_name,
                    bytes,
                    mime,
                } => {
                    let mut file = reqwest::multipart::Part::bytes(bytes.clone())
                        .file_name(file_name.clone());
                    if let Some(mime) = mime {
                        file = file.mime_str(mime)?;
                    }
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

/// A single API call as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Allow the response cache for this GET.
    pub use_cache: bool,
    phase: RequestPhase,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            use_cache: true,
            phase: RequestPhase::Initial,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Append a parameter only when a value is present.
    #[must_use]
    pub fn query_opt<V: ToString>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(name, value),
            None => self,
        }
    }

    #[must_use]
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        // Serializing plain data structs into a Value does not fail
        self.body = RequestBody::Json(serde_json::to_value(body).unwrap_or(Value::Null));
        self
    }

    #[must_use]
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    #[must_use]
    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    /// Skip the response cache for this request.
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Reads are cached and deduplicated; writes are not.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.path, &self.query)
    }

    /// Key for in-flight deduplication; includes the method.
    pub fn dedup_key(&self) -> String {
        format!("{} {}", self.method, self.cache_key())
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn is_retry(&self) -> bool {
        self.phase == RequestPhase::Retried
    }

    /// Called before each dispatch. A replay keeps its `Retried` mark.
    pub(crate) fn mark_sent(&mut self) {
        if self.phase == RequestPhase::Initial {
            self.phase = RequestPhase::Sent;
        }
    }

    /// Enter the refresh flow. Only a first-attempt request may do so.
    pub(crate) fn begin_refresh(&mut self) -> bool {
        if self.phase == RequestPhase::Sent {
            self.phase = RequestPhase::Refreshing;
            true
        } else {
            false
        }
    }

    /// Mark the request as the single post-refresh replay.
    pub(crate) fn mark_retried(&mut self) {
        self.phase = RequestPhase::Retried;
    }

    pub(crate) fn settle(&mut self) {
        self.phase = RequestPhase::Settled;
    }
}
