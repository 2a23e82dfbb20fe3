// MediaCMS client library.
// Request pipeline with token refresh, response caching and in-flight dedup, plus persisted client state.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod storage;

pub use config::{AuthConfig, CacheConfig, ClientConfig, RetryConfig};
pub use error::{ClientError, Result};
pub use events::{ClientEvent, EventBus, NotifyLevel};
pub use http::{ApiClient, FormPart, RequestDescriptor};
