// Request pipeline module.
// Transport, auth interceptor, in-flight deduplication and the client context tying them together.

pub mod auth;
pub mod blocked;
pub mod client;
pub mod dedup;
pub mod request;
pub mod transport;

pub use auth::{AuthInterceptor, Recovery, ReplayTurn};
pub use blocked::{BLOCKED_CODE, BlockDetector};
pub use client::ApiClient;
pub use dedup::{InFlight, SharedCall};
pub use request::{FormPart, RequestBody, RequestDescriptor, RequestPhase};
pub use transport::{HttpReply, Transport};
