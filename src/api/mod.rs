// MediaCMS API module.
// Typed endpoint wrappers and response types over the request pipeline.

pub mod endpoints;
pub mod types;

pub use types::*;
