//! HTTP primitives used by the request layer.

pub mod client;
pub mod response;
