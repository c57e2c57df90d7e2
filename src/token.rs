//! JWT bearer-token lifecycle: acquisition, verification, and expiry-aware caching.

pub mod cache;
pub mod manager;
