//! End-to-end request-layer tests against a mock Jenkins.

mod prefetch;
mod support;
mod token;
