//! Crate-wide error types and `Result` alias.

// crates.io
use http::StatusCode;
use url::Url;
// self
use crate::{_prelude::*, http::response::FetchResponse};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the request layer.
///
/// Errors are cloneable so that every caller waiting on a shared in-flight request observes the
/// same failure. Foreign error types that are not `Clone` are kept behind an [`Arc`].
#[allow(missing_docs)]
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Network(Arc<reqwest::Error>),
	#[error(transparent)]
	Parse(Arc<serde_json::Error>),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Fetch failed: {status} for {url}.")]
	HttpStatus {
		status: StatusCode,
		url: Url,
		response: Arc<FetchResponse>,
		/// Error body decoded as JSON, or `None` when the body was not valid JSON.
		response_body: Option<Value>,
	},
	#[error("Could not fetch jwt_token: {url} returned no token header.")]
	TokenMissing { url: Url },
	#[error("Token verification failed: {0}")]
	Verification(Arc<jsonwebtoken::errors::Error>),
	#[error("Token verification failed: {0}")]
	KeyDocument(String),
	#[error("Invalid configuration for {field}: {reason}")]
	Config { field: &'static str, reason: String },
	#[error("In-flight request for '{key}' ended without an outcome.")]
	Abandoned { key: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
}
impl Error {
	/// HTTP status carried by an [`Error::HttpStatus`] failure.
	pub fn status(&self) -> Option<StatusCode> {
		match self {
			Self::HttpStatus { status, .. } => Some(*status),
			_ => None,
		}
	}

	/// Failed response attached to an [`Error::HttpStatus`] failure.
	pub fn response(&self) -> Option<&FetchResponse> {
		match self {
			Self::HttpStatus { response, .. } => Some(response),
			_ => None,
		}
	}

	/// Parsed error body attached to an [`Error::HttpStatus`] failure.
	pub fn response_body(&self) -> Option<&Value> {
		match self {
			Self::HttpStatus { response_body, .. } => response_body.as_ref(),
			_ => None,
		}
	}

	/// Whether the failure came from signature, claims, or key-document checks.
	pub fn is_verification(&self) -> bool {
		matches!(self, Self::Verification(_) | Self::KeyDocument(_))
	}
}
impl From<reqwest::Error> for Error {
	fn from(value: reqwest::Error) -> Self {
		Self::Network(Arc::new(value))
	}
}
impl From<serde_json::Error> for Error {
	fn from(value: serde_json::Error) -> Self {
		Self::Parse(Arc::new(value))
	}
}
impl From<jsonwebtoken::errors::Error> for Error {
	fn from(value: jsonwebtoken::errors::Error) -> Self {
		Self::Verification(Arc::new(value))
	}
}
#[cfg(feature = "prometheus")]
impl From<metrics_exporter_prometheus::BuildError> for Error {
	fn from(value: metrics_exporter_prometheus::BuildError) -> Self {
		Self::Metrics(value.to_string())
	}
}
