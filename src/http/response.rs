//! Buffered HTTP responses and status/body handling.

// crates.io
use http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Map;
use url::Url;
// self
use crate::_prelude::*;

/// Fully buffered response, cheap to share between every waiter of a request.
#[derive(Clone, Debug)]
pub struct FetchResponse {
	status: StatusCode,
	url: Url,
	headers: HeaderMap,
	body: Vec<u8>,
	prefetched: bool,
}
impl FetchResponse {
	/// Construct a response from its parts.
	pub fn new(status: StatusCode, url: Url, headers: HeaderMap, body: Vec<u8>) -> Self {
		Self { status, url, headers, body, prefetched: false }
	}

	/// Synthesize a `200 OK` JSON response from a prefetched payload.
	pub(crate) fn prefetched(url: Url, payload: &Value) -> Result<Self> {
		let mut headers = HeaderMap::new();

		headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		let body = serde_json::to_vec(payload)?;

		Ok(Self { status: StatusCode::OK, url, headers, body, prefetched: true })
	}

	/// Response status.
	pub fn status(&self) -> StatusCode {
		self.status
	}

	/// Final URL of the response.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Response headers.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Header value as text, when present and visible ASCII.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name).and_then(|value| value.to_str().ok())
	}

	/// Raw body bytes.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Body decoded as UTF-8, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Whether the response was served from the prefetch store instead of the network.
	pub fn is_prefetched(&self) -> bool {
		self.prefetched
	}

	/// Body parsed as JSON; see [`parse_json`].
	pub fn json(&self) -> Result<Value> {
		parse_json(&self.body)
	}

	/// Body decoded into `T`, with the same empty-body handling as [`json`](Self::json).
	pub fn json_as<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		Ok(serde_json::from_value(self.json()?)?)
	}
}

/// Parse a JSON body, reading an empty (or whitespace-only) body as `{}`.
///
/// Some endpoints answer `200` with no body where `204` would be expected. A body cut off
/// mid-document is still a parse failure.
pub fn parse_json(body: &[u8]) -> Result<Value> {
	if body.iter().all(u8::is_ascii_whitespace) {
		return Ok(Value::Object(Map::new()));
	}

	Ok(serde_json::from_slice(body)?)
}

/// Fail on any status outside `200..=299`, attaching the response and its JSON body.
pub fn check_status(response: FetchResponse) -> Result<FetchResponse> {
	let status = response.status();

	if status.is_success() {
		return Ok(response);
	}

	let response_body = serde_json::from_slice(response.body()).ok();

	tracing::debug!(status = %status, url = %response.url(), "fetch failed");

	Err(Error::HttpStatus {
		status,
		url: response.url().clone(),
		response: Arc::new(response),
		response_body,
	})
}
