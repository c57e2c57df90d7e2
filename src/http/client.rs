//! HTTP client integration: request description, credential policy, and execution.

// crates.io
use http::{
	HeaderMap, HeaderValue, Method,
	header::{COOKIE, HeaderName},
};
use reqwest::{Client, redirect::Policy};
use serde::{Deserialize, Serialize};
use url::{Origin, Url};
// self
use crate::{_prelude::*, http::response::FetchResponse};

/// When the session credentials accompany a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
	/// Never send session credentials.
	Omit,
	/// Send them only to the origin the session belongs to.
	#[default]
	SameOrigin,
	/// Send them to any origin.
	Include,
}

/// Outgoing request handed to the [`Transport`].
#[derive(Clone, Debug)]
pub struct HttpRequest {
	/// Request method.
	pub method: Method,
	/// Absolute target URL.
	pub url: Url,
	/// Request headers.
	pub headers: HeaderMap,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
	/// Credential policy for this request.
	pub credentials: Credentials,
}
impl HttpRequest {
	/// Plain `GET` with same-origin credentials.
	pub fn get(url: Url) -> Self {
		Self {
			method: Method::GET,
			url,
			headers: HeaderMap::new(),
			body: None,
			credentials: Credentials::default(),
		}
	}

	/// Override the credential policy.
	pub fn with_credentials(mut self, credentials: Credentials) -> Self {
		self.credentials = credentials;

		self
	}

	/// Add a header, replacing an existing value.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}
}

#[derive(Debug)]
struct Session {
	cookie: HeaderValue,
	origin: Origin,
}

/// Executes [`HttpRequest`]s with a shared reqwest client and buffers their responses.
#[derive(Clone, Debug)]
pub struct Transport {
	client: Client,
	session: Option<Arc<Session>>,
}
impl Transport {
	/// Build a transport with the default reqwest client.
	pub fn new() -> Result<Self> {
		let client = Client::builder()
			.redirect(Policy::limited(10))
			.user_agent(format!("blueocean-fetch/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self::with_client(client))
	}

	/// Build a transport around the supplied reqwest client.
	pub fn with_client(client: Client) -> Self {
		Self { client, session: None }
	}

	/// Attach a session cookie belonging to the origin of `home`.
	pub fn with_session(mut self, cookie: HeaderValue, home: &Url) -> Self {
		self.session = Some(Arc::new(Session { cookie, origin: home.origin() }));

		self
	}

	/// Send `request` and buffer the whole response.
	///
	/// Only transport failures are errors here; status codes are left to the caller.
	pub async fn send(&self, request: HttpRequest) -> Result<FetchResponse> {
		let HttpRequest { method, url, mut headers, body, credentials } = request;

		if let Some(cookie) = self.session_cookie(credentials, &url)
			&& !headers.contains_key(COOKIE)
		{
			headers.insert(COOKIE, cookie);
		}

		let mut builder = self.client.request(method.clone(), url.clone()).headers(headers);

		if let Some(body) = body {
			builder = builder.body(body);
		}

		let start = Instant::now();
		let response = builder.send().await?;
		let status = response.status();
		let headers = response.headers().clone();
		let final_url = response.url().clone();
		let body = response.bytes().await?.to_vec();

		tracing::debug!(
			method = %method,
			url = %url,
			status = %status,
			elapsed = ?start.elapsed(),
			"fetch complete"
		);

		Ok(FetchResponse::new(status, final_url, headers, body))
	}

	fn session_cookie(&self, credentials: Credentials, target: &Url) -> Option<HeaderValue> {
		let session = self.session.as_ref()?;
		let permitted = match credentials {
			Credentials::Omit => false,
			Credentials::SameOrigin => target.origin() == session.origin,
			Credentials::Include => true,
		};

		permitted.then(|| session.cookie.clone())
	}
}
