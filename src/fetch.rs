//! Request orchestration: URL prefixing, bearer tokens, prefetch consumption, and single-flight.
//!
//! A `GET` without `disable_dedupe` is *shareable*: it first tries the prefetch store and
//! otherwise joins (or opens) the in-flight request for its final URL. Anything else goes straight
//! to the network, bypassing both.

// std
use std::{
	borrow::Borrow,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use http::{
	HeaderMap, HeaderValue, Method,
	header::{AUTHORIZATION, CONTENT_TYPE, HeaderName},
};
use serde::{Serialize, de::DeserializeOwned};
use url::Url;
// self
use crate::{
	_prelude::*,
	config::HostConfig,
	flight::{FlightRole, SingleFlight},
	http::{
		client::{Credentials, HttpRequest, Transport},
		response::{FetchResponse, check_status},
	},
	metrics::{FetchMetrics, Surface},
	prefetch::PrefetchStore,
	token::manager::TokenLifecycleManager,
};

/// Callback invoked with a successful outcome.
pub type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
/// Callback invoked with a failure.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Per-call request options.
///
/// `T` is the type handed to the success callback: [`Value`] for JSON fetches, [`FetchResponse`]
/// for raw fetches, or the target type of [`Fetcher::fetch_json_as`].
pub struct FetchOptions<T = Value> {
	/// Request method; only `GET` is eligible for prefetch and deduplication.
	pub method: Method,
	/// Extra request headers. A caller-supplied `Authorization` header is never replaced.
	pub headers: HeaderMap,
	/// Request body.
	pub body: Option<Vec<u8>>,
	/// Credential policy.
	pub credentials: Credentials,
	/// Always go to the network and never share the call.
	pub disable_dedupe: bool,
	/// Invoked with the outcome on success.
	pub on_success: Option<SuccessCallback<T>>,
	/// Invoked on failure; failures are logged when absent.
	pub on_error: Option<ErrorCallback>,
}
impl<T> FetchOptions<T> {
	/// Default options: `GET`, same-origin credentials, deduplicated.
	pub fn new() -> Self {
		Self {
			method: Method::GET,
			headers: HeaderMap::new(),
			body: None,
			credentials: Credentials::default(),
			disable_dedupe: false,
			on_success: None,
			on_error: None,
		}
	}

	/// Override the method.
	pub fn with_method(mut self, method: Method) -> Self {
		self.method = method;

		self
	}

	/// Add a header, replacing an existing value.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Set a raw body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Serialize `body` as JSON and mark the request accordingly.
	pub fn with_json_body<B>(mut self, body: &B) -> Result<Self>
	where
		B: ?Sized + Serialize,
	{
		self.body = Some(serde_json::to_vec(body)?);
		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		Ok(self)
	}

	/// Override the credential policy.
	pub fn with_credentials(mut self, credentials: Credentials) -> Self {
		self.credentials = credentials;

		self
	}

	/// Skip prefetch and deduplication for this call.
	pub fn without_dedupe(mut self) -> Self {
		self.disable_dedupe = true;

		self
	}

	/// Install a success callback.
	pub fn on_success<F>(mut self, callback: F) -> Self
	where
		F: 'static + Send + Sync + Fn(&T),
	{
		self.on_success = Some(Arc::new(callback));

		self
	}

	/// Install an error callback.
	pub fn on_error<F>(mut self, callback: F) -> Self
	where
		F: 'static + Send + Sync + Fn(&Error),
	{
		self.on_error = Some(Arc::new(callback));

		self
	}

	fn is_shareable(&self) -> bool {
		!self.disable_dedupe && self.method == Method::GET
	}

	fn to_request(&self, url: &str, token: Option<&str>) -> Result<HttpRequest> {
		let mut headers = self.headers.clone();

		if let Some(token) = token
			&& !headers.contains_key(AUTHORIZATION)
		{
			let value = HeaderValue::try_from(format!("Bearer {token}")).map_err(|err| {
				Error::Config { field: "headers.authorization", reason: err.to_string() }
			})?;

			headers.insert(AUTHORIZATION, value);
		}

		Ok(HttpRequest {
			method: self.method.clone(),
			url: Url::parse(url)?,
			headers,
			body: self.body.clone(),
			credentials: self.credentials,
		})
	}

	fn settle<O>(&self, outcome: Result<O>) -> Result<O>
	where
		O: Borrow<T>,
	{
		match &outcome {
			Ok(value) =>
				if let Some(on_success) = &self.on_success {
					on_success(Borrow::<T>::borrow(value));
				},
			Err(err) => match &self.on_error {
				Some(on_error) => on_error(err),
				None => tracing::error!(error = %err, "fetch failed"),
			},
		}

		outcome
	}
}
impl<T> Clone for FetchOptions<T> {
	fn clone(&self) -> Self {
		Self {
			method: self.method.clone(),
			headers: self.headers.clone(),
			body: self.body.clone(),
			credentials: self.credentials,
			disable_dedupe: self.disable_dedupe,
			on_success: self.on_success.clone(),
			on_error: self.on_error.clone(),
		}
	}
}
impl<T> Debug for FetchOptions<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("FetchOptions")
			.field("method", &self.method)
			.field("headers", &self.headers)
			.field("body", &self.body.as_ref().map(Vec::len))
			.field("credentials", &self.credentials)
			.field("disable_dedupe", &self.disable_dedupe)
			.field("on_success", &self.on_success.is_some())
			.field("on_error", &self.on_error.is_some())
			.finish()
	}
}
impl<T> Default for FetchOptions<T> {
	fn default() -> Self {
		Self::new()
	}
}

/// Entry point for every request made by a client.
///
/// Clones share the prefetch store, the in-flight tables, the token manager, and the counters.
#[derive(Clone, Debug)]
pub struct Fetcher {
	config: Arc<HostConfig>,
	transport: Transport,
	prefetch: Arc<PrefetchStore>,
	tokens: Option<TokenLifecycleManager>,
	json_flights: SingleFlight<Arc<Value>>,
	raw_flights: SingleFlight<Arc<FetchResponse>>,
	metrics: Arc<FetchMetrics>,
}
impl Fetcher {
	/// Build a fetcher with the default transport.
	pub fn new(config: HostConfig) -> Result<Self> {
		Self::with_transport(config, Transport::new()?)
	}

	/// Build a fetcher around `transport`.
	///
	/// The configuration's prefetch mapping moves into the fetcher's prefetch store.
	pub fn with_transport(mut config: HostConfig, transport: Transport) -> Result<Self> {
		config.validate()?;

		let metrics = FetchMetrics::new();
		let prefetch = Arc::new(PrefetchStore::new(config.take_prefetch_data()));
		let tokens = if config.is_jwt_enabled() {
			Some(TokenLifecycleManager::new(
				config.jwt_service_host_url()?,
				transport.clone(),
				metrics.clone(),
			)?)
		} else {
			None
		};

		tracing::debug!(
			root = config.root_url(),
			jwt = tokens.is_some(),
			prefetched = prefetch.len(),
			"fetcher ready"
		);

		Ok(Self {
			config: Arc::new(config),
			transport,
			prefetch,
			tokens,
			json_flights: SingleFlight::new(),
			raw_flights: SingleFlight::new(),
			metrics,
		})
	}

	/// Host configuration, without its prefetch mapping.
	pub fn config(&self) -> &HostConfig {
		&self.config
	}

	/// Remaining prefetched payloads.
	pub fn prefetch_store(&self) -> &PrefetchStore {
		&self.prefetch
	}

	/// Token manager, present when JWT is enabled.
	pub fn token_manager(&self) -> Option<&TokenLifecycleManager> {
		self.tokens.as_ref()
	}

	/// Request counters.
	pub fn metrics(&self) -> &Arc<FetchMetrics> {
		&self.metrics
	}

	/// Prefix `url` with the root URL unless it is absolute or already prefixed.
	pub fn prefix_url(&self, url: &str) -> String {
		let root = self.config.root_url();

		if url.starts_with("http") || root.is_empty() || url.starts_with(root) {
			url.to_owned()
		} else {
			format!("{root}{url}")
		}
	}

	/// Fetch and parse a JSON body.
	#[tracing::instrument(skip(self, options))]
	pub async fn fetch_json(&self, url: &str, options: FetchOptions) -> Result<Arc<Value>> {
		let outcome = self.authorized_json(url, &options).await;

		options.settle(outcome)
	}

	/// Fetch a JSON body and decode it into `T`.
	///
	/// Deduplication shares the parsed JSON; each caller decodes its own `T`.
	#[tracing::instrument(skip(self, options))]
	pub async fn fetch_json_as<T>(&self, url: &str, options: FetchOptions<T>) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let outcome = self
			.authorized_json(url, &options)
			.await
			.and_then(|value| T::deserialize(&*value).map_err(Error::from));

		options.settle(outcome)
	}

	/// Fetch a buffered response.
	#[tracing::instrument(skip(self, options))]
	pub async fn fetch(
		&self,
		url: &str,
		options: FetchOptions<FetchResponse>,
	) -> Result<Arc<FetchResponse>> {
		let outcome = self.authorized_raw(url, &options).await;

		options.settle(outcome)
	}

	/// JSON fetch of an already final URL, without token handling.
	pub async fn raw_fetch_json(&self, url: &str, options: FetchOptions) -> Result<Arc<Value>> {
		let outcome = self.shared_json(url, &options, None).await;

		options.settle(outcome)
	}

	/// Raw fetch of an already final URL, without token handling.
	pub async fn raw_fetch(
		&self,
		url: &str,
		options: FetchOptions<FetchResponse>,
	) -> Result<Arc<FetchResponse>> {
		let outcome = self.shared_raw(url, &options, None).await;

		options.settle(outcome)
	}

	async fn bearer_token(&self) -> Result<Option<String>> {
		match &self.tokens {
			Some(tokens) => Ok(Some(tokens.get_token().await?)),
			None => Ok(None),
		}
	}

	async fn authorized_json<T>(&self, url: &str, options: &FetchOptions<T>) -> Result<Arc<Value>> {
		let url = self.prefix_url(url);
		let token = self.bearer_token().await?;

		self.shared_json(&url, options, token.as_deref()).await
	}

	async fn authorized_raw(
		&self,
		url: &str,
		options: &FetchOptions<FetchResponse>,
	) -> Result<Arc<FetchResponse>> {
		let url = self.prefix_url(url);
		let token = self.bearer_token().await?;

		self.shared_raw(&url, options, token.as_deref()).await
	}

	async fn shared_json<T>(
		&self,
		url: &str,
		options: &FetchOptions<T>,
		token: Option<&str>,
	) -> Result<Arc<Value>> {
		let request = options.to_request(url, token)?;

		if !options.is_shareable() {
			return network_json(self.transport.clone(), self.metrics.clone(), request).await;
		}

		let transport = self.transport.clone();
		let metrics = self.metrics.clone();
		let (flight, role) = self.json_flights.dedupe_with_role(url, || {
			let prefetched = self.prefetch.take(url);

			async move {
				match prefetched {
					Some(payload) => {
						metrics.record_prefetch_hit(Surface::Json);

						Ok(Arc::new(payload?))
					},
					None => network_json(transport, metrics, request).await,
				}
			}
		});

		if role == FlightRole::Follower {
			self.metrics.record_dedupe_join(Surface::Json);
		}

		flight.await
	}

	async fn shared_raw(
		&self,
		url: &str,
		options: &FetchOptions<FetchResponse>,
		token: Option<&str>,
	) -> Result<Arc<FetchResponse>> {
		let request = options.to_request(url, token)?;

		if !options.is_shareable() {
			return network_raw(self.transport.clone(), self.metrics.clone(), request).await;
		}

		let transport = self.transport.clone();
		let metrics = self.metrics.clone();
		let (flight, role) = self.raw_flights.dedupe_with_role(url, || {
			let prefetched = self.prefetch.take(url);

			async move {
				match prefetched {
					Some(payload) => {
						metrics.record_prefetch_hit(Surface::Raw);

						Ok(Arc::new(FetchResponse::prefetched(request.url, &payload?)?))
					},
					None => network_raw(transport, metrics, request).await,
				}
			}
		});

		if role == FlightRole::Follower {
			self.metrics.record_dedupe_join(Surface::Raw);
		}

		flight.await
	}
}

async fn network_json(
	transport: Transport,
	metrics: Arc<FetchMetrics>,
	request: HttpRequest,
) -> Result<Arc<Value>> {
	metrics.record_network(Surface::Json);

	let response = check_status(transport.send(request).await?)?;

	Ok(Arc::new(response.json()?))
}

async fn network_raw(
	transport: Transport,
	metrics: Arc<FetchMetrics>,
	request: HttpRequest,
) -> Result<Arc<FetchResponse>> {
	metrics.record_network(Surface::Raw);

	Ok(Arc::new(check_status(transport.send(request).await?)?))
}
