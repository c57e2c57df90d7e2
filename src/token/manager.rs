//! Token lifecycle manager: acquire a raw JWT, verify it against its published key, and cache it.
//!
//! Two shared slots collapse concurrent callers onto the same work. The acquisition slot holds the
//! one in-flight (or last successful) call to the token endpoint. The verification slot holds the
//! key fetch and signature check for one specific raw token. Both are cleared on failure so the
//! next [`TokenLifecycleManager::get_token`] starts over; neither failure touches the
//! [`TokenCache`].

// std
use std::str::FromStr;
// crates.io
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, jwk::Jwk};
use url::Url;
// self
use crate::{
	_prelude::*,
	flight::Flight,
	http::{
		client::{Credentials, HttpRequest, Transport},
		response::check_status,
	},
	metrics::FetchMetrics,
	token::cache::{CLOCK_SKEW_SECONDS, TokenCache, TokenRecord},
};

/// Response header carrying the raw token.
pub const TOKEN_HEADER: &str = "X-BLUEOCEAN-JWT";

const ACQUISITION_KEY: &str = "jwt-auth/token";
const VERIFICATION_KEY: &str = "jwt-auth/jwks";

/// A raw token that passed verification, with its decoded claims.
#[derive(Clone, Debug)]
pub struct VerifiedToken {
	/// Raw token, usable as a bearer credential.
	pub token: String,
	/// Verified claims.
	pub payload: Arc<Value>,
}

#[derive(Debug, Default)]
struct TokenSlots {
	cache: TokenCache,
	attempt: Option<Flight<String>>,
	verification: Option<(String, Flight<VerifiedToken>)>,
}
impl TokenSlots {
	/// Whether the settled attempt only produced the near-expiry token already in the cache.
	///
	/// An attempt whose token is still being verified is the refresh in progress and must be
	/// joined, not replaced.
	fn is_refresh_due(&self, now: i64) -> bool {
		if !self.cache.is_near_expiry(now) {
			return false;
		}

		match self.attempt.as_ref().and_then(Flight::peek) {
			Some(Ok(raw)) => self
				.verification
				.as_ref()
				.is_some_and(|(token, verification)| *token == raw && verification.is_settled()),
			Some(Err(_)) => true,
			None => false,
		}
	}
}

/// Owns the token cache and the shared acquisition/verification slots.
///
/// Clones share state. Create one per process (or per test).
#[derive(Clone, Debug)]
pub struct TokenLifecycleManager {
	service_host: Arc<str>,
	transport: Transport,
	slots: Arc<Mutex<TokenSlots>>,
	metrics: Arc<FetchMetrics>,
}
impl TokenLifecycleManager {
	/// Build a manager for the JWT service at `service_host` (e.g. `https://ci/jenkins`).
	pub fn new(service_host: &str, transport: Transport, metrics: Arc<FetchMetrics>) -> Result<Self> {
		let service_host = service_host.trim_end_matches('/');

		Url::parse(service_host)?;

		Ok(Self {
			service_host: service_host.into(),
			transport,
			slots: Arc::new(Mutex::new(TokenSlots::default())),
			metrics,
		})
	}

	/// URL of the token endpoint.
	pub fn token_url(&self) -> Result<Url> {
		Ok(Url::parse(&format!("{}/jwt-auth/token", self.service_host))?)
	}

	/// URL of the public key document for `kid`.
	pub fn key_url(&self, kid: &str) -> Result<Url> {
		Ok(Url::parse(&format!("{}/jwt-auth/jwks/{kid}/", self.service_host))?)
	}

	/// Raw token usable as a bearer credential.
	pub async fn get_token(&self) -> Result<String> {
		Ok(self.get_token_with_payload().await?.token)
	}

	/// Verified token together with its claims.
	#[tracing::instrument(skip(self), fields(service = %self.service_host))]
	pub async fn get_token_with_payload(&self) -> Result<VerifiedToken> {
		let attempt = self.current_attempt(Utc::now().timestamp())?;
		let raw = attempt.await?;
		let verification = self.verification_for(raw);

		verification.await
	}

	/// Snapshot of the cached record.
	pub fn cached_record(&self) -> Option<TokenRecord> {
		self.slots.lock().cache.record().cloned()
	}

	/// Whether the cached token can be presented at `now` (epoch seconds).
	pub fn is_usable(&self, now: i64) -> bool {
		self.slots.lock().cache.is_usable(now)
	}

	/// Drop every cached token and slot.
	///
	/// Test-only escape hatch; production code never resets the manager.
	#[doc(hidden)]
	#[cfg(any(test, feature = "test"))]
	pub fn reset_for_tests(&self) {
		let mut slots = self.slots.lock();

		slots.cache.clear();
		slots.attempt = None;
		slots.verification = None;
	}

	fn current_attempt(&self, now: i64) -> Result<Flight<String>> {
		let mut slots = self.slots.lock();

		if slots.is_refresh_due(now) {
			tracing::debug!("cached token is within the skew window; forcing a new acquisition");

			slots.attempt = None;
		}
		if let Some(attempt) = &slots.attempt {
			return Ok(attempt.clone());
		}

		let attempt = self.launch_acquisition()?;

		slots.attempt = Some(attempt.clone());

		Ok(attempt)
	}

	fn launch_acquisition(&self) -> Result<Flight<String>> {
		let url = self.token_url()?;
		let transport = self.transport.clone();
		let metrics = self.metrics.clone();
		let slots = self.slots.clone();

		tracing::debug!(url = %url, "acquiring token");

		let work = async move {
			let outcome = acquire_raw_token(&transport, url).await;

			metrics.record_token_acquisition(outcome.is_ok());

			outcome
		};

		Ok(Flight::launch(ACQUISITION_KEY, work, move |settled, succeeded| {
			if succeeded {
				return;
			}

			let mut slots = slots.lock();

			if slots.attempt.as_ref().is_some_and(|attempt| attempt.is_same(settled)) {
				slots.attempt = None;
			}
		}))
	}

	fn verification_for(&self, raw: String) -> Flight<VerifiedToken> {
		let mut slots = self.slots.lock();

		if let Some((token, verification)) = &slots.verification
			&& *token == raw
		{
			return verification.clone();
		}

		let manager = self.clone();
		let token = raw.clone();
		let slots_handle = self.slots.clone();
		let work = async move {
			let outcome = manager.verify(token).await;

			manager.metrics.record_token_verification(outcome.is_ok());

			match &outcome {
				Ok(verified) => manager.store(verified),
				Err(err) => tracing::warn!(error = %err, "token verification failed"),
			}

			outcome
		};
		let released_raw = raw.clone();
		let verification = Flight::launch(VERIFICATION_KEY, work, move |settled, succeeded| {
			if succeeded {
				return;
			}

			let mut slots = slots_handle.lock();

			if slots
				.verification
				.as_ref()
				.is_some_and(|(_, verification)| verification.is_same(settled))
			{
				slots.verification = None;
			}
			if slots
				.attempt
				.as_ref()
				.and_then(Flight::peek)
				.is_some_and(|outcome| matches!(outcome, Ok(token) if token == released_raw))
			{
				slots.attempt = None;
			}
		});

		slots.verification = Some((raw, verification.clone()));

		verification
	}

	async fn verify(&self, raw: String) -> Result<VerifiedToken> {
		let header = jsonwebtoken::decode_header(&raw)?;
		let kid = header
			.kid
			.ok_or_else(|| Error::KeyDocument("Token header carries no key id.".into()))?;
		let url = self.key_url(&kid)?;
		let request = HttpRequest::get(url).with_credentials(Credentials::SameOrigin);
		let document = check_status(self.transport.send(request).await?)?.json()?;
		let (key, algorithm) = decoding_key(&document)?;
		let mut validation = Validation::new(algorithm);

		validation.leeway = CLOCK_SKEW_SECONDS as u64;
		validation.validate_aud = false;
		validation.required_spec_claims.clear();

		let data = jsonwebtoken::decode::<Value>(&raw, &key, &validation)?;

		tracing::debug!(kid = %kid, "token verified");

		Ok(VerifiedToken { token: raw, payload: Arc::new(data.claims) })
	}

	fn store(&self, verified: &VerifiedToken) {
		let expires_at = verified
			.payload
			.get("exp")
			.and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|exp| exp as i64)));

		self.slots.lock().cache.store(verified.payload.clone(), expires_at);
	}
}

async fn acquire_raw_token(transport: &Transport, url: Url) -> Result<String> {
	let request = HttpRequest::get(url.clone()).with_credentials(Credentials::Include);
	let response = check_status(transport.send(request).await?)?;

	response
		.header(TOKEN_HEADER)
		.filter(|token| !token.is_empty())
		.map(str::to_owned)
		.ok_or(Error::TokenMissing { url })
}

fn decoding_key(document: &Value) -> Result<(DecodingKey, Algorithm)> {
	let alg = document
		.get("alg")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::KeyDocument("Key document declares no algorithm.".into()))?;
	let algorithm = Algorithm::from_str(alg)?;
	let jwk: Jwk = serde_json::from_value(document.clone())
		.map_err(|err| Error::KeyDocument(format!("Malformed key document: {err}.")))?;
	let key = DecodingKey::from_jwk(&jwk)?;

	Ok((key, algorithm))
}
