//! Most recently verified token payload and its expiry.

// self
use crate::_prelude::*;

/// Seconds before expiry at which a token is already treated as expired.
pub const CLOCK_SKEW_SECONDS: i64 = 60;

/// Verified token claims together with their expiry.
#[derive(Clone, Debug)]
pub struct TokenRecord {
	/// Decoded claims of the verified token.
	pub payload: Arc<Value>,
	/// `exp` claim in epoch seconds, when the token carries one.
	pub expires_at: Option<i64>,
}
impl TokenRecord {
	/// Seconds left until expiry at `now`, when the token expires at all.
	pub fn remaining(&self, now: i64) -> Option<i64> {
		self.expires_at.map(|expires_at| expires_at - now)
	}
}

/// Holds the last successfully verified token.
///
/// Only successful verifications write here; failures leave the previous record in place.
#[derive(Clone, Debug, Default)]
pub struct TokenCache {
	record: Option<TokenRecord>,
}
impl TokenCache {
	/// Create an empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Cached record, if any token was verified so far.
	pub fn record(&self) -> Option<&TokenRecord> {
		self.record.as_ref()
	}

	/// Whether the cached token can still be presented at `now` (epoch seconds).
	pub fn is_usable(&self, now: i64) -> bool {
		self.record
			.as_ref()
			.is_some_and(|record| record.remaining(now).is_none_or(|left| left >= CLOCK_SKEW_SECONDS))
	}

	/// Whether a cached, expiring token has entered the skew window at `now`.
	pub fn is_near_expiry(&self, now: i64) -> bool {
		self.record
			.as_ref()
			.and_then(|record| record.remaining(now))
			.is_some_and(|left| left < CLOCK_SKEW_SECONDS)
	}

	/// Replace the cached record.
	pub fn store(&mut self, payload: Arc<Value>, expires_at: Option<i64>) {
		self.record = Some(TokenRecord { payload, expires_at });
	}

	#[cfg(any(test, feature = "test"))]
	pub(crate) fn clear(&mut self) {
		self.record = None;
	}
}
