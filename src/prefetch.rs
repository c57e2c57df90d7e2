//! One-shot store of payloads the server embedded alongside the initial page.
//!
//! Each entry is consumed by the first request whose REST URL matches it; later requests for the
//! same resource go to the network. This is not a cache.

// std
use std::fmt::{Formatter, Result as FmtResult};
// crates.io
use serde::{
	Deserialize, Deserializer, Serialize,
	de::{self, MapAccess, Visitor},
};
// self
use crate::_prelude::*;

/// Marker from which REST URLs are compared, so absolute and relative forms match.
pub const REST_PREFIX: &str = "blue/rest/";

/// Server-embedded payload for a single REST resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchEntry {
	/// REST URL the payload was produced for.
	#[serde(default)]
	pub rest_url: Option<String>,
	/// Raw JSON payload.
	#[serde(default)]
	pub data: Option<String>,
}
impl PrefetchEntry {
	/// Build an entry from a REST URL and its raw JSON payload.
	pub fn new(rest_url: impl Into<String>, data: impl Into<String>) -> Self {
		Self { rest_url: Some(rest_url.into()), data: Some(data.into()) }
	}

	fn matches(&self, trimmed_url: &str) -> bool {
		match (&self.rest_url, &self.data) {
			(Some(rest_url), Some(data)) if !rest_url.is_empty() && !data.is_empty() =>
				trim_rest_url(rest_url) == trimmed_url,
			_ => false,
		}
	}
}

/// Strip everything before [`REST_PREFIX`]; URLs without the marker are returned unchanged.
pub fn trim_rest_url(url: &str) -> &str {
	match url.find(REST_PREFIX) {
		Some(offset) => &url[offset..],
		None => url,
	}
}

/// Prefetched payloads keyed by the host's property names, in host order.
#[derive(Debug, Default)]
pub struct PrefetchStore {
	entries: Mutex<Vec<(String, PrefetchEntry)>>,
}
impl PrefetchStore {
	/// Create a store holding the given `(property, entry)` pairs.
	pub fn new(entries: impl IntoIterator<Item = (String, PrefetchEntry)>) -> Self {
		Self { entries: Mutex::new(entries.into_iter().collect()) }
	}

	/// Consume the payload prefetched for `url`.
	///
	/// Returns `None` on a miss. On a hit the entry is removed before its payload is parsed, so a
	/// malformed payload surfaces as an error once and is never retried.
	pub fn take(&self, url: &str) -> Option<Result<Value>> {
		let trimmed = trim_rest_url(url);
		let (property, entry) = {
			let mut entries = self.entries.lock();
			let position = entries.iter().position(|(_, entry)| entry.matches(trimmed))?;

			entries.remove(position)
		};

		tracing::debug!(property = %property, url = trimmed, "consumed prefetched payload");

		let data = entry.data.unwrap_or_default();

		Some(serde_json::from_str(&data).map_err(Error::from))
	}

	/// Number of entries not yet consumed.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Whether every entry has been consumed.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

/// `serde` helper reading the host's prefetch mapping while keeping its property order.
///
/// Values that are not entry-shaped are kept as empty entries, which never match.
pub fn deserialize_prefetch_entries<'de, D>(
	deserializer: D,
) -> std::result::Result<Vec<(String, PrefetchEntry)>, D::Error>
where
	D: Deserializer<'de>,
{
	struct EntriesVisitor;
	impl<'de> Visitor<'de> for EntriesVisitor {
		type Value = Vec<(String, PrefetchEntry)>;

		fn expecting(&self, f: &mut Formatter<'_>) -> FmtResult {
			f.write_str("a map of prefetch entries")
		}

		fn visit_unit<E>(self) -> std::result::Result<Self::Value, E>
		where
			E: de::Error,
		{
			Ok(Vec::new())
		}

		fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
		where
			A: MapAccess<'de>,
		{
			let mut entries = Vec::with_capacity(map.size_hint().unwrap_or_default());

			while let Some((property, raw)) = map.next_entry::<String, Value>()? {
				entries.push((property, serde_json::from_value(raw).unwrap_or_default()));
			}

			Ok(entries)
		}
	}

	deserializer.deserialize_any(EntriesVisitor)
}
