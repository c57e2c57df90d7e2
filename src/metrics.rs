//! Request-layer telemetry: per-fetcher counters and optional `metrics` export.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
use crate::_prelude::*;

#[cfg(feature = "metrics")]
type LabelSet = SmallVec<[Label; 2]>;

const METRIC_NETWORK_TOTAL: &str = "blueocean_fetch_network_requests_total";
const METRIC_PREFETCH_HITS_TOTAL: &str = "blueocean_fetch_prefetch_hits_total";
const METRIC_DEDUPE_JOINS_TOTAL: &str = "blueocean_fetch_dedupe_joins_total";
const METRIC_TOKEN_ACQUISITIONS_TOTAL: &str = "blueocean_fetch_token_acquisitions_total";
const METRIC_TOKEN_VERIFICATIONS_TOTAL: &str = "blueocean_fetch_token_verifications_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Which fetch surface produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Surface {
	/// JSON body fetches.
	Json,
	/// Raw response fetches.
	Raw,
}
impl Surface {
	/// Label value for exported metrics.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Json => "json",
			Self::Raw => "raw",
		}
	}
}

/// Thread-safe counters for a single fetcher and its token manager.
#[derive(Debug, Default)]
pub struct FetchMetrics {
	network_requests: AtomicU64,
	prefetch_hits: AtomicU64,
	dedupe_joins: AtomicU64,
	token_acquisitions: AtomicU64,
	token_verifications: AtomicU64,
	verification_failures: AtomicU64,
}
impl FetchMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a request sent to the network.
	pub fn record_network(&self, surface: Surface) {
		self.network_requests.fetch_add(1, Ordering::Relaxed);

		record_surface_event(METRIC_NETWORK_TOTAL, surface);
	}

	/// Record a request answered from the prefetch store.
	pub fn record_prefetch_hit(&self, surface: Surface) {
		self.prefetch_hits.fetch_add(1, Ordering::Relaxed);

		record_surface_event(METRIC_PREFETCH_HITS_TOTAL, surface);
	}

	/// Record a caller joining an in-flight request.
	pub fn record_dedupe_join(&self, surface: Surface) {
		self.dedupe_joins.fetch_add(1, Ordering::Relaxed);

		record_surface_event(METRIC_DEDUPE_JOINS_TOTAL, surface);
	}

	/// Record a call to the token endpoint.
	pub fn record_token_acquisition(&self, success: bool) {
		self.token_acquisitions.fetch_add(1, Ordering::Relaxed);

		record_status_event(METRIC_TOKEN_ACQUISITIONS_TOTAL, success);
	}

	/// Record a verification pass (key fetch plus signature check).
	pub fn record_token_verification(&self, success: bool) {
		self.token_verifications.fetch_add(1, Ordering::Relaxed);

		if !success {
			self.verification_failures.fetch_add(1, Ordering::Relaxed);
		}

		record_status_event(METRIC_TOKEN_VERIFICATIONS_TOTAL, success);
	}

	/// Take a point-in-time snapshot.
	pub fn snapshot(&self) -> FetchMetricsSnapshot {
		FetchMetricsSnapshot {
			network_requests: self.network_requests.load(Ordering::Relaxed),
			prefetch_hits: self.prefetch_hits.load(Ordering::Relaxed),
			dedupe_joins: self.dedupe_joins.load(Ordering::Relaxed),
			token_acquisitions: self.token_acquisitions.load(Ordering::Relaxed),
			token_verifications: self.token_verifications.load(Ordering::Relaxed),
			verification_failures: self.verification_failures.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of [`FetchMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchMetricsSnapshot {
	/// Requests sent to the network.
	pub network_requests: u64,
	/// Requests answered from the prefetch store.
	pub prefetch_hits: u64,
	/// Callers that joined an in-flight request.
	pub dedupe_joins: u64,
	/// Calls to the token endpoint.
	pub token_acquisitions: u64,
	/// Verification passes.
	pub token_verifications: u64,
	/// Verification passes that failed.
	pub verification_failures: u64,
}

/// Install a Prometheus recorder as the global `metrics` recorder.
///
/// Calling it again after a successful install does nothing.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder()?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Handle of the recorder installed by [`install_default_exporter`], if any.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

#[cfg(feature = "metrics")]
fn record_surface_event(name: &'static str, surface: Surface) {
	let mut labels = LabelSet::new();

	labels.push(Label::new("surface", surface.as_str()));

	metrics::counter!(name, labels.iter()).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_surface_event(_: &'static str, _: Surface) {}

#[cfg(feature = "metrics")]
fn record_status_event(name: &'static str, success: bool) {
	let mut labels = LabelSet::new();

	labels.push(Label::new("status", if success { "success" } else { "error" }));

	metrics::counter!(name, labels.iter()).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_status_event(_: &'static str, _: bool) {}
