//! Request layer for Blue Ocean clients: single-flight fetches, verified JWT bearer tokens, and
//! one-shot consumption of server-prefetched payloads.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod config;
pub mod fetch;
pub mod flight;
pub mod http;
pub mod metrics;
pub mod prefetch;
pub mod token;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use parking_lot::Mutex;
	pub use serde_json::Value;
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	config::HostConfig,
	error::{Error, Result},
	fetch::{FetchOptions, Fetcher},
	flight::{Flight, FlightRole, SingleFlight},
	http::{
		client::{Credentials, Transport},
		response::FetchResponse,
	},
	metrics::{FetchMetrics, FetchMetricsSnapshot},
	prefetch::{PrefetchEntry, PrefetchStore},
	token::{
		cache::{CLOCK_SKEW_SECONDS, TokenCache, TokenRecord},
		manager::{TokenLifecycleManager, VerifiedToken},
	},
};
