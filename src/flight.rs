//! Single-flight deduplication of asynchronous work.
//!
//! A [`Flight`] is the shared outcome of one spawned producer. [`SingleFlight`] keeps at most one
//! open flight per key: callers arriving while a flight is open join it instead of starting their
//! own producer, and the key is released the moment the producer settles so the next caller
//! starts fresh.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
	future::{Future, IntoFuture},
	pin::Pin,
};
// crates.io
use tokio::sync::watch;
// self
use crate::_prelude::*;

/// Shared handle to the eventual outcome of a spawned producer.
///
/// Every clone observes the same outcome. The producer runs to completion on the runtime even
/// when all handles are dropped.
pub struct Flight<T> {
	key: Arc<str>,
	outcome: watch::Receiver<Option<Result<T>>>,
}
impl<T> Flight<T>
where
	T: 'static + Clone + Send + Sync,
{
	/// Spawn `work` and return a handle to its outcome.
	///
	/// `release` runs exactly once when the work finishes, before any waiter is woken. It receives
	/// the flight itself and whether the work succeeded; a panicking producer counts as a failure.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime.
	pub fn launch<F, R>(key: impl Into<Arc<str>>, work: F, release: R) -> Self
	where
		F: 'static + Send + Future<Output = Result<T>>,
		R: 'static + Send + FnOnce(&Flight<T>, bool),
	{
		let (tx, rx) = watch::channel(None);
		let flight = Self { key: key.into(), outcome: rx };
		let own = flight.clone();

		tokio::spawn(async move {
			let mut release = Release { flight: own, release: Some(release), succeeded: false };
			let outcome = work.await;

			release.succeeded = outcome.is_ok();

			drop(release);

			let _ = tx.send(Some(outcome));
		});

		flight
	}

	/// Wait for the shared outcome.
	pub async fn wait(mut self) -> Result<T> {
		let settled = match self.outcome.wait_for(Option::is_some).await {
			Ok(outcome) => (*outcome).clone(),
			Err(_) => None,
		};

		settled.unwrap_or_else(|| Err(Error::Abandoned { key: self.key.to_string() }))
	}

	/// Settled outcome, if the producer already finished.
	pub fn peek(&self) -> Option<Result<T>> {
		(*self.outcome.borrow()).clone()
	}
}
impl<T> Flight<T> {
	/// Key the flight was launched under.
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Whether the producer has published its outcome.
	pub fn is_settled(&self) -> bool {
		self.outcome.borrow().is_some()
	}

	/// Whether both handles observe the same producer.
	pub fn is_same(&self, other: &Self) -> bool {
		self.outcome.same_channel(&other.outcome)
	}
}
impl<T> Clone for Flight<T> {
	fn clone(&self) -> Self {
		Self { key: self.key.clone(), outcome: self.outcome.clone() }
	}
}
impl<T> Debug for Flight<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Flight")
			.field("key", &self.key)
			.field("settled", &self.is_settled())
			.finish()
	}
}
impl<T> IntoFuture for Flight<T>
where
	T: 'static + Clone + Send + Sync,
{
	type IntoFuture = Pin<Box<dyn Future<Output = Result<T>> + Send>>;
	type Output = Result<T>;

	fn into_future(self) -> Self::IntoFuture {
		Box::pin(self.wait())
	}
}

/// Whether a caller started the producer or joined an open flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightRole {
	/// The caller's producer was invoked.
	Leader,
	/// The caller joined a flight started by someone else.
	Follower,
}

/// Tracks open flights by key, allowing at most one concurrent producer per key.
pub struct SingleFlight<T> {
	flights: Arc<Mutex<HashMap<String, Flight<T>>>>,
}
impl<T> SingleFlight<T>
where
	T: 'static + Clone + Send + Sync,
{
	/// Create an empty tracker.
	pub fn new() -> Self {
		Self { flights: Arc::new(Mutex::new(HashMap::new())) }
	}

	/// Return the open flight for `key`, or invoke `producer` right away and open one.
	///
	/// `producer` must not call back into this tracker.
	///
	/// # Panics
	///
	/// Panics when a producer has to be spawned outside a Tokio runtime.
	pub fn dedupe<P, F>(&self, key: &str, producer: P) -> Flight<T>
	where
		P: FnOnce() -> F,
		F: 'static + Send + Future<Output = Result<T>>,
	{
		self.dedupe_with_role(key, producer).0
	}

	/// Same as [`dedupe`](Self::dedupe), also reporting whether the caller led or joined.
	///
	/// # Panics
	///
	/// Panics when a producer has to be spawned outside a Tokio runtime.
	pub fn dedupe_with_role<P, F>(&self, key: &str, producer: P) -> (Flight<T>, FlightRole)
	where
		P: FnOnce() -> F,
		F: 'static + Send + Future<Output = Result<T>>,
	{
		let mut flights = self.flights.lock();

		if let Some(flight) = flights.get(key) {
			tracing::debug!(key, "joining in-flight request");

			return (flight.clone(), FlightRole::Follower);
		}

		let table = self.flights.clone();
		let owned_key = key.to_owned();
		let flight = Flight::launch(key, producer(), move |settled, succeeded| {
			let mut flights = table.lock();

			if flights.get(&owned_key).is_some_and(|open| open.is_same(settled)) {
				flights.remove(&owned_key);
			}

			tracing::trace!(key = %owned_key, succeeded, "released flight");
		});

		flights.insert(key.to_owned(), flight.clone());

		(flight, FlightRole::Leader)
	}

	/// Whether a flight is currently open for `key`.
	pub fn contains(&self, key: &str) -> bool {
		self.flights.lock().contains_key(key)
	}

	/// Number of open flights.
	pub fn len(&self) -> usize {
		self.flights.lock().len()
	}

	/// Whether no flight is open.
	pub fn is_empty(&self) -> bool {
		self.flights.lock().is_empty()
	}
}
impl<T> Clone for SingleFlight<T> {
	fn clone(&self) -> Self {
		Self { flights: self.flights.clone() }
	}
}
impl<T> Debug for SingleFlight<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SingleFlight").field("open", &self.flights.lock().len()).finish()
	}
}
impl<T> Default for SingleFlight<T>
where
	T: 'static + Clone + Send + Sync,
{
	fn default() -> Self {
		Self::new()
	}
}

struct Release<T, R>
where
	R: FnOnce(&Flight<T>, bool),
{
	flight: Flight<T>,
	release: Option<R>,
	succeeded: bool,
}
impl<T, R> Drop for Release<T, R>
where
	R: FnOnce(&Flight<T>, bool),
{
	fn drop(&mut self) {
		if let Some(release) = self.release.take() {
			release(&self.flight, self.succeeded);
		}
	}
}
