//! Prefetched payloads front-run the network exactly once.

// crates.io
use blueocean_fetch::{Error, FetchOptions, Result};
use http::Method;
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support;

#[tokio::test]
async fn prefetched_payload_replaces_only_the_first_request() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/blue/rest/foo"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "x": 2 })))
		.expect(1)
		.mount(&server)
		.await;

	let config =
		support::plain_config(&server).with_prefetch_entry("a", "blue/rest/foo", r#"{"x":1}"#);
	let fetcher = support::fetcher(config);
	let first = fetcher.fetch_json("/blue/rest/foo", FetchOptions::new()).await?;
	let second = fetcher.fetch_json("/blue/rest/foo", FetchOptions::new()).await?;

	assert_eq!(*first, json!({ "x": 1 }));
	assert_eq!(*second, json!({ "x": 2 }));
	assert_eq!(fetcher.metrics().snapshot().prefetch_hits, 1);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn non_get_and_undeduped_requests_leave_prefetch_untouched() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(path("/blue/rest/foo"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "live": true })))
		.expect(2)
		.mount(&server)
		.await;

	let config =
		support::plain_config(&server).with_prefetch_entry("a", "blue/rest/foo", r#"{"x":1}"#);
	let fetcher = support::fetcher(config);
	let posted = fetcher
		.fetch_json("/blue/rest/foo", FetchOptions::new().with_method(Method::POST))
		.await?;
	let undeduped = fetcher.fetch_json("/blue/rest/foo", FetchOptions::new().without_dedupe()).await?;

	assert_eq!(*posted, json!({ "live": true }));
	assert_eq!(*undeduped, json!({ "live": true }));
	assert_eq!(fetcher.prefetch_store().len(), 1);

	let prefetched = fetcher.fetch_json("/blue/rest/foo", FetchOptions::new()).await?;

	assert_eq!(*prefetched, json!({ "x": 1 }));
	assert!(fetcher.prefetch_store().is_empty());

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn malformed_prefetch_payload_fails_once_then_hits_network() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/blue/rest/foo"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "x": 3 })))
		.expect(1)
		.mount(&server)
		.await;

	let config = support::plain_config(&server).with_prefetch_entry("a", "blue/rest/foo", "{oops");
	let fetcher = support::fetcher(config);
	let err = fetcher.fetch_json("/blue/rest/foo", FetchOptions::new()).await.expect_err("bad payload");

	assert!(matches!(err, Error::Parse(_)));

	let body = fetcher.fetch_json("/blue/rest/foo", FetchOptions::new()).await?;

	assert_eq!(*body, json!({ "x": 3 }));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn host_document_prefetch_is_consumed_by_raw_fetch() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let host = json!({
		"config": { "jenkinsRootURL": server.uri() },
		"prefetchdata": {
			"pipelines": {
				"restUrl": "/jenkins/blue/rest/organizations/jenkins/pipelines/",
				"data": "[{\"name\":\"main\"}]"
			}
		}
	});
	let fetcher = support::fetcher(blueocean_fetch::HostConfig::from_json(&host.to_string())?);
	let response = fetcher
		.fetch("/blue/rest/organizations/jenkins/pipelines/", FetchOptions::new())
		.await?;

	assert!(response.is_prefetched());
	assert_eq!(response.json()?, json!([{ "name": "main" }]));
	assert_eq!(fetcher.metrics().snapshot().network_requests, 0);

	Ok(())
}
