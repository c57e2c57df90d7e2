//! Token acquisition, verification, and expiry handling.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use blueocean_fetch::{Error, Result};
use chrono::Utc;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support::{self, KEY_PATH, TOKEN_PATH};

#[tokio::test]
async fn concurrent_callers_share_one_acquisition() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let token = support::signed_token(3_600);

	support::mount_token(&server, &token, 1).await;
	support::mount_public_key(&server, 1).await;

	let fetcher = support::fetcher(support::jwt_config(&server));
	let manager = fetcher.token_manager().expect("jwt enabled").clone();
	let handles = (0..5)
		.map(|_| {
			let manager = manager.clone();

			tokio::spawn(async move { manager.get_token_with_payload().await })
		})
		.collect::<Vec<_>>();
	let mut verified = Vec::new();

	for handle in handles {
		verified.push(handle.await.expect("task")?);
	}

	assert!(verified.iter().all(|v| v.token == token));
	assert!(verified.iter().all(|v| Arc::ptr_eq(&v.payload, &verified[0].payload)));
	assert_eq!(verified[0].payload["sub"], "alice");

	// A usable cached token is served without touching the network again.
	assert_eq!(manager.get_token().await?, token);

	let record = manager.cached_record().expect("cached record");

	assert!(record.expires_at.is_some_and(|exp| exp > Utc::now().timestamp() + 3_000));

	let snapshot = fetcher.metrics().snapshot();

	assert_eq!(snapshot.token_acquisitions, 1);
	assert_eq!(snapshot.token_verifications, 1);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn verification_failure_leaves_cache_untouched_and_retries() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let token = support::rogue_token(3_600);

	support::mount_token(&server, &token, 2).await;
	support::mount_public_key(&server, 2).await;

	let fetcher = support::fetcher(support::jwt_config(&server));
	let manager = fetcher.token_manager().expect("jwt enabled");
	let first = manager.get_token().await.expect_err("bad signature");

	assert!(first.is_verification());
	assert!(manager.cached_record().is_none());

	let second = manager.get_token().await.expect_err("bad signature again");

	assert!(second.is_verification());
	assert!(manager.cached_record().is_none());
	assert_eq!(fetcher.metrics().snapshot().verification_failures, 2);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn missing_token_header_is_reported() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&server)
		.await;
	support::mount_public_key(&server, 0).await;

	let fetcher = support::fetcher(support::jwt_config(&server));
	let err = fetcher.token_manager().expect("jwt enabled").get_token().await.expect_err("no header");

	assert!(matches!(err, Error::TokenMissing { url } if url.path() == TOKEN_PATH));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn failed_acquisition_is_retried_on_next_call() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({ "code": 401 })))
		.expect(2)
		.mount(&server)
		.await;

	let fetcher = support::fetcher(support::jwt_config(&server));
	let manager = fetcher.token_manager().expect("jwt enabled");

	for _ in 0..2 {
		let err = manager.get_token().await.expect_err("unauthorized");

		assert_eq!(err.status(), Some(http::StatusCode::UNAUTHORIZED));
		assert_eq!(err.response_body(), Some(&serde_json::json!({ "code": 401 })));
	}

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn token_inside_skew_window_forces_new_acquisition() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let token = support::signed_token(30);

	support::mount_token(&server, &token, 2).await;
	// The same raw token comes back, so its settled verification is reused.
	support::mount_public_key(&server, 1).await;

	let fetcher = support::fetcher(support::jwt_config(&server));
	let manager = fetcher.token_manager().expect("jwt enabled");

	assert_eq!(manager.get_token().await?, token);
	assert!(!manager.is_usable(Utc::now().timestamp()));
	assert_eq!(manager.get_token().await?, token);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn bearer_token_is_attached_to_requests() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let token = support::signed_token(3_600);

	support::mount_token(&server, &token, 1).await;
	support::mount_public_key(&server, 1).await;

	Mock::given(method("GET"))
		.and(path("/blue/rest/organizations/"))
		.and(wiremock::matchers::header("authorization", format!("Bearer {token}").as_str()))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/blue/rest/users/"))
		.and(wiremock::matchers::header("authorization", "Basic YWxpY2U6c2VjcmV0"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
		.expect(1)
		.mount(&server)
		.await;

	let fetcher = support::fetcher(support::jwt_config(&server));

	fetcher.fetch_json("/blue/rest/organizations/", Default::default()).await?;
	fetcher
		.fetch_json(
			"/blue/rest/users/",
			blueocean_fetch::FetchOptions::new().with_header(
				http::header::AUTHORIZATION,
				http::HeaderValue::from_static("Basic YWxpY2U6c2VjcmV0"),
			),
		)
		.await?;

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn callers_during_a_refresh_join_it() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let expiring = support::signed_token(30);
	let fresh = support::signed_token(3_600);

	Mock::given(method("GET"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(200).insert_header("X-BLUEOCEAN-JWT", expiring.as_str()))
		.up_to_n_times(1)
		.expect(1)
		.mount(&server)
		.await;
	support::mount_token(&server, &fresh, 1).await;
	Mock::given(method("GET"))
		.and(path(KEY_PATH))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(support::public_key_document())
				.set_delay(Duration::from_millis(400)),
		)
		.expect(2)
		.mount(&server)
		.await;

	let fetcher = support::fetcher(support::jwt_config(&server));
	let manager = fetcher.token_manager().expect("jwt enabled").clone();

	assert_eq!(manager.get_token().await?, expiring);
	assert!(!manager.is_usable(Utc::now().timestamp()));

	let mut handles = Vec::new();

	for _ in 0..3 {
		let manager = manager.clone();

		handles.push(tokio::spawn(async move { manager.get_token().await }));
		tokio::time::sleep(Duration::from_millis(150)).await;
	}
	for handle in handles {
		assert_eq!(handle.await.expect("task")?, fresh);
	}

	assert!(manager.is_usable(Utc::now().timestamp()));
	assert_eq!(fetcher.metrics().snapshot().token_acquisitions, 2);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn failed_verification_keeps_the_previous_record() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let expiring = support::signed_token(30);
	let rogue = support::rogue_token(3_600);

	Mock::given(method("GET"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(200).insert_header("X-BLUEOCEAN-JWT", expiring.as_str()))
		.up_to_n_times(1)
		.expect(1)
		.mount(&server)
		.await;
	support::mount_token(&server, &rogue, 1).await;
	support::mount_public_key(&server, 2).await;

	let fetcher = support::fetcher(support::jwt_config(&server));
	let manager = fetcher.token_manager().expect("jwt enabled");

	assert_eq!(manager.get_token().await?, expiring);

	let before = manager.cached_record().expect("cached record");
	// Inside the skew window, so the next call acquires again and receives the rogue token.
	let err = manager.get_token().await.expect_err("bad signature");

	assert!(err.is_verification());

	let after = manager.cached_record().expect("record survives");

	assert!(Arc::ptr_eq(&before.payload, &after.payload));
	assert_eq!(after.expires_at, before.expires_at);
	assert_eq!(after.payload["sub"], "alice");

	server.verify().await;
	Ok(())
}
