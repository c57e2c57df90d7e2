//! Shared fixtures: signing keys, minted tokens, and mock endpoints.

// crates.io
use blueocean_fetch::{Fetcher, HostConfig, Transport};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

pub const KID: &str = "k1";
pub const TOKEN_PATH: &str = "/jwt-auth/token";
pub const KEY_PATH: &str = "/jwt-auth/jwks/k1/";

const SIGNING_KEY: &[u8] = include_bytes!("../fixtures/signing_key.pem");
const ROGUE_KEY: &[u8] = include_bytes!("../fixtures/rogue_key.pem");
const SIGNING_KEY_MODULUS: &str = include_str!("../fixtures/signing_key.n");

fn mint(pem: &[u8], expires_in: i64) -> String {
	let now = Utc::now().timestamp();
	let mut header = Header::new(Algorithm::RS256);

	header.kid = Some(KID.into());

	let claims = json!({ "sub": "alice", "iat": now, "exp": now + expires_in });
	let key = EncodingKey::from_rsa_pem(pem).expect("signing key");

	jsonwebtoken::encode(&header, &claims, &key).expect("minted token")
}

/// Token signed with the key published at [`KEY_PATH`].
pub fn signed_token(expires_in: i64) -> String {
	mint(SIGNING_KEY, expires_in)
}

/// Token claiming [`KID`] but signed with an unrelated key.
pub fn rogue_token(expires_in: i64) -> String {
	mint(ROGUE_KEY, expires_in)
}

pub fn public_key_document() -> Value {
	json!({
		"kid": KID,
		"kty": "RSA",
		"alg": "RS256",
		"use": "sig",
		"n": SIGNING_KEY_MODULUS.trim(),
		"e": "AQAB"
	})
}

pub async fn mount_token(server: &MockServer, token: &str, expected: u64) {
	Mock::given(method("GET"))
		.and(path(TOKEN_PATH))
		.respond_with(ResponseTemplate::new(200).insert_header("X-BLUEOCEAN-JWT", token))
		.expect(expected)
		.mount(server)
		.await;
}

pub async fn mount_public_key(server: &MockServer, expected: u64) {
	Mock::given(method("GET"))
		.and(path(KEY_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_json(public_key_document()))
		.expect(expected)
		.mount(server)
		.await;
}

/// Host configuration rooted at the mock server, without JWT.
pub fn plain_config(server: &MockServer) -> HostConfig {
	HostConfig::default().with_root_url(server.uri())
}

/// Host configuration rooted at the mock server, with JWT served by it.
pub fn jwt_config(server: &MockServer) -> HostConfig {
	plain_config(server).with_jwt(server.uri())
}

pub fn fetcher(config: HostConfig) -> Fetcher {
	Fetcher::with_transport(config, Transport::with_client(reqwest::Client::new()))
		.expect("fetcher")
}
