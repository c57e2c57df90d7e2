//! Host-document configuration consumed by the request layer.
//!
//! The embedding page publishes a `$blueocean` object carrying URLs, feature flags, security
//! settings, organization identity, and the one-shot prefetch mapping. [`HostConfig`] is its
//! read-only Rust view.

// std
use std::{collections::HashMap, mem};
// crates.io
use serde::Deserialize;
use url::Url;
// self
use crate::{
	_prelude::*,
	prefetch::{PrefetchEntry, deserialize_prefetch_entries},
};

/// Default Jenkins root when the host does not publish one.
pub const DEFAULT_ROOT_URL: &str = "/jenkins";
/// Default static resource root.
pub const DEFAULT_RESOURCE_URL: &str = "/jenkins/static";
/// Default Blue Ocean application root.
pub const DEFAULT_APP_URL: &str = "/";
/// Feature flag gating organization display.
pub const FEATURE_ORGANIZATIONS: &str = "organizations.enabled";

/// Read-only configuration published by the host document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HostConfig {
	/// Application configuration.
	#[serde(default)]
	pub config: AppConfig,
	/// Organization the client operates in.
	#[serde(default)]
	pub organization: Organization,
	/// One-shot prefetched payloads, handed to the prefetch store on startup.
	#[serde(default, rename = "prefetchdata", deserialize_with = "deserialize_prefetch_entries")]
	pub prefetch_data: Vec<(String, PrefetchEntry)>,
}
impl HostConfig {
	/// Parse the host's `$blueocean` JSON object.
	pub fn from_json(raw: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(raw)?;

		config.validate()?;

		Ok(config)
	}

	/// Check settings that would otherwise fail on first use.
	pub fn validate(&self) -> Result<()> {
		if self.is_jwt_enabled() {
			self.jwt_service_host_url()?;
		}

		Ok(())
	}

	/// Jenkins root URL prefixed onto relative request paths.
	pub fn root_url(&self) -> &str {
		&self.config.root_url
	}

	/// Static resource root.
	pub fn resource_url(&self) -> &str {
		&self.config.resource_url
	}

	/// Blue Ocean application root.
	pub fn app_url(&self) -> &str {
		&self.config.app_url
	}

	/// Difference between server and browser clocks.
	pub fn server_browser_time_skew(&self) -> chrono::TimeDelta {
		chrono::TimeDelta::milliseconds(self.config.server_browser_time_skew_millis)
	}

	/// REST API root (`{root}/blue/rest`).
	pub fn rest_root(&self) -> String {
		format!("{}/blue/rest", self.root_url())
	}

	/// Whether requests must carry a JWT bearer token.
	pub fn is_jwt_enabled(&self) -> bool {
		self.config.jenkins_config.security.enable_jwt
	}

	/// Host serving the token and key endpoints, without a trailing slash.
	pub fn jwt_service_host_url(&self) -> Result<&str> {
		match self.config.jenkins_config.security.jwt_service_host_url.as_deref() {
			Some(url) if !url.trim().is_empty() => Ok(url.trim_end_matches('/')),
			_ => Err(Error::Config {
				field: "jenkinsConfig.security.jwtServiceHostUrl",
				reason: "Must be set when JWT is enabled.".into(),
			}),
		}
	}

	/// Login page URL.
	pub fn login_url(&self) -> Option<&str> {
		self.config.jenkins_config.security.login_url.as_deref()
	}

	/// Whether analytics are enabled.
	pub fn analytics_enabled(&self) -> bool {
		self.config.jenkins_config.analytics
	}

	/// Organization name.
	pub fn organization_name(&self) -> &str {
		&self.organization.name
	}

	/// Organization display name.
	pub fn organization_display_name(&self) -> &str {
		&self.organization.display_name
	}

	/// Organization group.
	pub fn organization_group(&self) -> &str {
		&self.organization.organization_group
	}

	/// Feature flag value, falling back to `default` (or `false`) when unset.
	pub fn is_feature_enabled(&self, name: &str, default: Option<bool>) -> bool {
		self.config.features.get(name).copied().or(default).unwrap_or(false)
	}

	/// Whether organizations should be shown.
	pub fn show_org(&self) -> bool {
		self.is_feature_enabled(FEATURE_ORGANIZATIONS, Some(false))
	}

	/// Enable every feature listed in `?features=A,B` of the page URL.
	pub fn enable_features_from_query(&mut self, page_url: &Url) {
		for (name, value) in page_url.query_pairs() {
			if name != "features" {
				continue;
			}

			for feature in value.split(',').filter(|feature| !feature.is_empty()) {
				self.config.features.insert(feature.to_owned(), true);
			}
		}
	}

	/// Move the prefetch mapping out, leaving none behind.
	pub fn take_prefetch_data(&mut self) -> Vec<(String, PrefetchEntry)> {
		mem::take(&mut self.prefetch_data)
	}

	/// Override the root URL.
	pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
		self.config.root_url = root_url.into();

		self
	}

	/// Enable JWT handling against the given service host.
	pub fn with_jwt(mut self, service_host_url: impl Into<String>) -> Self {
		let security = &mut self.config.jenkins_config.security;

		security.enable_jwt = true;
		security.jwt_service_host_url = Some(service_host_url.into());

		self
	}

	/// Set a feature flag.
	pub fn with_feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
		self.config.features.insert(name.into(), enabled);

		self
	}

	/// Append a prefetched payload under the given property name.
	pub fn with_prefetch_entry(
		mut self,
		property: impl Into<String>,
		rest_url: impl Into<String>,
		data: impl Into<String>,
	) -> Self {
		self.prefetch_data.push((property.into(), PrefetchEntry::new(rest_url, data)));

		self
	}
}

/// Application-level settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
	/// Feature flags by name.
	#[serde(default)]
	pub features: HashMap<String, bool>,
	/// Blue Ocean application root.
	#[serde(rename = "blueoceanAppURL", default = "default_app_url")]
	pub app_url: String,
	/// Server clock minus browser clock, in milliseconds.
	#[serde(default)]
	pub server_browser_time_skew_millis: i64,
	/// Jenkins root URL.
	#[serde(rename = "jenkinsRootURL", default = "default_root_url")]
	pub root_url: String,
	/// Static resource root.
	#[serde(default = "default_resource_url")]
	pub resource_url: String,
	/// Jenkins-side settings.
	#[serde(default)]
	pub jenkins_config: JenkinsConfig,
}
impl Default for AppConfig {
	fn default() -> Self {
		Self {
			features: HashMap::new(),
			app_url: default_app_url(),
			server_browser_time_skew_millis: 0,
			root_url: default_root_url(),
			resource_url: default_resource_url(),
			jenkins_config: JenkinsConfig::default(),
		}
	}
}

/// Jenkins-side settings.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct JenkinsConfig {
	/// Security settings.
	#[serde(default)]
	pub security: SecurityConfig,
	/// Whether analytics are enabled.
	#[serde(default)]
	pub analytics: bool,
}

/// Security settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
	/// Whether requests carry JWT bearer tokens.
	#[serde(rename = "enableJWT", default)]
	pub enable_jwt: bool,
	/// Host serving `/jwt-auth/*`.
	#[serde(default)]
	pub jwt_service_host_url: Option<String>,
	/// Login page URL.
	#[serde(default)]
	pub login_url: Option<String>,
}

/// Organization identity.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
	/// Organization name.
	#[serde(default)]
	pub name: String,
	/// Human readable name.
	#[serde(default)]
	pub display_name: String,
	/// Organization group.
	#[serde(default)]
	pub organization_group: String,
}

fn default_root_url() -> String {
	DEFAULT_ROOT_URL.into()
}

fn default_resource_url() -> String {
	DEFAULT_RESOURCE_URL.into()
}

fn default_app_url() -> String {
	DEFAULT_APP_URL.into()
}
