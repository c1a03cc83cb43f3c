//! Engine settings.
//!
//! Layered configuration: built-in defaults, then an optional TOML file,
//! then environment variables (`LEDGERLINK__SECTION__KEY`), then command
//! line options. The command line parser doubles as a `config` source so
//! every layer goes through the same deserialization path.

use std::collections::HashMap;

use chrono::Duration;
use clap::Parser;
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, Map, Source, Value};
use serde::Deserialize;

use crate::{
	cipher::{CipherError, KeyRingCipher},
	commands::{ProgressPolicy, SyncPolicy},
	providers::{file::FileProvider, rest::{RestAuth, RestProvider}, ProviderRegistry},
};

pub const ENV_PREFIX: &str = "LEDGERLINK";

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SyncSettings {
	pub min_sync_interval_seconds: u64,
	pub default_sync_window_days: u32,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct CacheSettings {
	pub provider_ttl_seconds: u64,
	pub redis_url: String,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ImportSettings {
	pub progress_record_interval: usize,
	pub progress_percent_interval: u8,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Default)]
pub struct CipherSettings {
	/// Key ring entries as `id:hex(32 bytes)`.
	pub keys: Vec<String>,
	pub active_key_id: u8,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderAuthKind {
	Bearer,
	ApiKey,
	File,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ProviderEndpoint {
	pub auth: ProviderAuthKind,
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default)]
	pub api_key_header: Option<String>,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct EngineSettings {
	pub sync: SyncSettings,
	pub cache: CacheSettings,
	pub import: ImportSettings,
	#[serde(default)]
	pub cipher: CipherSettings,
	#[serde(default)]
	pub providers: HashMap<String, ProviderEndpoint>,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct EngineOptions {
	#[clap(long = "config")]
	pub config_path: Option<String>,
	#[clap(long = "sync.min_sync_interval_seconds")]
	min_sync_interval_seconds: Option<u64>,
	#[clap(long = "sync.default_sync_window_days")]
	default_sync_window_days: Option<u32>,
	#[clap(long = "cache.provider_ttl_seconds")]
	cache_provider_ttl_seconds: Option<u64>,
	#[clap(long = "cache.redis_url")]
	redis_url: Option<String>,
	#[clap(long = "import.progress_record_interval")]
	progress_record_interval: Option<usize>,
	#[clap(long = "import.progress_percent_interval")]
	progress_percent_interval: Option<u8>,
}

/// Bridge one optional clap value into a config map entry.
pub fn insert_command_line_option<T>(
	map: &mut HashMap<String, Value>,
	key: &str,
	option: &Option<T>,
) where
	T: Clone + Into<Value>,
{
	if let Some(value) = option {
		map.insert(key.to_string(), value.clone().into());
	}
}

impl Source for EngineOptions {
	fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
		Box::new((*self).clone())
	}

	fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
		let mut map: HashMap<String, Value> = HashMap::new();

		insert_command_line_option(
			&mut map,
			"sync.min_sync_interval_seconds",
			&self.min_sync_interval_seconds,
		);
		insert_command_line_option(
			&mut map,
			"sync.default_sync_window_days",
			&self.default_sync_window_days.map(u64::from),
		);
		insert_command_line_option(
			&mut map,
			"cache.provider_ttl_seconds",
			&self.cache_provider_ttl_seconds,
		);
		insert_command_line_option(&mut map, "cache.redis_url", &self.redis_url);
		insert_command_line_option(
			&mut map,
			"import.progress_record_interval",
			&self.progress_record_interval.map(|v| v as u64),
		);
		insert_command_line_option(
			&mut map,
			"import.progress_percent_interval",
			&self.progress_percent_interval.map(|v| v as u64),
		);

		Ok(map)
	}
}

impl EngineSettings {
	pub fn load(opts: EngineOptions) -> Result<Self, ConfigError> {
		let mut builder = Self::set_defaults(Config::builder())?;
		if let Some(config_path) = &opts.config_path {
			builder = builder.add_source(config::File::with_name(config_path));
		}
		let mut settings: EngineSettings = builder
			.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
			.add_source(opts)
			.build()?
			.try_deserialize()?;
		settings.validate()?;
		Ok(settings)
	}

	fn set_defaults(
		builder: ConfigBuilder<DefaultState>,
	) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
		builder
			.set_default("sync.min_sync_interval_seconds", 300u64)?
			.set_default("sync.default_sync_window_days", 30u64)?
			.set_default("cache.provider_ttl_seconds", 300u64)?
			.set_default("cache.redis_url", "redis://127.0.0.1:6379")?
			.set_default("import.progress_record_interval", 100u64)?
			.set_default("import.progress_percent_interval", 5u64)
	}

	fn validate(&mut self) -> Result<(), ConfigError> {
		if self.sync.min_sync_interval_seconds == 0 {
			return Err(ConfigError::Message(
				"sync.min_sync_interval_seconds must be positive".to_string(),
			))
		}
		if self.sync.default_sync_window_days == 0 {
			return Err(ConfigError::Message(
				"sync.default_sync_window_days must be positive".to_string(),
			))
		}
		if self.import.progress_record_interval == 0 ||
			self.import.progress_percent_interval == 0
		{
			return Err(ConfigError::Message(
				"import progress intervals must be positive".to_string(),
			))
		}
		for (slug, endpoint) in &self.providers {
			if !matches!(endpoint.auth, ProviderAuthKind::File) &&
				endpoint.base_url.is_none()
			{
				return Err(ConfigError::Message(format!(
					"provider {slug} needs a base_url"
				)))
			}
		}
		Ok(())
	}

	pub fn sync_policy(&self) -> SyncPolicy {
		SyncPolicy {
			min_sync_interval: Duration::seconds(self.sync.min_sync_interval_seconds as i64),
			default_sync_window: Duration::days(self.sync.default_sync_window_days as i64),
		}
	}

	pub fn progress_policy(&self) -> ProgressPolicy {
		ProgressPolicy {
			record_interval: self.import.progress_record_interval,
			percent_interval: self.import.progress_percent_interval,
		}
	}

	pub fn cache_ttl(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.cache.provider_ttl_seconds)
	}

	pub fn build_cipher(&self) -> Result<KeyRingCipher, CipherError> {
		KeyRingCipher::from_hex_keys(&self.cipher.keys, self.cipher.active_key_id)
	}

	/// Wire the configured provider endpoints into a registry. Ids are
	/// assigned at startup; the registry is read-only afterwards.
	pub fn build_registry(&self) -> Result<ProviderRegistry, crate::providers::ProviderError> {
		let mut registry = ProviderRegistry::new();
		for (slug, endpoint) in &self.providers {
			let provider_id = uuid::Uuid::now_v7();
			match endpoint.auth {
				ProviderAuthKind::File => {
					registry.register(slug, provider_id, std::sync::Arc::new(FileProvider::new()));
				},
				ProviderAuthKind::Bearer => {
					let base_url = endpoint.base_url.as_deref().unwrap_or_default();
					registry.register(
						slug,
						provider_id,
						std::sync::Arc::new(RestProvider::new(base_url, RestAuth::BearerToken)?),
					);
				},
				ProviderAuthKind::ApiKey => {
					let base_url = endpoint.base_url.as_deref().unwrap_or_default();
					// Leaked once at startup; header names live as long as
					// the registry.
					let header: &'static str = Box::leak(
						endpoint
							.api_key_header
							.clone()
							.unwrap_or_else(|| "X-Api-Key".to_string())
							.into_boxed_str(),
					);
					registry.register(
						slug,
						provider_id,
						std::sync::Arc::new(RestProvider::new(
							base_url,
							RestAuth::ApiKeyHeader(header),
						)?),
					);
				},
			}
		}
		Ok(registry)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn defaults_load_without_any_sources() {
		let settings = EngineSettings::load(EngineOptions::default()).unwrap();
		assert_eq!(settings.sync.min_sync_interval_seconds, 300);
		assert_eq!(settings.sync.default_sync_window_days, 30);
		assert_eq!(settings.cache.provider_ttl_seconds, 300);
		assert_eq!(settings.import.progress_record_interval, 100);
		assert_eq!(settings.import.progress_percent_interval, 5);

		let policy = settings.sync_policy();
		assert_eq!(policy.min_sync_interval, Duration::minutes(5));
		assert_eq!(policy.default_sync_window, Duration::days(30));
	}

	#[test]
	fn command_line_overrides_defaults() {
		let opts = EngineOptions {
			min_sync_interval_seconds: Some(60),
			redis_url: Some("redis://cache:6379".to_string()),
			..Default::default()
		};
		let settings = EngineSettings::load(opts).unwrap();
		assert_eq!(settings.sync.min_sync_interval_seconds, 60);
		assert_eq!(settings.cache.redis_url, "redis://cache:6379");
	}

	#[test]
	fn config_file_layers_between_defaults_and_options() {
		let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
		writeln!(
			file,
			r#"
[sync]
min_sync_interval_seconds = 120

[providers.schwab]
auth = "bearer"
base_url = "https://api.example.com/v1"

[providers.chase_file]
auth = "file"
"#
		)
		.unwrap();

		let opts = EngineOptions {
			config_path: Some(file.path().to_string_lossy().into_owned()),
			min_sync_interval_seconds: Some(90),
			..Default::default()
		};
		let settings = EngineSettings::load(opts).unwrap();
		// Command line wins over the file.
		assert_eq!(settings.sync.min_sync_interval_seconds, 90);
		assert_eq!(settings.providers.len(), 2);

		let registry = settings.build_registry().unwrap();
		assert!(registry.supports("schwab"));
		assert!(registry.supports("chase_file"));
	}

	#[test]
	fn zero_intervals_are_rejected() {
		let opts = EngineOptions {
			min_sync_interval_seconds: Some(0),
			..Default::default()
		};
		assert!(EngineSettings::load(opts).is_err());
	}

	#[test]
	fn rest_provider_without_base_url_is_rejected() {
		let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
		writeln!(file, "[providers.schwab]\nauth = \"bearer\"").unwrap();
		let opts = EngineOptions {
			config_path: Some(file.path().to_string_lossy().into_owned()),
			..Default::default()
		};
		assert!(EngineSettings::load(opts).is_err());
	}

	#[test]
	fn cipher_builds_from_settings_keys() {
		let mut settings = EngineSettings::load(EngineOptions::default()).unwrap();
		settings.cipher =
			CipherSettings { keys: vec![format!("1:{}", "ab".repeat(32))], active_key_id: 1 };
		assert!(settings.build_cipher().is_ok());
	}
}
