//! Opaque, authentication-agnostic provider credentials.
//!
//! The domain layer never sees plaintext secrets: credentials are an
//! encrypted blob plus a type tag the infrastructure uses to route handling.
//! Decryption happens inside command handlers via the cipher port and the
//! plaintext never leaves handler-local scope.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
	#[error("encrypted credential data cannot be empty")]
	EmptyData,
	#[error("unknown credential type: {0}")]
	UnknownType(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
	Oauth2,
	ApiKey,
	LinkToken,
	Certificate,
	FileImport,
	Custom,
}

impl CredentialType {
	pub fn as_str(&self) -> &'static str {
		match self {
			CredentialType::Oauth2 => "oauth2",
			CredentialType::ApiKey => "api_key",
			CredentialType::LinkToken => "link_token",
			CredentialType::Certificate => "certificate",
			CredentialType::FileImport => "file_import",
			CredentialType::Custom => "custom",
		}
	}

	/// Whether credentials of this type can be renewed without sending the
	/// user back through the provider's authorization flow.
	pub fn supports_refresh(&self) -> bool {
		matches!(self, CredentialType::Oauth2 | CredentialType::LinkToken)
	}
}

impl FromStr for CredentialType {
	type Err = CredentialsError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"oauth2" => Ok(CredentialType::Oauth2),
			"api_key" => Ok(CredentialType::ApiKey),
			"link_token" => Ok(CredentialType::LinkToken),
			"certificate" => Ok(CredentialType::Certificate),
			"file_import" => Ok(CredentialType::FileImport),
			"custom" => Ok(CredentialType::Custom),
			other => Err(CredentialsError::UnknownType(other.to_string())),
		}
	}
}

impl fmt::Display for CredentialType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Encrypted credential container attached to a provider connection.
///
/// `expires_at` is the access credential's expiry as reported by the
/// provider, not the refresh token's.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
	encrypted_data: Vec<u8>,
	credential_type: CredentialType,
	expires_at: Option<DateTime<Utc>>,
}

impl ProviderCredentials {
	pub fn new(
		encrypted_data: Vec<u8>,
		credential_type: CredentialType,
		expires_at: Option<DateTime<Utc>>,
	) -> Result<Self, CredentialsError> {
		if encrypted_data.is_empty() {
			return Err(CredentialsError::EmptyData)
		}
		Ok(Self { encrypted_data, credential_type, expires_at })
	}

	pub fn encrypted_data(&self) -> &[u8] {
		&self.encrypted_data
	}

	pub fn credential_type(&self) -> CredentialType {
		self.credential_type
	}

	pub fn expires_at(&self) -> Option<DateTime<Utc>> {
		self.expires_at
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		match self.expires_at {
			Some(expires_at) => now >= expires_at,
			None => false,
		}
	}

	pub fn is_expiring_soon(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
		match self.expires_at {
			Some(expires_at) => now >= expires_at - threshold,
			None => false,
		}
	}

	pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
		self.expires_at.map(|expires_at| (expires_at - now).max(Duration::zero()))
	}

	pub fn supports_refresh(&self) -> bool {
		self.credential_type.supports_refresh()
	}
}

// Never prints the blob: credentials must not leak into logs or error chains.
impl fmt::Debug for ProviderCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProviderCredentials")
			.field("credential_type", &self.credential_type)
			.field("expires_at", &self.expires_at)
			.field("encrypted_data", &format_args!("<{} bytes>", self.encrypted_data.len()))
			.finish()
	}
}
