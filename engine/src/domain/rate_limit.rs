//! Token-bucket rate limit rule value object.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RateLimitRuleError {
	#[error("max_tokens must be positive, got {0}")]
	InvalidMaxTokens(i64),
	#[error("refill_rate must be positive, got {0}")]
	InvalidRefillRate(f64),
	#[error("cost must be positive, got {0}")]
	InvalidCost(i64),
	#[error("unknown rate limit scope: {0}")]
	UnknownScope(String),
}

/// How bucket keys are derived for a rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
	Ip,
	User,
	UserProvider,
	Global,
}

impl RateLimitScope {
	pub fn as_str(&self) -> &'static str {
		match self {
			RateLimitScope::Ip => "ip",
			RateLimitScope::User => "user",
			RateLimitScope::UserProvider => "user_provider",
			RateLimitScope::Global => "global",
		}
	}
}

impl FromStr for RateLimitScope {
	type Err = RateLimitRuleError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"ip" => Ok(RateLimitScope::Ip),
			"user" => Ok(RateLimitScope::User),
			"user_provider" => Ok(RateLimitScope::UserProvider),
			"global" => Ok(RateLimitScope::Global),
			other => Err(RateLimitRuleError::UnknownScope(other.to_string())),
		}
	}
}

impl fmt::Display for RateLimitScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Parameters of one token bucket: capacity, refill rate (tokens per
/// minute), key scope and per-request cost.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
	max_tokens: u32,
	refill_rate_per_minute: f64,
	pub scope: RateLimitScope,
	cost: u32,
	pub enabled: bool,
}

impl RateLimitRule {
	pub fn new(
		max_tokens: u32,
		refill_rate_per_minute: f64,
		scope: RateLimitScope,
		cost: u32,
		enabled: bool,
	) -> Result<Self, RateLimitRuleError> {
		if max_tokens == 0 {
			return Err(RateLimitRuleError::InvalidMaxTokens(max_tokens as i64))
		}
		if refill_rate_per_minute <= 0.0 {
			return Err(RateLimitRuleError::InvalidRefillRate(refill_rate_per_minute))
		}
		if cost == 0 {
			return Err(RateLimitRuleError::InvalidCost(cost as i64))
		}
		Ok(Self { max_tokens, refill_rate_per_minute, scope, cost, enabled })
	}

	pub fn max_tokens(&self) -> u32 {
		self.max_tokens
	}

	pub fn refill_rate_per_minute(&self) -> f64 {
		self.refill_rate_per_minute
	}

	pub fn cost(&self) -> u32 {
		self.cost
	}

	pub fn seconds_per_token(&self) -> f64 {
		60.0 / self.refill_rate_per_minute
	}

	/// Recommended storage TTL: time to refill a full bucket plus a minute of
	/// slack for clock skew.
	pub fn ttl_seconds(&self) -> u64 {
		(self.max_tokens as f64 / self.refill_rate_per_minute * 60.0) as u64 + 60
	}
}
