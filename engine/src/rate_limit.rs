//! Endpoint rate limiting: the static rule table and the token-bucket port.
//!
//! The registry maps `"METHOD /path"` endpoints to [`RateLimitRule`]s; path
//! patterns may use `*` to match exactly one segment. The limiter port
//! performs the atomic check-and-consume; the in-memory adapter covers
//! single-node deployments, and any storage with an atomic decrement can
//! replace it. Limiter storage failures fail open.

use std::collections::HashMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::{RateLimitRule, RateLimitRuleError, RateLimitScope};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RateLimitConfigError {
	#[error("bad endpoint pattern `{0}`: expected `METHOD /path`")]
	BadEndpoint(String),
	#[error(transparent)]
	BadRule(#[from] RateLimitRuleError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Literal(String),
	Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EndpointPattern {
	method: String,
	segments: Vec<Segment>,
}

impl EndpointPattern {
	fn parse(endpoint: &str) -> Result<Self, RateLimitConfigError> {
		let (method, path) = endpoint
			.split_once(' ')
			.ok_or_else(|| RateLimitConfigError::BadEndpoint(endpoint.to_string()))?;
		if method.is_empty() || !path.starts_with('/') {
			return Err(RateLimitConfigError::BadEndpoint(endpoint.to_string()))
		}
		let segments = path
			.trim_matches('/')
			.split('/')
			.filter(|segment| !segment.is_empty())
			.map(|segment| {
				if segment == "*" {
					Segment::Wildcard
				} else {
					Segment::Literal(segment.to_string())
				}
			})
			.collect();
		Ok(Self { method: method.to_ascii_uppercase(), segments })
	}

	fn matches(&self, method: &str, path: &str) -> bool {
		if !method.eq_ignore_ascii_case(&self.method) {
			return false
		}
		let segments: Vec<&str> =
			path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
		segments.len() == self.segments.len() &&
			self.segments.iter().zip(segments).all(|(pattern, actual)| match pattern {
				Segment::Literal(literal) => literal == actual,
				Segment::Wildcard => true,
			})
	}
}

/// Static endpoint → rule table, read-only after startup.
pub struct RuleRegistry {
	rules: Vec<(EndpointPattern, RateLimitRule)>,
}

impl RuleRegistry {
	pub fn new(
		rules: Vec<(&str, RateLimitRule)>,
	) -> Result<Self, RateLimitConfigError> {
		let mut parsed = Vec::with_capacity(rules.len());
		for (endpoint, rule) in rules {
			// The rule's own constructor already refuses non-positive
			// parameters; re-assert here so a registry is valid as a whole.
			RateLimitRule::new(
				rule.max_tokens(),
				rule.refill_rate_per_minute(),
				rule.scope,
				rule.cost(),
				rule.enabled,
			)?;
			parsed.push((EndpointPattern::parse(endpoint)?, rule));
		}
		Ok(Self { rules: parsed })
	}

	/// First matching rule wins; register more specific endpoints first.
	pub fn rule_for_endpoint(&self, method: &str, path: &str) -> Option<&RateLimitRule> {
		self.rules
			.iter()
			.find(|(pattern, _)| pattern.matches(method, path))
			.map(|(_, rule)| rule)
	}

	pub fn len(&self) -> usize {
		self.rules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}
}

/// The table served in production. Auth endpoints are restrictive and
/// IP-scoped, sync endpoints are scoped per user+provider, reads are
/// generous and user-scoped.
pub fn default_rules() -> Result<RuleRegistry, RateLimitConfigError> {
	use RateLimitScope::*;
	let rule = RateLimitRule::new;
	RuleRegistry::new(vec![
		("POST /api/v1/sessions", rule(5, 5.0, Ip, 1, true)?),
		("POST /api/v1/providers/*/connect", rule(10, 10.0, User, 1, true)?),
		("DELETE /api/v1/connections/*", rule(10, 10.0, User, 1, true)?),
		("POST /api/v1/connections/*/sync", rule(10, 10.0, UserProvider, 2, true)?),
		("POST /api/v1/accounts/*/holdings/sync", rule(10, 10.0, UserProvider, 2, true)?),
		("POST /api/v1/imports", rule(10, 10.0, User, 5, true)?),
		("GET /api/v1/accounts", rule(100, 100.0, User, 1, true)?),
		("GET /api/v1/accounts/*", rule(100, 100.0, User, 1, true)?),
		("GET /api/v1/accounts/*/balances", rule(100, 100.0, User, 1, true)?),
		("GET /api/v1/accounts/*/transactions", rule(100, 100.0, User, 1, true)?),
	])
}

/// Storage key for a bucket: `rate_limit:{scope}:{identity}:{endpoint}`,
/// with the identity omitted for globally-scoped rules.
pub fn bucket_key(rule: &RateLimitRule, identity: &str, endpoint: &str) -> String {
	match rule.scope {
		RateLimitScope::Global => format!("rate_limit:global:{endpoint}"),
		scope => format!("rate_limit:{scope}:{identity}:{endpoint}"),
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
	pub allowed: bool,
	/// Seconds until a retry can succeed; zero when allowed.
	pub retry_after: f64,
	pub remaining: u32,
}

impl RateLimitDecision {
	fn allow(remaining: u32) -> Self {
		Self { allowed: true, retry_after: 0.0, remaining }
	}
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
	/// Atomically consume `cost` tokens (the rule's cost when `None`) from
	/// the bucket at `key`. `now` is a unix timestamp for deterministic
	/// tests; adapters use the wall clock when absent. Storage errors fail
	/// open.
	async fn check_and_consume(
		&self,
		key: &str,
		rule: &RateLimitRule,
		cost: Option<u32>,
		now: Option<f64>,
	) -> RateLimitDecision;
}

struct Bucket {
	tokens: f64,
	last_refill: f64,
}

/// In-process token bucket over a mutex-guarded map.
#[derive(Default)]
pub struct TokenBucketLimiter {
	buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
	async fn check_and_consume(
		&self,
		key: &str,
		rule: &RateLimitRule,
		cost: Option<u32>,
		now: Option<f64>,
	) -> RateLimitDecision {
		if !rule.enabled {
			return RateLimitDecision::allow(rule.max_tokens())
		}

		let now = now.unwrap_or_else(|| {
			std::time::SystemTime::now()
				.duration_since(std::time::UNIX_EPOCH)
				.map(|d| d.as_secs_f64())
				.unwrap_or(0.0)
		});
		let cost = cost.unwrap_or(rule.cost()) as f64;
		let max = rule.max_tokens() as f64;
		let rate_per_second = rule.refill_rate_per_minute() / 60.0;

		let mut buckets = self.buckets.lock().await;
		let bucket = buckets
			.entry(key.to_string())
			.or_insert(Bucket { tokens: max, last_refill: now });

		let elapsed = (now - bucket.last_refill).max(0.0);
		bucket.tokens = (bucket.tokens + elapsed * rate_per_second).min(max);
		bucket.last_refill = now;

		if bucket.tokens >= cost {
			bucket.tokens -= cost;
			RateLimitDecision::allow(bucket.tokens.floor() as u32)
		} else {
			let retry_after = (cost - bucket.tokens) / rate_per_second;
			RateLimitDecision {
				allowed: false,
				retry_after,
				remaining: bucket.tokens.floor() as u32,
			}
		}
	}
}
