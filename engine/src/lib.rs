//! Provider integration and sync engine.
//!
//! Library-shaped core that aggregates financial data (accounts, holdings,
//! transactions, balance history) from external providers on behalf of end
//! users. The surrounding presentation layer hands immutable commands and
//! queries to the handlers in [`commands`] and [`queries`]; everything
//! external — persistence, provider APIs, credential encryption, event
//! fan-out, caching, rate limiting — is a port with adapters supplied at
//! wiring time.

pub mod cache;
pub mod cipher;
pub mod commands;
pub mod domain;
pub mod events;
pub mod logging;
pub mod ownership;
pub mod providers;
pub mod queries;
pub mod rate_limit;
pub mod settings;
pub mod store;
