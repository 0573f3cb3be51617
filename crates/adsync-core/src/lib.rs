//! Core types and trait definitions for adsync.
//!
//! This crate is free of HTTP and LDAP dependencies. It holds the
//! master-record model, the validated configuration, the error taxonomy and
//! the narrow contracts through which the reconciliation crates reach the
//! directory and the master-record system.

pub mod backend;
pub mod config;
pub mod error;
pub mod model;

pub use error::{BackendError, ConfigError, Error, Registry, Result};
