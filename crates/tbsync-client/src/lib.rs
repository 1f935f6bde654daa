//! tbsync-client: REST client for the IoT platform.
//!
//! This crate is the only channel through which tbsync reads or mutates
//! remote state. Every call is authenticated with the session token,
//! bounded by a timeout, and fails with a typed [`RequestError`].

pub mod client;
pub mod mutations;
pub mod queries;

pub use client::{ApiClient, RequestError};
