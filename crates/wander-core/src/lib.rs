//! wander-core - Sync and session core for Wander
//!
//! This crate contains the offline-first synchronization layer shared by all
//! Wander shells: the local cache store, the delta sync engines for
//! attractions and reviews, the sync orchestrator, and the token lifecycle
//! manager that keeps an authenticated session alive across expiry.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod net;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Attraction, AttractionId, Review, ReviewId};
