//! rentd — car-rental booking engine.
//!
//! The embeddable core of a rental marketplace: vehicle availability
//! checking, the booking status lifecycle, and transition-driven
//! notifications, persisted through an append-only WAL. The HTTP layer,
//! identity provider, and payment gateway live outside this crate and
//! call into [`engine::Engine`].

pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
