//! wopihost - Multi-tenant WOPI host
//!
//! Brokers document editing between client applications and
//! WOPI-compatible editors (Collabora Online and compatible). The
//! application embeds the editor in an iframe; the editor fetches and
//! saves file bytes through this service; the service authenticates every
//! editor request, enforces per-file locking, and delegates file I/O to
//! pluggable storage backends.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod storage;
