//! Core types and trait definitions for the Quill notification pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! storage backend, the resolvers, the API and the workers all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod comment;
pub mod cursor;
pub mod error;
pub mod event;
pub mod moderation;
pub mod notification;
pub mod reference;
pub mod report;
pub mod store;
pub mod webhook;

pub use error::{Error, Result};
