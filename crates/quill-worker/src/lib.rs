//! Background workers for the Quill notification pipeline.
//!
//! * [`fanout`] drains the outbox into notifications and triggers moderation.
//! * [`refresher`] retries reference resolutions that failed upstream.
//!
//! Both are plain structs over the store traits; the binary in `main.rs`
//! wires them to SQLite, the resolver caches and process signals.

#![allow(async_fn_in_trait)]

pub mod classify;
pub mod config;
pub mod error;
pub mod fanout;
pub mod moderation;
pub mod refresher;
pub mod shutdown;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
