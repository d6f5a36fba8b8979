//! Cached resolvers for the identities, tokens and pages a comment can
//! reference.
//!
//! Every resolver is a [`Fetcher`](cache::Fetcher) wrapped in a
//! [`ResolverCache`](cache::ResolverCache). Caches are plain values: build
//! them once with [`Resolvers::build`](settings::Resolvers::build) and hand
//! them to whatever needs them.

#![allow(async_fn_in_trait)]

pub mod cache;
pub mod ens;
pub mod error;
pub mod erc20;
pub mod farcaster;
pub mod identity;
pub mod queue;
pub mod references;
pub mod settings;
pub mod url;

mod http;

pub use error::ResolveError;
pub use settings::{ResolverSettings, Resolvers};
