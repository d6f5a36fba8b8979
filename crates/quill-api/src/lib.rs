//! JSON API for Quill notifications.
//!
//! Exposes an axum [`Router`] backed by any store implementing
//! [`CommentStore`] and [`NotificationStore`], plus an [`IdentityLookup`] for
//! ENS names and author profiles. TLS and transport concerns are the
//! caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", quill_api::api_router(state))
//! ```

pub mod autocomplete;
pub mod error;
pub mod notifications;
pub mod params;
pub mod webhook;

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  routing::{get, post},
};
use quill_core::store::{CommentStore, NotificationStore};
use quill_resolver::identity::IdentityLookup;

pub use error::ApiError;

/// Shared secret and clock tolerance of the moderation webhook.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
  pub secret:  String,
  pub max_age: Duration,
}

/// State shared by every handler.
pub struct AppState<S, I> {
  pub store:    Arc<S>,
  pub identity: Arc<I>,
  pub webhook:  Arc<WebhookConfig>,
}

impl<S, I> Clone for AppState<S, I> {
  fn clone(&self) -> Self {
    Self {
      store:    self.store.clone(),
      identity: self.identity.clone(),
      webhook:  self.webhook.clone(),
    }
  }
}

/// Build the API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, I>(state: AppState<S, I>) -> Router<()>
where
  S: CommentStore + NotificationStore + 'static,
  I: IdentityLookup + 'static,
{
  Router::new()
    // Notifications
    .route("/notifications", get(notifications::list::<S, I>))
    .route("/notifications/grouped", get(notifications::grouped::<S, I>))
    .route("/notifications/seen", post(notifications::mark_seen::<S, I>))
    // Mentions
    .route("/autocomplete", get(autocomplete::handler::<S, I>))
    // Collaborator callbacks
    .route("/webhooks/moderation", get(webhook::moderation::<S, I>))
    .with_state(state)
}

#[cfg(test)]
mod tests;
