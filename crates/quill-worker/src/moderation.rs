//! Outbound trigger asking the moderation collaborator to review a new
//! comment.
//!
//! The request is a signed GET; the collaborator answers later through the
//! API's moderation webhook.

use std::{future::Future, time::Duration};

use chrono::Utc;
use quill_core::{
  comment::Comment,
  webhook::{SIGNATURE_HEADER, TIMESTAMP_PARAM, sign},
};
use reqwest::Client;

use crate::{
  Error, Result,
  config::ModerationSettings,
};

/// A comment awaiting review.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
  pub comment: Comment,
  /// Top-level comment of the thread, for replies.
  pub root_id: Option<String>,
}

pub trait ModerationHook: Send + Sync {
  fn request_review<'a>(
    &'a self,
    request: &'a ReviewRequest,
  ) -> impl Future<Output = Result<()>> + Send + 'a;
}

/// Query parameters of a review request, in the order they are sent.
pub fn review_params(request: &ReviewRequest, timestamp: i64) -> Vec<(String, String)> {
  let comment = &request.comment;
  let (score, labels) = comment
    .moderation_classification
    .as_ref()
    .map(|c| (c.score, c.labels_param()))
    .unwrap_or_default();
  let mut params = vec![
    ("commentId".to_owned(), comment.id.clone()),
    ("chainId".to_owned(), comment.chain_id.to_string()),
    ("author".to_owned(), comment.author.clone()),
    (TIMESTAMP_PARAM.to_owned(), timestamp.to_string()),
    ("score".to_owned(), format!("{score:.4}")),
    ("labels".to_owned(), labels),
  ];
  if let Some(root_id) = &request.root_id {
    params.push(("rootId".to_owned(), root_id.clone()));
  }
  params
}

#[derive(Clone)]
pub struct ModerationClient {
  client: Client,
  url:    String,
  secret: String,
}

impl ModerationClient {
  pub fn new(url: impl Into<String>, secret: impl Into<String>, timeout: Duration) -> Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(concat!("quill-worker/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, url: url.into(), secret: secret.into() })
  }

  /// `None` when no webhook URL is configured.
  pub fn from_settings(settings: &ModerationSettings) -> Result<Option<Self>> {
    settings
      .webhook_url
      .as_deref()
      .filter(|url| !url.is_empty())
      .map(|url| {
        Self::new(
          url,
          settings.webhook_secret.clone(),
          Duration::from_millis(settings.timeout_ms),
        )
      })
      .transpose()
  }
}

impl ModerationHook for ModerationClient {
  async fn request_review<'a>(&'a self, request: &'a ReviewRequest) -> Result<()> {
    let params = review_params(request, Utc::now().timestamp());
    let signature = sign(self.secret.as_bytes(), &params, b"")?;

    let resp = self
      .client
      .get(&self.url)
      .query(&params)
      .header(SIGNATURE_HEADER, signature)
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      return Err(Error::ModerationStatus(status.as_u16()));
    }
    tracing::debug!(comment_id = %request.comment.id, "moderation review requested");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
  };

  use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
  };
  use quill_core::{
    comment::NewComment,
    moderation::{ClassificationResult, ModerationStatus},
    webhook::{DEFAULT_MAX_AGE, WebhookError, verify},
  };

  use super::*;

  const SECRET: &str = "hook-secret";

  fn request() -> ReviewRequest { ReviewRequest { comment: comment(), root_id: None } }

  fn comment() -> Comment {
    let new = NewComment::new("0xaa", 8453, "0xA1", "0xC0", "gm", Utc::now());
    let raw: HashMap<String, f64> = [("spam".to_owned(), 0.8), ("hate".to_owned(), 0.1)].into();
    Comment {
      id:                        new.id,
      chain_id:                  new.chain_id,
      author:                    new.author,
      app:                       new.app,
      parent_id:                 None,
      comment_type:              new.comment_type,
      content:                   new.content,
      revision:                  0,
      references:                vec![],
      references_status:         None,
      moderation_status:         ModerationStatus::Pending,
      moderation_classification: Some(ClassificationResult::from_raw(&raw).unwrap()),
      created_at:                new.created_at,
      updated_at:                new.created_at,
      deleted_at:                None,
    }
  }

  #[test]
  fn params_carry_classification() {
    let params = review_params(&request(), 1_700_000_000);
    let map: HashMap<_, _> = params.into_iter().collect();
    assert_eq!(map["commentId"], "0xaa");
    assert_eq!(map["author"], "0xa1");
    assert_eq!(map["score"], "0.8000");
    assert_eq!(map["labels"], "spam:0.8000,hate:0.1000");
    assert_eq!(map["timestamp"], "1700000000");
    assert!(!map.contains_key("rootId"));
  }

  #[test]
  fn replies_carry_their_thread_root() {
    let reply = ReviewRequest { root_id: Some("0x01".into()), ..request() };
    let params = review_params(&reply, 1_700_000_000);
    assert_eq!(params.last(), Some(&("rootId".to_owned(), "0x01".to_owned())));
  }

  type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

  /// A collaborator that accepts only correctly signed requests.
  async fn serve(status: StatusCode) -> (String, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new()
      .route(
        "/review",
        get(
          move |State(seen): State<Seen>,
                headers: HeaderMap,
                Query(params): Query<Vec<(String, String)>>| async move {
            let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
            if verify(SECRET.as_bytes(), &params, b"", signature, Utc::now(), DEFAULT_MAX_AGE)
              .is_err()
            {
              return StatusCode::UNAUTHORIZED;
            }
            seen.lock().unwrap().push(params.into_iter().collect());
            status
          },
        ),
      )
      .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/review"), seen)
  }

  #[tokio::test]
  async fn signed_request_is_accepted() {
    let (url, seen) = serve(StatusCode::OK).await;
    let client = ModerationClient::new(url, SECRET, Duration::from_secs(5)).unwrap();
    client.request_review(&request()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["chainId"], "8453");
    assert_eq!(seen[0]["labels"], "spam:0.8000,hate:0.1000");
  }

  #[tokio::test]
  async fn wrong_secret_and_error_status_fail() {
    let (url, _) = serve(StatusCode::OK).await;
    let client = ModerationClient::new(url, "other", Duration::from_secs(5)).unwrap();
    let err = client.request_review(&request()).await.unwrap_err();
    assert!(matches!(err, Error::ModerationStatus(401)));

    let (url, _) = serve(StatusCode::SERVICE_UNAVAILABLE).await;
    let client = ModerationClient::new(url, SECRET, Duration::from_secs(5)).unwrap();
    let err = client.request_review(&request()).await.unwrap_err();
    assert!(matches!(err, Error::ModerationStatus(503)));
  }

  #[tokio::test]
  async fn empty_secret_fails_before_sending() {
    let (url, seen) = serve(StatusCode::OK).await;
    let client = ModerationClient::new(url, "", Duration::from_secs(5)).unwrap();
    let err = client.request_review(&request()).await.unwrap_err();
    assert!(matches!(err, Error::Signing(WebhookError::InvalidKey)));
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn disabled_without_url() {
    let settings = ModerationSettings::default();
    assert!(ModerationClient::from_settings(&settings).unwrap().is_none());
  }
}
