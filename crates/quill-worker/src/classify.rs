//! Turning one comment event into the notifications it implies.
//!
//! | event | notifications |
//! |-------|---------------|
//! | `CommentAdded`, comment with a parent | `reply` to each distinct ancestor author, nearest first, up to the depth limit |
//! | `CommentAdded`, reaction | `reaction` to the parent's author |
//! | `CommentAdded`, `CommentEdited`, `CommentReferencesUpdated` | `mention` per mentioned address, `quote` per quoted comment |
//! | anything else | none |
//!
//! Nobody is notified about their own comment. Missing comments are not
//! errors: they come back in [`Classification::skipped`] for reporting and
//! the event still counts as handled.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use quill_core::{
  comment::{Comment, CommentType, normalize_address},
  event::CommentEvent,
  moderation::ModerationStatus,
  notification::{NewNotification, NotificationType, notification_uid},
  store::CommentStore,
};
use thiserror::Error;

use crate::moderation::ReviewRequest;

/// Why part of an event could not be turned into notifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Skipped {
  #[error("comment {0} not found")]
  CommentMissing(String),

  #[error("parent {parent_id} of comment {comment_id} not found")]
  ParentMissing { comment_id: String, parent_id: String },

  #[error("comment {quoted_id} quoted by {comment_id} not found")]
  QuotedMissing { comment_id: String, quoted_id: String },
}

impl Skipped {
  pub fn comment_id(&self) -> &str {
    match self {
      Self::CommentMissing(id) => id,
      Self::ParentMissing { comment_id, .. } | Self::QuotedMissing { comment_id, .. } => comment_id,
    }
  }
}

#[derive(Debug, Default)]
pub struct Classification {
  pub notifications: Vec<NewNotification>,
  pub skipped:       Vec<Skipped>,
  /// Set when a newly added comment still awaits moderation.
  pub moderate:      Option<ReviewRequest>,
}

/// Notifications derived from `comment`, all sharing its chain, app and
/// author.
struct Builder<'c> {
  comment:    &'c Comment,
  created_at: DateTime<Utc>,
  out:        Classification,
  uids:       HashSet<String>,
}

impl<'c> Builder<'c> {
  fn new(comment: &'c Comment, created_at: DateTime<Utc>) -> Self {
    Self { comment, created_at, out: Classification::default(), uids: HashSet::new() }
  }

  /// Adds a notification unless the recipient is the author or the uid was
  /// already produced. Returns whether it was added.
  fn push(
    &mut self,
    ty: NotificationType,
    recipient: &str,
    parent_id: &str,
    discriminator: &str,
  ) -> bool {
    let recipient = normalize_address(recipient);
    let uid = notification_uid(ty, self.comment.chain_id, parent_id, discriminator);
    if recipient == self.comment.author || !self.uids.insert(uid.clone()) {
      return false;
    }
    self.out.notifications.push(NewNotification {
      uid,
      notification_type: ty,
      chain_id:          self.comment.chain_id,
      recipient_address: recipient,
      author_address:    self.comment.author.clone(),
      app_signer:        self.comment.app.clone(),
      parent_id:         parent_id.to_owned(),
      entity_id:         self.comment.id.clone(),
      created_at:        self.created_at,
    });
    true
  }

  fn skip(&mut self, skipped: Skipped) { self.out.skipped.push(skipped); }
}

/// Classify `event`. Store errors propagate; missing data is skipped.
pub async fn classify<S: CommentStore>(
  store: &S,
  event: &CommentEvent,
  reply_depth_limit: usize,
) -> Result<Classification, S::Error> {
  let (comment_id, added) = match event {
    CommentEvent::CommentAdded(p) => (p.id.clone(), true),
    CommentEvent::CommentEdited(p) => (p.id.clone(), false),
    CommentEvent::CommentReferencesUpdated(p) => (p.id.clone(), false),
    CommentEvent::CommentDeleted(_)
    | CommentEvent::CommentReactionsUpdated(_)
    | CommentEvent::CommentModerationStatusUpdated(_) => return Ok(Classification::default()),
  };

  let Some(comment) = store.get_comment(comment_id.clone()).await? else {
    return Ok(Classification {
      skipped: vec![Skipped::CommentMissing(comment_id)],
      ..Default::default()
    });
  };
  if comment.is_deleted() {
    return Ok(Classification::default());
  }

  let created_at = if added { comment.created_at } else { comment.updated_at };
  let mut builder = Builder::new(&comment, created_at);

  if added {
    match (comment.comment_type, comment.parent_id.as_deref()) {
      (CommentType::Reaction, Some(parent_id)) => {
        reaction(store, &mut builder, parent_id).await?;
      }
      (CommentType::Comment, Some(parent_id)) => {
        replies(store, &mut builder, parent_id, reply_depth_limit).await?;
      }
      (_, None) => {}
    }
  }

  if comment.comment_type == CommentType::Comment {
    mentions(&mut builder);
    quotes(store, &mut builder).await?;
  }

  let mut out = builder.out;
  if added && comment.moderation_status == ModerationStatus::Pending {
    let root_id = match comment.parent_id.clone() {
      Some(parent_id) => store.resolve_root_id(parent_id).await?,
      None => None,
    };
    out.moderate = Some(ReviewRequest { comment, root_id });
  }
  Ok(out)
}

async fn reaction<S: CommentStore>(
  store: &S,
  builder: &mut Builder<'_>,
  parent_id: &str,
) -> Result<(), S::Error> {
  match store.get_comment(parent_id.to_owned()).await? {
    Some(parent) if !parent.is_deleted() => {
      let entity = builder.comment.id.clone();
      builder.push(NotificationType::Reaction, &parent.author, &parent.id, &entity);
    }
    Some(_) => {}
    None => builder.skip(Skipped::ParentMissing {
      comment_id: builder.comment.id.clone(),
      parent_id:  parent_id.to_owned(),
    }),
  }
  Ok(())
}

async fn replies<S: CommentStore>(
  store: &S,
  builder: &mut Builder<'_>,
  parent_id: &str,
  depth: usize,
) -> Result<(), S::Error> {
  let ancestors = store.ancestors(builder.comment.id.clone(), depth).await?;
  if ancestors.is_empty() && depth > 0 {
    builder.skip(Skipped::ParentMissing {
      comment_id: builder.comment.id.clone(),
      parent_id:  parent_id.to_owned(),
    });
    return Ok(());
  }
  let entity = builder.comment.id.clone();
  let mut notified = HashSet::new();
  for ancestor in ancestors.iter().filter(|a| !a.is_deleted()) {
    if notified.contains(&ancestor.author) {
      continue;
    }
    if builder.push(NotificationType::Reply, &ancestor.author, &ancestor.id, &entity) {
      notified.insert(ancestor.author.clone());
    }
  }
  Ok(())
}

fn mentions(builder: &mut Builder<'_>) {
  let comment = builder.comment;
  for address in comment.references.iter().filter_map(|r| r.mentioned_address()) {
    let recipient = normalize_address(address);
    builder.push(NotificationType::Mention, &recipient, &comment.id, &recipient);
  }
}

async fn quotes<S: CommentStore>(store: &S, builder: &mut Builder<'_>) -> Result<(), S::Error> {
  let comment = builder.comment;
  let mut seen = HashSet::new();
  for quoted_id in comment.references.iter().filter_map(|r| r.quoted_comment()) {
    if !seen.insert(quoted_id) {
      continue;
    }
    match store.get_comment(quoted_id.to_owned()).await? {
      Some(quoted) if !quoted.is_deleted() => {
        builder.push(NotificationType::Quote, &quoted.author, &quoted.id, &comment.id);
      }
      Some(_) => {}
      None => builder.skip(Skipped::QuotedMissing {
        comment_id: comment.id.clone(),
        quoted_id:  quoted_id.to_owned(),
      }),
    }
  }
  Ok(())
}
