//! The closed set of AT Protocol record types this crate understands, and the
//! row shapes they map onto in the database layer (C4 / C8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded record from a repository, tagged by its `$type`.
///
/// Only the fields this crate actually writes somewhere are kept; anything
/// else on the wire record is dropped at decode time by the archive adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    FeedPost(FeedPost),
    FeedLike(FeedLike),
    FeedRepost,
    GraphFollow(GraphFollow),
    GraphBlock,
    ActorProfile(ActorProfile),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPost {
    pub text: String,
    pub created_at: String,
    #[serde(default)]
    pub facets: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedLike {
    /// `at://did/collection/rkey` of the record being liked.
    pub subject: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphFollow {
    pub subject: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorProfile {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Default display name used when an actor has no profile record, or the
/// profile record has no `displayName` set.
pub const UNKNOWN_DISPLAY_NAME: &str = "unknown";

/// A row in `netsync.posts`.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub did: String,
    pub display_name: String,
    pub rkey: String,
    pub content: String,
    pub facets: String,
    pub created_at: DateTime<Utc>,
}

/// A row in `netsync.follows_by_actor`.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowByActorRow {
    pub actor: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
}

/// A row in `netsync.follows_by_target`.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowByTargetRow {
    pub target: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// A row in `netsync.likes`.
#[derive(Debug, Clone, PartialEq)]
pub struct LikeRow {
    pub did: String,
    pub rkey: String,
    pub subject: String,
    pub created_at: DateTime<Utc>,
}

/// A single increment against `netsync.like_counts`.
#[derive(Debug, Clone, PartialEq)]
pub struct LikeCountDelta {
    pub did: String,
    pub nsid: String,
    pub rkey: String,
}

/// A row type's partitioning behaviour within one archive, used by
/// [`crate::db::PartitionBatch`] to decide whether rows from a single
/// archive can share one logged batch.
///
/// New row types declare this instead of call sites re-deriving it from the
/// table's partition key (see DESIGN.md).
pub trait RowKind {
    /// `true` when every row produced while processing a single archive
    /// shares the same partition key (so they can be grouped into one
    /// `BatchType::Logged` statement); `false` when the partition key varies
    /// per record and each row must be written unbatched.
    const BATCHABLE: bool;
}

impl RowKind for PostRow {
    const BATCHABLE: bool = true;
}

impl RowKind for FollowByActorRow {
    const BATCHABLE: bool = true;
}

impl RowKind for LikeRow {
    const BATCHABLE: bool = true;
}

impl RowKind for FollowByTargetRow {
    const BATCHABLE: bool = false;
}
