//! Database layer (C8): prepared statements, partition batching, and the
//! counter-update path, wrapping a `scylla::Session`.

use std::sync::Arc;

use anyhow::{Context, Result};
use scylla::batch::{Batch, BatchType};
use scylla::prepared_statement::PreparedStatement;
use scylla::Session;

use crate::record::{FollowByActorRow, FollowByTargetRow, LikeCountDelta, LikeRow, PostRow, RowKind};

/// Accumulates rows of one shape produced while processing a single
/// archive, flushing them as one logged batch once `threshold` rows have
/// accumulated. Only meaningful for `R: RowKind` with `BATCHABLE == true` —
/// all rows pushed onto one `PartitionBatch` must share a partition key,
/// which holds within a single archive for the batchable row types.
pub struct PartitionBatch<R> {
    rows: Vec<R>,
    threshold: usize,
}

impl<R: RowKind> PartitionBatch<R> {
    pub fn new(threshold: usize) -> Self {
        debug_assert!(R::BATCHABLE, "PartitionBatch used with a non-batchable row type");
        Self { rows: Vec::with_capacity(threshold), threshold }
    }

    /// Pushes a row, returning `true` when the batch has reached its flush
    /// threshold and the caller should flush it.
    pub fn push(&mut self, row: R) -> bool {
        self.rows.push(row);
        self.rows.len() >= self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Takes the accumulated rows, leaving the batch empty.
    pub fn take(&mut self) -> Vec<R> {
        std::mem::take(&mut self.rows)
    }
}

/// Wraps a Scylla session with the prepared statements the processor needs.
pub struct Database {
    session: Arc<Session>,
    insert_post: PreparedStatement,
    insert_follow_by_actor: PreparedStatement,
    insert_follow_by_target: PreparedStatement,
    insert_like: PreparedStatement,
    increment_like_count: PreparedStatement,
}

impl Database {
    pub async fn connect(nodes: &[String]) -> Result<Self> {
        let session: Session = scylla::SessionBuilder::new()
            .known_nodes(nodes)
            .build()
            .await
            .context("connecting to scylla cluster")?;

        crate::schema::bootstrap(&session)
            .await
            .context("bootstrapping schema")?;

        let insert_post = session
            .prepare(
                "INSERT INTO netsync.posts (did, display_name, rkey, content, facets, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .await
            .context("preparing posts insert")?;

        let insert_follow_by_actor = session
            .prepare(
                "INSERT INTO netsync.follows_by_actor (actor, target, created_at) VALUES (?, ?, ?)",
            )
            .await
            .context("preparing follows_by_actor insert")?;

        let insert_follow_by_target = session
            .prepare(
                "INSERT INTO netsync.follows_by_target (target, actor, created_at) VALUES (?, ?, ?)",
            )
            .await
            .context("preparing follows_by_target insert")?;

        let insert_like = session
            .prepare("INSERT INTO netsync.likes (did, rkey, subject, created_at) VALUES (?, ?, ?, ?)")
            .await
            .context("preparing likes insert")?;

        let increment_like_count = session
            .prepare(
                "UPDATE netsync.like_counts SET count = count + 1 \
                 WHERE did = ? AND nsid = ? AND rkey = ?",
            )
            .await
            .context("preparing like_counts update")?;

        Ok(Self {
            session: Arc::new(session),
            insert_post,
            insert_follow_by_actor,
            insert_follow_by_target,
            insert_like,
            increment_like_count,
        })
    }

    pub async fn insert_post_batch(&self, rows: Vec<PostRow>) -> Result<()> {
        let mut batch = Batch::new(BatchType::Logged);
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            batch.append_statement(self.insert_post.clone());
            values.push((
                row.did,
                row.display_name,
                row.rkey,
                row.content,
                row.facets,
                row.created_at.timestamp_millis(),
            ));
        }
        self.session
            .batch(&batch, values)
            .await
            .context("executing posts batch")?;
        Ok(())
    }

    pub async fn insert_follow_by_actor_batch(&self, rows: Vec<FollowByActorRow>) -> Result<()> {
        let mut batch = Batch::new(BatchType::Logged);
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            batch.append_statement(self.insert_follow_by_actor.clone());
            values.push((row.actor, row.target, row.created_at.timestamp_millis()));
        }
        self.session
            .batch(&batch, values)
            .await
            .context("executing follows_by_actor batch")?;
        Ok(())
    }

    pub async fn insert_like_batch(&self, rows: Vec<LikeRow>) -> Result<()> {
        let mut batch = Batch::new(BatchType::Logged);
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            batch.append_statement(self.insert_like.clone());
            values.push((row.did, row.rkey, row.subject, row.created_at.timestamp_millis()));
        }
        self.session
            .batch(&batch, values)
            .await
            .context("executing likes batch")?;
        Ok(())
    }

    /// Partition key varies per record, so this is issued unbatched —
    /// matching spec.md's rationale for `follows_by_target`.
    pub async fn insert_follow_by_target(&self, row: FollowByTargetRow) -> Result<()> {
        self.session
            .execute(
                &self.insert_follow_by_target,
                (row.target, row.actor, row.created_at.timestamp_millis()),
            )
            .await
            .context("executing follows_by_target insert")?;
        Ok(())
    }

    pub async fn increment_like_count(&self, delta: LikeCountDelta) -> Result<()> {
        self.session
            .execute(&self.increment_like_count, (delta.did, delta.nsid, delta.rkey))
            .await
            .context("executing like_counts update")?;
        Ok(())
    }
}

/// The write surface the archive processor (C3) needs, kept sync so the
/// processor itself can run on a blocking thread without depending on
/// `tokio`. [`ScyllaRowSink`] is the real implementation; tests use an
/// in-memory fake instead of a live cluster.
pub trait RowSink {
    fn insert_post_batch(&self, rows: Vec<PostRow>) -> Result<()>;
    fn insert_follow_by_actor_batch(&self, rows: Vec<FollowByActorRow>) -> Result<()>;
    fn insert_follow_by_target(&self, row: FollowByTargetRow) -> Result<()>;
    fn insert_like_batch(&self, rows: Vec<LikeRow>) -> Result<()>;
    fn increment_like_count(&self, delta: LikeCountDelta) -> Result<()>;
}

/// Drives a [`Database`]'s async methods from a worker's blocking thread via
/// the runtime handle captured at construction time.
pub struct ScyllaRowSink {
    db: Arc<Database>,
    handle: tokio::runtime::Handle,
}

impl ScyllaRowSink {
    pub fn new(db: Arc<Database>, handle: tokio::runtime::Handle) -> Self {
        Self { db, handle }
    }
}

impl RowSink for ScyllaRowSink {
    fn insert_post_batch(&self, rows: Vec<PostRow>) -> Result<()> {
        self.handle.block_on(self.db.insert_post_batch(rows))
    }

    fn insert_follow_by_actor_batch(&self, rows: Vec<FollowByActorRow>) -> Result<()> {
        self.handle.block_on(self.db.insert_follow_by_actor_batch(rows))
    }

    fn insert_follow_by_target(&self, row: FollowByTargetRow) -> Result<()> {
        self.handle.block_on(self.db.insert_follow_by_target(row))
    }

    fn insert_like_batch(&self, rows: Vec<LikeRow>) -> Result<()> {
        self.handle.block_on(self.db.insert_like_batch(rows))
    }

    fn increment_like_count(&self, delta: LikeCountDelta) -> Result<()> {
        self.handle.block_on(self.db.increment_like_count(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FollowByActorRow;
    use chrono::Utc;

    fn row(actor: &str) -> FollowByActorRow {
        FollowByActorRow {
            actor: actor.to_string(),
            target: "target".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn flushes_at_threshold() {
        let mut batch: PartitionBatch<FollowByActorRow> = PartitionBatch::new(3);
        assert!(!batch.push(row("a")));
        assert!(!batch.push(row("b")));
        assert!(batch.push(row("c")));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn take_empties_the_batch() {
        let mut batch: PartitionBatch<FollowByActorRow> = PartitionBatch::new(2);
        batch.push(row("a"));
        let taken = batch.take();
        assert_eq!(taken.len(), 1);
        assert!(batch.is_empty());
    }
}
