//! Archive processor (C3): the per-archive ingestion algorithm. Runs
//! synchronously so it can execute on a blocking thread (see `lifecycle.rs`);
//! all database writes go through the [`RowSink`] boundary.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use tracing::{debug, warn};

use crate::archive::RepoArchive;
use crate::db::{PartitionBatch, RowSink};
use crate::mappers::{facets_to_string, parse_at_uri, parse_created_at};
use crate::queue::Outcome;
use crate::record::{
    FollowByActorRow, FollowByTargetRow, LikeCountDelta, LikeRow, PostRow, Record,
    UNKNOWN_DISPLAY_NAME,
};

/// Row count at which each batchable partition batch flushes. Matches the
/// original implementation's `maxBatchSize`. Unlike the original, this
/// applies uniformly to `postBatch`, `followByActorBatch`, and `likeBatch` —
/// see DESIGN.md for why `likeBatch` isn't left to flush only at archive end.
pub const BATCH_FLUSH_THRESHOLD: usize = 1000;

/// A flush failure mid-iteration aborts the walk; this carries that signal
/// out through the `for_each` visitor's `Result` without being confused for
/// a failure of the walk itself (archive decode / MST traversal errors),
/// which map to a different outcome (`FailedForEach` vs `FailedBatch`).
struct BatchFlushFailed(anyhow::Error);

impl std::fmt::Debug for BatchFlushFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch flush failed: {:?}", self.0)
    }
}
impl std::fmt::Display for BatchFlushFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch flush failed: {}", self.0)
    }
}
impl std::error::Error for BatchFlushFailed {}

/// Processes one archive end to end: resolves the actor's display name,
/// walks every record, maps and batches the ones this crate writes
/// anywhere, and flushes whatever remains once the walk completes.
///
/// `text_len` accumulates the UTF-8 byte length of every post `content`
/// this call binds, for the final shutdown summary (spec.md §7); it is kept
/// separate from the `netsync_text_len_total` metrics counter so the
/// lifecycle can read an exact total without parsing the exporter's text
/// format.
pub fn process_archive(
    sink: &dyn RowSink,
    archive: &dyn RepoArchive,
    did: &str,
    text_len: &AtomicU64,
) -> Outcome {
    let display_name = resolve_display_name(archive, did);

    let mut posts: PartitionBatch<PostRow> = PartitionBatch::new(BATCH_FLUSH_THRESHOLD);
    let mut follows: PartitionBatch<FollowByActorRow> = PartitionBatch::new(BATCH_FLUSH_THRESHOLD);
    let mut likes: PartitionBatch<LikeRow> = PartitionBatch::new(BATCH_FLUSH_THRESHOLD);

    let foreach_result = archive.for_each("", &mut |path, _cid| {
        let Some((_, record)) = archive.get_record(path)? else {
            return Ok(());
        };

        match record {
            Record::FeedPost(post) => {
                let Some(created_at) = parse_created_at(&post.created_at) else {
                    warn!(%did, %path, "skipping post with unparseable createdAt");
                    return Ok(());
                };
                let content_len = post.text.len() as u64;
                counter!("netsync_text_len_total").increment(content_len);
                text_len.fetch_add(content_len, Ordering::Relaxed);
                let rkey = rkey_of(path);
                if posts.push(PostRow {
                    did: did.to_string(),
                    display_name: display_name.clone(),
                    rkey,
                    content: post.text,
                    facets: facets_to_string(&post.facets),
                    created_at,
                }) {
                    sink.insert_post_batch(posts.take())
                        .map_err(|e| anyhow::Error::new(BatchFlushFailed(e)))?;
                }
            },
            Record::FeedLike(like) => {
                let Some(created_at) = parse_created_at(&like.created_at) else {
                    warn!(%did, %path, "skipping like with unparseable createdAt");
                    return Ok(());
                };
                let rkey = rkey_of(path);
                if likes.push(LikeRow {
                    did: did.to_string(),
                    rkey,
                    subject: like.subject.clone(),
                    created_at,
                }) {
                    sink.insert_like_batch(likes.take())
                        .map_err(|e| anyhow::Error::new(BatchFlushFailed(e)))?;
                }

                match parse_at_uri(&like.subject) {
                    Some(parts) => {
                        if let Err(e) = sink.increment_like_count(LikeCountDelta {
                            did: parts.did.to_string(),
                            nsid: parts.nsid.to_string(),
                            rkey: parts.rkey.to_string(),
                        }) {
                            warn!(%did, %path, error = ?e, "skipping like count update after execution failure");
                        }
                    },
                    None => {
                        warn!(%did, subject = %like.subject, "skipping like count update for malformed subject uri");
                    },
                }
            },
            Record::GraphFollow(follow) => {
                let Some(created_at) = parse_created_at(&follow.created_at) else {
                    warn!(%did, %path, "skipping follow with unparseable createdAt");
                    return Ok(());
                };
                if follows.push(FollowByActorRow {
                    actor: did.to_string(),
                    target: follow.subject.clone(),
                    created_at,
                }) {
                    sink.insert_follow_by_actor_batch(follows.take())
                        .map_err(|e| anyhow::Error::new(BatchFlushFailed(e)))?;
                }

                if let Err(e) = sink.insert_follow_by_target(FollowByTargetRow {
                    target: follow.subject,
                    actor: did.to_string(),
                    created_at,
                }) {
                    warn!(%did, %path, error = ?e, "skipping follow-by-target mirror write after execution failure");
                }
            },
            Record::GraphBlock => {
                debug!(%did, %path, "block record observed, not persisted");
            },
            Record::FeedRepost => {
                debug!(%did, %path, "repost record observed, not persisted");
            },
            Record::ActorProfile(_) => {
                debug!(%did, %path, "profile record observed during walk, already resolved");
            },
        }

        Ok(())
    });

    if let Err(e) = foreach_result {
        if e.downcast_ref::<BatchFlushFailed>().is_some() {
            warn!(%did, error = ?e, "batch flush failed mid-archive");
            return Outcome::FailedBatch;
        }
        warn!(%did, error = ?e, "archive walk failed");
        return Outcome::FailedForEach;
    }

    if flush_remaining(sink, &mut posts, &mut follows, &mut likes).is_err() {
        return Outcome::FailedBatch;
    }

    Outcome::Finished
}

fn flush_remaining(
    sink: &dyn RowSink,
    posts: &mut PartitionBatch<PostRow>,
    follows: &mut PartitionBatch<FollowByActorRow>,
    likes: &mut PartitionBatch<LikeRow>,
) -> anyhow::Result<()> {
    if !posts.is_empty() {
        sink.insert_post_batch(posts.take())?;
    }
    if !follows.is_empty() {
        sink.insert_follow_by_actor_batch(follows.take())?;
    }
    if !likes.is_empty() {
        sink.insert_like_batch(likes.take())?;
    }
    Ok(())
}

fn resolve_display_name(archive: &dyn RepoArchive, did: &str) -> String {
    match archive.get_record("app.bsky.actor.profile/self") {
        Ok(Some((_, Record::ActorProfile(profile)))) => profile
            .display_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string()),
        Ok(_) => UNKNOWN_DISPLAY_NAME.to_string(),
        Err(e) => {
            warn!(%did, error = ?e, "failed to read profile record, defaulting display name");
            UNKNOWN_DISPLAY_NAME.to_string()
        },
    }
}

/// The record key is the final path segment (`collection/rkey`).
fn rkey_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fake::FakeRepoArchive;
    use crate::record::{ActorProfile, FeedLike, FeedPost, GraphFollow};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        post_batches: Mutex<Vec<Vec<PostRow>>>,
        follow_batches: Mutex<Vec<Vec<FollowByActorRow>>>,
        like_batches: Mutex<Vec<Vec<LikeRow>>>,
        follow_by_target: Mutex<Vec<FollowByTargetRow>>,
        like_count_deltas: Mutex<Vec<LikeCountDelta>>,
        fail_post_batch: bool,
    }

    impl RowSink for RecordingSink {
        fn insert_post_batch(&self, rows: Vec<PostRow>) -> anyhow::Result<()> {
            if self.fail_post_batch {
                anyhow::bail!("simulated batch execute failure");
            }
            self.post_batches.lock().unwrap().push(rows);
            Ok(())
        }

        fn insert_follow_by_actor_batch(&self, rows: Vec<FollowByActorRow>) -> anyhow::Result<()> {
            self.follow_batches.lock().unwrap().push(rows);
            Ok(())
        }

        fn insert_follow_by_target(&self, row: FollowByTargetRow) -> anyhow::Result<()> {
            self.follow_by_target.lock().unwrap().push(row);
            Ok(())
        }

        fn insert_like_batch(&self, rows: Vec<LikeRow>) -> anyhow::Result<()> {
            self.like_batches.lock().unwrap().push(rows);
            Ok(())
        }

        fn increment_like_count(&self, delta: LikeCountDelta) -> anyhow::Result<()> {
            self.like_count_deltas.lock().unwrap().push(delta);
            Ok(())
        }
    }

    fn post(text: &str) -> Record {
        Record::FeedPost(FeedPost {
            text: text.to_string(),
            created_at: "2024-01-15T10:30:00Z".to_string(),
            facets: None,
        })
    }

    fn run(sink: &RecordingSink, archive: &FakeRepoArchive, did: &str) -> Outcome {
        let text_len = AtomicU64::new(0);
        process_archive(sink, archive, did, &text_len)
    }

    #[test]
    fn resolves_display_name_from_profile() {
        let archive = FakeRepoArchive::new().with_record(
            "app.bsky.actor.profile/self",
            Record::ActorProfile(ActorProfile { display_name: Some("Alice".to_string()) }),
        );
        let sink = RecordingSink::default();
        let outcome = run(&sink, &archive, "did:plc:alice");
        assert_eq!(outcome, Outcome::Finished);
    }

    #[test]
    fn defaults_display_name_when_no_profile() {
        let archive = FakeRepoArchive::new().with_record("app.bsky.feed.post/a", post("hi"));
        let sink = RecordingSink::default();
        run(&sink, &archive, "did:plc:nobody");
        let batches = sink.post_batches.lock().unwrap();
        assert_eq!(batches[0][0].display_name, UNKNOWN_DISPLAY_NAME);
    }

    #[test]
    fn flushes_posts_at_threshold_and_at_end() {
        let mut archive = FakeRepoArchive::new();
        for i in 0..BATCH_FLUSH_THRESHOLD + 5 {
            archive = archive.with_record(format!("app.bsky.feed.post/{i:04}"), post("x"));
        }
        let sink = RecordingSink::default();
        let outcome = run(&sink, &archive, "did:plc:many");
        assert_eq!(outcome, Outcome::Finished);
        let batches = sink.post_batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), BATCH_FLUSH_THRESHOLD);
        assert_eq!(batches[1].len(), 5);
    }

    #[test]
    fn skips_post_with_unparseable_timestamp() {
        let archive = FakeRepoArchive::new().with_record(
            "app.bsky.feed.post/a",
            Record::FeedPost(FeedPost {
                text: "hi".to_string(),
                created_at: "garbage".to_string(),
                facets: None,
            }),
        );
        let sink = RecordingSink::default();
        run(&sink, &archive, "did:plc:bad");
        assert!(sink.post_batches.lock().unwrap().is_empty());
    }

    #[test]
    fn like_writes_batch_row_and_counter_delta() {
        let archive = FakeRepoArchive::new().with_record(
            "app.bsky.feed.like/a",
            Record::FeedLike(FeedLike {
                subject: "at://did:plc:author/app.bsky.feed.post/xyz".to_string(),
                created_at: "2024-01-15T10:30:00Z".to_string(),
            }),
        );
        let sink = RecordingSink::default();
        run(&sink, &archive, "did:plc:liker");
        assert_eq!(sink.like_batches.lock().unwrap()[0].len(), 1);
        let deltas = sink.like_count_deltas.lock().unwrap();
        assert_eq!(deltas[0].did, "did:plc:author");
        assert_eq!(deltas[0].nsid, "app.bsky.feed.post");
        assert_eq!(deltas[0].rkey, "xyz");
    }

    #[test]
    fn like_with_malformed_subject_skips_counter_update_only() {
        let archive = FakeRepoArchive::new().with_record(
            "app.bsky.feed.like/a",
            Record::FeedLike(FeedLike {
                subject: "not-a-uri".to_string(),
                created_at: "2024-01-15T10:30:00Z".to_string(),
            }),
        );
        let sink = RecordingSink::default();
        run(&sink, &archive, "did:plc:liker");
        assert_eq!(sink.like_batches.lock().unwrap()[0].len(), 1);
        assert!(sink.like_count_deltas.lock().unwrap().is_empty());
    }

    #[test]
    fn follow_writes_batched_actor_row_and_unbatched_target_row() {
        let archive = FakeRepoArchive::new().with_record(
            "app.bsky.graph.follow/a",
            Record::GraphFollow(GraphFollow {
                subject: "did:plc:target".to_string(),
                created_at: "2024-01-15T10:30:00Z".to_string(),
            }),
        );
        let sink = RecordingSink::default();
        run(&sink, &archive, "did:plc:follower");
        assert_eq!(sink.follow_batches.lock().unwrap()[0].len(), 1);
        assert_eq!(sink.follow_by_target.lock().unwrap().len(), 1);
    }

    #[test]
    fn blocks_and_reposts_are_not_persisted() {
        let archive = FakeRepoArchive::new()
            .with_record("app.bsky.graph.block/a", Record::GraphBlock)
            .with_record("app.bsky.feed.repost/a", Record::FeedRepost);
        let sink = RecordingSink::default();
        let outcome = run(&sink, &archive, "did:plc:silent");
        assert_eq!(outcome, Outcome::Finished);
        assert!(sink.follow_batches.lock().unwrap().is_empty());
        assert!(sink.post_batches.lock().unwrap().is_empty());
    }

    #[test]
    fn text_len_accumulates_bound_post_content() {
        let archive = FakeRepoArchive::new()
            .with_record("app.bsky.feed.post/a", post("hi"))
            .with_record("app.bsky.feed.post/b", post("there"));
        let sink = RecordingSink::default();
        let text_len = AtomicU64::new(0);
        process_archive(&sink, &archive, "did:plc:counter", &text_len);
        assert_eq!(text_len.load(Ordering::Relaxed), 2 + 5);
    }

    #[test]
    fn mid_stream_batch_flush_failure_aborts_with_failed_batch_outcome() {
        let mut archive = FakeRepoArchive::new();
        for i in 0..BATCH_FLUSH_THRESHOLD + 1 {
            archive = archive.with_record(format!("app.bsky.feed.post/{i:04}"), post("x"));
        }
        let sink = RecordingSink { fail_post_batch: true, ..Default::default() };
        let outcome = run(&sink, &archive, "did:plc:flaky");
        assert_eq!(outcome, Outcome::FailedBatch);
        assert!(sink.post_batches.lock().unwrap().is_empty());
    }
}
