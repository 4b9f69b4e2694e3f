//! Adapter around the external AT Protocol repository (CAR) reader.
//!
//! `RepoArchive` is the only thing the processor (C3) depends on — it never
//! touches `atrium_repo` types directly. This keeps the core ingestion
//! algorithm testable against an in-memory fake and insulated from the
//! decoder crate's concrete API.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use atrium_repo::Repository;
use cid::Cid;

use crate::record::Record;

/// A single repository archive, opened and ready for traversal.
pub trait RepoArchive {
    /// Fetch one record by its collection-relative path (e.g.
    /// `app.bsky.actor.profile/self`), if present.
    fn get_record(&self, path: &str) -> Result<Option<(Cid, Record)>>;

    /// Visit every record under `prefix` (empty string for the whole
    /// repository), in the archive's natural (MST) order. Stops and
    /// propagates the first error returned by `visit` or encountered while
    /// walking the archive itself.
    fn for_each(&self, prefix: &str, visit: &mut dyn FnMut(&str, Cid) -> Result<()>) -> Result<()>;
}

/// Opens a single repository archive from its CAR file and decodes records
/// lazily as `for_each`/`get_record` are called.
pub struct CarRepoArchive {
    repo: Repository,
}

impl CarRepoArchive {
    /// Opens the archive for `did` under `out_dir/<did>`, matching the
    /// on-disk layout described in the external interfaces section.
    pub fn open(out_dir: &Path, did: &str) -> Result<Self> {
        let path = out_dir.join(did);
        let repo = Repository::open(&path)
            .with_context(|| format!("opening repository archive at {}", path.display()))?;
        Ok(Self { repo })
    }
}

impl RepoArchive for CarRepoArchive {
    fn get_record(&self, path: &str) -> Result<Option<(Cid, Record)>> {
        match self.repo.get_record_raw(path) {
            Ok(Some((cid, bytes))) => {
                let record = decode_record(&bytes)
                    .with_context(|| format!("decoding record at {path}"))?;
                Ok(record.map(|r| (cid, r)))
            },
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn for_each(&self, prefix: &str, visit: &mut dyn FnMut(&str, Cid) -> Result<()>) -> Result<()> {
        self.repo.walk(prefix, |path, cid| visit(path, cid))
    }
}

/// Decodes a raw record block into this crate's closed [`Record`] enum,
/// dropping anything whose `$type` isn't one of the six this crate writes
/// somewhere. Returns `Ok(None)` for an unrecognised type rather than an
/// error — a record the pipeline doesn't model is not a failure.
fn decode_record(bytes: &[u8]) -> Result<Option<Record>> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).context("parsing record as JSON")?;
    let kind = value.get("$type").and_then(|v| v.as_str()).unwrap_or("");

    let record = match kind {
        "app.bsky.feed.post" => {
            let rec: crate::record::FeedPost = serde_json::from_value(value)?;
            Some(Record::FeedPost(rec))
        },
        "app.bsky.feed.like" => {
            let rec: crate::record::FeedLike = serde_json::from_value(value)?;
            Some(Record::FeedLike(rec))
        },
        "app.bsky.feed.repost" => Some(Record::FeedRepost),
        "app.bsky.graph.follow" => {
            let rec: crate::record::GraphFollow = serde_json::from_value(value)?;
            Some(Record::GraphFollow(rec))
        },
        "app.bsky.graph.block" => Some(Record::GraphBlock),
        "app.bsky.actor.profile" => {
            let rec: crate::record::ActorProfile = serde_json::from_value(value)?;
            Some(Record::ActorProfile(rec))
        },
        _ => None,
    };

    Ok(record)
}

/// In-memory `RepoArchive` used by C3/C4 tests. Holds records in insertion
/// order, addressed by a synthetic path. Only compiled for tests — the CAR
/// format itself is out of scope and this fake never needs to appear in a
/// release build.
#[cfg(test)]
pub mod fake {
    use super::*;

    #[derive(Default)]
    pub struct FakeRepoArchive {
        records: BTreeMap<String, Record>,
    }

    impl FakeRepoArchive {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_record(mut self, path: impl Into<String>, record: Record) -> Self {
            self.records.insert(path.into(), record);
            self
        }
    }

    impl RepoArchive for FakeRepoArchive {
        fn get_record(&self, path: &str) -> Result<Option<(Cid, Record)>> {
            Ok(self.records.get(path).cloned().map(|r| (fake_cid(path), r)))
        }

        fn for_each(
            &self,
            prefix: &str,
            visit: &mut dyn FnMut(&str, Cid) -> Result<()>,
        ) -> Result<()> {
            for (path, _) in self.records.iter().filter(|(p, _)| p.starts_with(prefix)) {
                visit(path, fake_cid(path))?;
            }
            Ok(())
        }
    }

    fn fake_cid(seed: &str) -> Cid {
        use cid::multihash::Multihash;
        let mut digest = [0u8; 32];
        for (i, b) in seed.bytes().enumerate().take(32) {
            digest[i] = b;
        }
        let mh = match Multihash::wrap(0x12, &digest) {
            Ok(mh) => mh,
            Err(_) => unreachable!("32-byte digest always fits a sha2-256 multihash"),
        };
        Cid::new_v1(0x71, mh)
    }
}
