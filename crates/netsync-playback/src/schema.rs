//! Schema bootstrap (C1): idempotent keyspace and table creation.

use anyhow::{Context, Result};
use scylla::Session;
use tracing::info;

const CREATE_KEYSPACE: &str = "CREATE KEYSPACE IF NOT EXISTS netsync \
    WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 3}";

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS netsync.posts ( \
        did text, \
        display_name text STATIC, \
        rkey text, \
        content text, \
        facets text, \
        created_at timestamp, \
        PRIMARY KEY (did, rkey) \
    )",
    "CREATE TABLE IF NOT EXISTS netsync.follows_by_actor ( \
        actor text, \
        target text, \
        created_at timestamp, \
        PRIMARY KEY (actor, target) \
    )",
    "CREATE TABLE IF NOT EXISTS netsync.follows_by_target ( \
        target text, \
        actor text, \
        created_at timestamp, \
        PRIMARY KEY (target, actor) \
    )",
    "CREATE TABLE IF NOT EXISTS netsync.blocks_by_actor ( \
        actor text, \
        target text, \
        created_at timestamp, \
        PRIMARY KEY (actor, target) \
    )",
    "CREATE TABLE IF NOT EXISTS netsync.blocks_by_target ( \
        target text, \
        actor text, \
        created_at timestamp, \
        PRIMARY KEY (target, actor) \
    )",
    "CREATE TABLE IF NOT EXISTS netsync.likes ( \
        did text, \
        rkey text, \
        subject text, \
        created_at timestamp, \
        PRIMARY KEY (did, rkey) \
    )",
    "CREATE TABLE IF NOT EXISTS netsync.like_counts ( \
        did text, \
        nsid text, \
        rkey text, \
        count counter, \
        PRIMARY KEY ((did, nsid), rkey) \
    )",
];

/// Creates the keyspace and all six tables if they don't already exist.
/// Any failure here is setup-fatal — the caller aborts startup rather than
/// running against a partially-provisioned keyspace.
pub async fn bootstrap(session: &Session) -> Result<()> {
    session
        .query(CREATE_KEYSPACE, &[])
        .await
        .context("creating netsync keyspace")?;
    info!("netsync keyspace ready");

    for stmt in CREATE_TABLES {
        session
            .query(*stmt, &[])
            .await
            .with_context(|| format!("executing: {stmt}"))?;
    }
    info!(tables = CREATE_TABLES.len(), "schema bootstrap complete");

    Ok(())
}
