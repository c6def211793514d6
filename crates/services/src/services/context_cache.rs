use std::time::Duration;

use chrono::Utc;
use db::DBService;
use db::models::context_cache_entry::{ContextCacheEntry, NewContextCacheEntry};
use moka::future::Cache;
use uuid::Uuid;

use crate::config::PipelineConfig;

#[derive(Debug, Clone)]
pub struct CachedPacket {
    pub packet_json: serde_json::Value,
    pub token_count: i32,
    pub included_artifact_ids: Vec<Uuid>,
}

impl From<ContextCacheEntry> for CachedPacket {
    fn from(row: ContextCacheEntry) -> Self {
        CachedPacket {
            packet_json: row.packet_json,
            token_count: row.token_count,
            included_artifact_ids: row.included_artifact_ids,
        }
    }
}

/// Two-tier context cache (§4.B): a fast in-process `moka` tier fronting a
/// durable Postgres tier. The fast tier's own TTL bounds staleness between
/// durable writes; the durable row's `expires_at` is the source of truth for
/// "is this entry still live" and is re-checked on every durable read.
#[derive(Clone)]
pub struct ContextCache {
    db: DBService,
    fast: Cache<Uuid, CachedPacket>,
    durable_ttl: Duration,
}

impl ContextCache {
    pub fn new(db: DBService, config: &PipelineConfig) -> Self {
        let fast = Cache::builder().time_to_live(config.fast_cache_ttl).build();
        ContextCache {
            db,
            fast,
            durable_ttl: config.durable_cache_ttl,
        }
    }

    /// `Get` (§4.B): fast tier first; on hit the durable tier is not touched.
    /// On fast miss, consult the durable tier; a live durable hit
    /// write-throughs into the fast tier.
    pub async fn get(&self, artifact_id: Uuid) -> Option<CachedPacket> {
        if let Some(hit) = self.fast.get(&artifact_id).await {
            return Some(hit);
        }
        match ContextCacheEntry::find_live(&self.db.pool, artifact_id).await {
            Ok(Some(row)) => {
                let packet: CachedPacket = row.into();
                self.fast.insert(artifact_id, packet.clone()).await;
                Some(packet)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(target: "context_graph::cache", error = %e, "durable cache read failed, treating as miss");
                None
            }
        }
    }

    /// `Put` (§4.B): writes both tiers from the writer's view. A durable
    /// write failure is logged and swallowed — the cache is best-effort and
    /// must never fail the pipeline (§4.G step 7, §7 "cache-write failure").
    pub async fn put(
        &self,
        program_id: Uuid,
        artifact_id: Uuid,
        content_hash: &str,
        packet_json: serde_json::Value,
        included_artifact_ids: Vec<Uuid>,
        token_count: i32,
    ) {
        let packet = CachedPacket {
            packet_json: packet_json.clone(),
            token_count,
            included_artifact_ids: included_artifact_ids.clone(),
        };
        self.fast.insert(artifact_id, packet).await;

        let expires_at = Utc::now() + chrono::Duration::from_std(self.durable_ttl).unwrap_or(chrono::Duration::hours(24));
        let result = ContextCacheEntry::upsert(
            &self.db.pool,
            artifact_id,
            NewContextCacheEntry {
                program_id,
                content_hash: content_hash.to_string(),
                packet_json,
                token_count,
                included_artifact_ids,
                cache_version: 1,
                expires_at,
            },
        )
        .await;

        if let Err(e) = result {
            tracing::warn!(target: "context_graph::cache", error = %e, %artifact_id, "durable cache write failed, fast tier still populated");
        }
    }

    pub async fn invalidate(&self, artifact_id: Uuid) {
        self.fast.invalidate(&artifact_id).await;
        if let Err(e) = ContextCacheEntry::invalidate(&self.db.pool, artifact_id).await {
            tracing::warn!(target: "context_graph::cache", error = %e, %artifact_id, "durable cache invalidate failed");
        }
    }

    /// Invalidates every cache entry whose `included_ids` referenced
    /// `artifact_id`, in addition to the artifact's own entry (§4.B, S6).
    pub async fn invalidate_cascade(&self, program_id: Uuid, artifact_id: Uuid) {
        self.invalidate(artifact_id).await;
        match ContextCacheEntry::find_referencing(&self.db.pool, program_id, artifact_id).await {
            Ok(rows) => {
                let ids: Vec<Uuid> = rows.iter().map(|r| r.artifact_id).collect();
                for id in &ids {
                    self.fast.invalidate(id).await;
                }
                if let Err(e) = ContextCacheEntry::invalidate_many(&self.db.pool, &ids).await {
                    tracing::warn!(target: "context_graph::cache", error = %e, "cascade invalidate failed");
                }
            }
            Err(e) => {
                tracing::warn!(target: "context_graph::cache", error = %e, "failed to find referencing cache entries for cascade invalidate");
            }
        }
    }

    /// `InvalidateProgram(programID)` (§4.B): drops every cache entry
    /// belonging to the program from both tiers, without requiring the
    /// caller to already know which artifacts have entries.
    pub async fn invalidate_program(&self, program_id: Uuid) {
        match ContextCacheEntry::find_by_program(&self.db.pool, program_id).await {
            Ok(rows) => {
                for row in &rows {
                    self.fast.invalidate(&row.artifact_id).await;
                }
            }
            Err(e) => {
                tracing::warn!(target: "context_graph::cache", error = %e, %program_id, "failed to list program cache entries, fast tier may retain stale entries");
            }
        }
        if let Err(e) = ContextCacheEntry::invalidate_by_program(&self.db.pool, program_id).await {
            tracing::warn!(target: "context_graph::cache", error = %e, %program_id, "program-wide durable cache invalidate failed");
        }
    }
}
