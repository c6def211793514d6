use std::time::Duration;

use db::DBService;
use db::models::artifact::{Artifact, ArtifactStatus};
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
enum JanitorError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Periodically revives artifacts stuck in `processing` (§5, §9: a worker
/// crash mid-analysis otherwise leaves the row permanently unreanalyzable,
/// since only `completed`/`failed` are reanalyzable states). Revival forces
/// the row back to `failed` with a synthetic reason, which makes it eligible
/// for a fresh `Analyze` trigger.
pub struct JanitorService {
    db: DBService,
    poll_interval: Duration,
    stuck_after: chrono::Duration,
}

impl JanitorService {
    pub fn spawn(db: DBService, poll_interval: Duration, stuck_after: chrono::Duration) -> tokio::task::JoinHandle<()> {
        let service = JanitorService { db, poll_interval, stuck_after };
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(target: "context_graph::janitor", interval = ?self.poll_interval, "starting stuck-artifact janitor");
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.revive_stuck().await {
                error!(target: "context_graph::janitor", error = %e, "janitor sweep failed");
            }
        }
    }

    async fn revive_stuck(&self) -> Result<(), JanitorError> {
        let stuck = Artifact::find_stuck_processing(&self.db.pool, self.stuck_after).await?;

        if stuck.is_empty() {
            debug!(target: "context_graph::janitor", "no stuck artifacts found");
            return Ok(());
        }

        info!(target: "context_graph::janitor", count = stuck.len(), "reviving stuck artifacts");

        for artifact in stuck {
            let result = Artifact::force_status(
                &self.db.pool,
                artifact.id,
                ArtifactStatus::Failed,
                Some("revived from stuck processing state by janitor"),
            )
            .await;

            match result {
                Ok(_) => {
                    warn!(target: "context_graph::janitor", artifact_id = %artifact.id, "artifact revived to failed, eligible for re-analysis");
                }
                Err(e) => {
                    error!(target: "context_graph::janitor", artifact_id = %artifact.id, error = %e, "failed to revive stuck artifact");
                }
            }
        }

        Ok(())
    }
}
