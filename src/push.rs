use futures::future::join_all;
use reqwest::StatusCode;
use serde::Serialize;
use sqlx::AnyPool;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PushConfig;
use crate::db::{self, DbKind, PushSubscriptionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome", content = "detail")]
pub enum PushOutcome {
    Delivered,
    /// Endpoint reported gone; the subscription row was pruned.
    Expired,
    Failed(String),
}

/// Maps an endpoint's HTTP response status to an outcome. 404/410 mean the
/// subscription is permanently dead and must be pruned.
pub fn classify_status(status: StatusCode) -> PushOutcome {
    if status.is_success() {
        PushOutcome::Delivered
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        PushOutcome::Expired
    } else {
        PushOutcome::Failed(format!("endpoint returned {status}"))
    }
}

/// Fans one payload out to every registered endpoint for the agent,
/// concurrently, and prunes expired subscriptions. Errors are collected
/// for observability; nothing here propagates to the caller's flow.
pub async fn notify(
    pool: &AnyPool,
    kind: DbKind,
    http: &reqwest::Client,
    cfg: &PushConfig,
    agent_id: &str,
    payload: &serde_json::Value,
) -> Vec<PushOutcome> {
    let subscriptions = match db::list_push_subscriptions(pool, kind, agent_id).await {
        Ok(subs) => subs,
        Err(err) => {
            warn!(agent = %agent_id, "push subscription load failed: {err:?}");
            return Vec::new();
        }
    };
    if subscriptions.is_empty() {
        return Vec::new();
    }

    let sends = subscriptions
        .iter()
        .map(|sub| send_one(http, cfg, sub, payload));
    let outcomes: Vec<PushOutcome> = join_all(sends).await;

    for (sub, outcome) in subscriptions.iter().zip(outcomes.iter()) {
        match outcome {
            PushOutcome::Delivered => {
                debug!(agent = %agent_id, endpoint = %sub.endpoint, "push delivered");
            }
            PushOutcome::Expired => {
                if let Err(err) = db::delete_push_subscription(pool, kind, &sub.id).await {
                    warn!(endpoint = %sub.endpoint, "expired subscription prune failed: {err:?}");
                }
            }
            PushOutcome::Failed(detail) => {
                warn!(agent = %agent_id, endpoint = %sub.endpoint, "push failed: {detail}");
            }
        }
    }

    outcomes
}

async fn send_one(
    http: &reqwest::Client,
    cfg: &PushConfig,
    sub: &PushSubscriptionRecord,
    payload: &serde_json::Value,
) -> PushOutcome {
    let result = http
        .post(&sub.endpoint)
        .header("TTL", cfg.ttl_seconds.to_string())
        .json(payload)
        .timeout(Duration::from_secs(cfg.request_timeout_seconds))
        .send()
        .await;
    match result {
        Ok(resp) => classify_status(resp.status()),
        Err(err) => PushOutcome::Failed(err.to_string()),
    }
}
