use crate::{
    models::{ApiError, ResolveRequest, ResolveResponse},
    resolve::Resolver,
    scrape::Scraper,
    security::AuthContext,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Background product resolution. Scrapes can take tens of seconds while a
/// marketplace is throttling, so callers may poll instead of waiting.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    request: ResolveRequest,
    context: AuthContext,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: ResolveResponse },
    Failed { error: String, stage: Option<String> },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(resolver: Resolver<Scraper>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobState::Running);
                }

                let result = resolver.resolve(job.request).await;
                let mut guard = statuses_bg.lock().await;
                match result {
                    Ok(resp) => {
                        info!(target = "marketbot.jobs", job_id = %job.id, client = %job.context.client_id, "job_completed");
                        guard.insert(job.id, JobState::Completed { result: resp });
                    }
                    Err(err) => {
                        warn!(target = "marketbot.jobs", job_id = %job.id, stage = err.stage(), error = err.detail(), "job_failed");
                        guard.insert(
                            job.id,
                            JobState::Failed {
                                error: err.detail().to_string(),
                                stage: Some(err.stage().to_string()),
                            },
                        );
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_resolve(
        &self,
        request: ResolveRequest,
        context: AuthContext,
    ) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job {
            id,
            request,
            context,
        };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::store::Store;
    use std::time::Duration;

    fn context() -> AuthContext {
        AuthContext {
            client_id: "relay".into(),
            api_key_id: "key-01".into(),
        }
    }

    async fn wait_for_terminal(queue: &JobQueue, id: Uuid) -> JobState {
        for _ in 0..100 {
            if let Some(info) = queue.get(id).await
                && matches!(info.state, JobState::Completed { .. } | JobState::Failed { .. })
            {
                return info.state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn failed_resolution_records_stage() {
        let store = Store::in_memory().await.expect("store");
        let resolver = Resolver::new(Scraper::new(ScraperConfig::default()), store);
        let (queue, _worker) = JobQueue::spawn(resolver);

        let id = queue
            .enqueue_resolve(
                ResolveRequest {
                    url: "https://www.ozon.ru/product/1/".into(),
                    persist: false,
                },
                context(),
            )
            .await
            .expect("enqueue");
        match wait_for_terminal(&queue, id).await {
            JobState::Failed { stage, .. } => assert_eq!(stage.as_deref(), Some("fetch_product")),
            _ => panic!("expected failure"),
        }
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn job_info_serializes_flat() {
        let info = JobInfo {
            id: "abc".into(),
            state: JobState::Failed {
                error: "boom".into(),
                stage: Some("classify".into()),
            },
        };
        let json = serde_json::to_value(info).expect("json");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["stage"], "classify");
        assert_eq!(json["id"], "abc");
    }
}
