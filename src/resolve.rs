use crate::marketplace::{self, Marketplace};
use crate::models::{ResolveRequest, ResolveResponse, StageReport};
use crate::scrape::{ProductInfo, ProductSource, ScrapeError};
use crate::store::Store;
use serde_json::{Value, json};
use std::time::Instant;

/// Link → product resolution with a per-stage transcript, used by the
/// HTTP resolve endpoint and the background job queue.
#[derive(Clone)]
pub struct Resolver<S> {
    source: S,
    store: Store,
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

#[derive(Debug)]
pub struct ResolveError {
    stage: &'static str,
    message: String,
    kind: ResolveErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    InvalidInput,
    Upstream,
    Internal,
}

impl ResolveError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: ResolveErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: ResolveErrorKind::Internal,
        }
    }

    fn scrape(stage: &'static str, err: ScrapeError) -> Self {
        let kind = match err {
            ScrapeError::UnsupportedUrl
            | ScrapeError::Unsupported(_)
            | ScrapeError::MissingProductId => ResolveErrorKind::InvalidInput,
            _ => ResolveErrorKind::Upstream,
        };
        Self {
            stage,
            message: err.to_string(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> ResolveErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl<S: ProductSource> Resolver<S> {
    pub fn new(source: S, store: Store) -> Self {
        Self { source, store }
    }

    pub async fn resolve(&self, request: ResolveRequest) -> Result<ResolveResponse, ResolveError> {
        let mut stages = Vec::new();
        let text = request.url.trim().to_string();

        let (url, marketplace) = capture_stage("classify", &mut stages, async {
            let url = marketplace::extract_url(&text)
                .unwrap_or(&text)
                .to_string();
            let marketplace = marketplace::identify(&url)
                .filter(|_| marketplace::is_valid_marketplace_url(&url))
                .ok_or_else(|| {
                    ResolveError::invalid_input("classify", "not a supported marketplace link")
                })?;
            let output = json!({ "url": url, "marketplace": marketplace });
            Ok(StageOutcome {
                value: (url, marketplace),
                output,
            })
        })
        .await?;

        let product: ProductInfo = capture_stage("fetch_product", &mut stages, async {
            if marketplace == Marketplace::Ozon {
                return Err(ResolveError::scrape(
                    "fetch_product",
                    ScrapeError::Unsupported(Marketplace::Ozon),
                ));
            }
            let product = self
                .source
                .fetch_product(&url)
                .await
                .map_err(|err| ResolveError::scrape("fetch_product", err))?;
            if !product.price.is_positive() {
                return Err(ResolveError::scrape("fetch_product", ScrapeError::MissingPrice));
            }
            let output = json!({
                "title": product.title,
                "price": product.price,
                "sizes": product.available_sizes.len(),
                "has_image": product.image_url.is_some(),
            });
            Ok(StageOutcome {
                value: product,
                output,
            })
        })
        .await?;

        let product_id = if request.persist {
            let saved = capture_stage("persist_product", &mut stages, async {
                let saved = self
                    .store
                    .create_product(&product)
                    .await
                    .map_err(|err| ResolveError::internal("persist_product", err.to_string()))?;
                Ok(StageOutcome {
                    output: json!({ "product_id": saved.id }),
                    value: saved.id,
                })
            })
            .await?;
            Some(saved)
        } else {
            None
        };

        Ok(ResolveResponse {
            product,
            product_id,
            stages,
        })
    }
}

async fn capture_stage<T, Fut>(
    name: &'static str,
    stages: &mut Vec<StageReport>,
    fut: Fut,
) -> Result<T, ResolveError>
where
    Fut: Future<Output = Result<StageOutcome<T>, ResolveError>>,
{
    let started = Instant::now();
    let outcome = fut.await?;
    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::stage_elapsed(name, elapsed_ms);
    stages.push(StageReport::new(name, elapsed_ms, outcome.output));
    Ok(outcome.value)
}
