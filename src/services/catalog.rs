use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::kernel::catalog::Catalog;
use crate::kernel::matcher::{PatternTemplate, TemplateError};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("pattern catalog unavailable: {0}")]
    Unavailable(String),
    #[error("pattern catalog fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    InvalidTemplate(#[from] TemplateError),
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        CatalogError::Unavailable(e.to_string())
    }
}

/// External template store.
#[async_trait]
pub trait PatternSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<PatternTemplate>, CatalogError>;

    fn describe(&self) -> String;
}

/// Templates fixed at startup, usually from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticPatternSource {
    templates: Vec<PatternTemplate>,
}

impl StaticPatternSource {
    pub fn new(templates: Vec<PatternTemplate>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl PatternSource for StaticPatternSource {
    async fn fetch(&self) -> Result<Vec<PatternTemplate>, CatalogError> {
        Ok(self.templates.clone())
    }

    fn describe(&self) -> String {
        format!("static({} templates)", self.templates.len())
    }
}

/// GET `url` returning a JSON array of templates.
#[derive(Clone)]
pub struct HttpPatternSource {
    client: Client,
    url: String,
}

impl HttpPatternSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PatternSource for HttpPatternSource {
    async fn fetch(&self) -> Result<Vec<PatternTemplate>, CatalogError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::Unavailable(format!("catalog server returned {}", response.status())));
        }
        Ok(response.json().await?)
    }

    fn describe(&self) -> String {
        format!("http({})", self.url)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub refreshes: u64,
    pub failures: u64,
    pub rejected_templates: u64,
}

/// Process-wide holder of the current catalog snapshot.
///
/// Readers get an `Arc<Catalog>` and never block a refresh. A failed refresh
/// keeps the last good snapshot, flagged stale.
pub struct CatalogStore {
    source: Arc<dyn PatternSource>,
    fetch_timeout: Duration,
    tx: watch::Sender<Arc<Catalog>>,
    refreshes: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
}

impl CatalogStore {
    pub fn new(source: Arc<dyn PatternSource>, fetch_timeout: Duration) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Catalog::empty()));
        Self {
            source,
            fetch_timeout,
            tx,
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Store seeded from a fixed template list, refreshed once.
    pub async fn with_templates(templates: Vec<PatternTemplate>) -> Arc<Self> {
        let store = Arc::new(Self::new(
            Arc::new(StaticPatternSource::new(templates)),
            Duration::from_secs(1),
        ));
        // A static source cannot fail.
        let _ = store.refresh().await;
        store
    }

    pub fn current(&self) -> Arc<Catalog> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Catalog>> {
        self.tx.subscribe()
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejected_templates: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Fetch with a bounded wait. On any failure the previous snapshot stays
    /// in place (marked stale) and the error is returned for reporting.
    pub async fn refresh(&self) -> Result<Arc<Catalog>, CatalogError> {
        let outcome = match tokio::time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(CatalogError::Timeout(self.fetch_timeout)),
        };

        match outcome {
            Ok(raw) => {
                let version = self.current().version + 1;
                let (catalog, rejected) = Catalog::build(version, raw);
                for e in &rejected {
                    tracing::warn!("Catalog: dropping template: {}", e);
                }
                self.rejected.fetch_add(rejected.len() as u64, Ordering::Relaxed);
                self.refreshes.fetch_add(1, Ordering::Relaxed);

                let catalog = Arc::new(catalog);
                self.tx.send_replace(catalog.clone());
                tracing::info!(
                    "Catalog: v{} loaded from {} ({} templates)",
                    version,
                    self.source.describe(),
                    catalog.len()
                );
                Ok(catalog)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let last = self.current();
                tracing::warn!(
                    "Catalog: refresh from {} failed ({}); keeping v{}",
                    self.source.describe(),
                    e,
                    last.version
                );
                if !last.stale {
                    self.tx.send_replace(Arc::new(last.marked_stale()));
                }
                Err(e)
            }
        }
    }

    /// Polls the source every `interval` until `cancel` fires.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Failures are logged and counted inside refresh.
                        let _ = self.refresh().await;
                    }
                }
            }
            tracing::debug!("Catalog: refresh loop stopped");
        })
    }
}
