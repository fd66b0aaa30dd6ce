//! End-to-end wiring: batch processing, clustering and fusion

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::batch::{BatchCoordinator, BatchOutcome};
use crate::clustering::{ClusterConfig, Clusterer};
use crate::error::PipelineError;
use crate::fusion::{FusionConfig, FusionEngine};
use crate::heuristics::{NoiseFilter, NoiseFilterConfig};
use crate::llm::{LanguageModel, RetryPolicy};
use crate::models::{CourseStructure, Document, KnowledgePoint, Textbook};
use crate::stages::{DocumentRunner, RunnerConfig};
use crate::store::ProgressStore;

/// Configuration of every pipeline component
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub noise: NoiseFilterConfig,
    pub runner: RunnerConfig,
    pub cluster: ClusterConfig,
    pub fusion: FusionConfig,
    /// Documents processed concurrently
    pub worker_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            noise: NoiseFilterConfig::default(),
            runner: RunnerConfig::default(),
            cluster: ClusterConfig::default(),
            fusion: FusionConfig::default(),
            worker_limit: 3,
        }
    }
}

impl PipelineConfig {
    /// Use one retry policy for every model call
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.runner.retry = retry.clone();
        self.cluster.retry = retry.clone();
        self.fusion.retry = retry;
        self
    }
}

/// Ordered structure and the fused textbook built from it
#[derive(Debug)]
pub struct CourseBuild {
    pub structure: CourseStructure,
    pub textbook: Textbook,
}

pub struct Pipeline {
    coordinator: BatchCoordinator,
    clusterer: Clusterer,
    fusion: FusionEngine,
    worker_limit: usize,
}

impl Pipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn ProgressStore>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let filter = NoiseFilter::new(config.noise)?;
        let runner = DocumentRunner::new(model.clone(), store, filter, config.runner);
        Ok(Self {
            coordinator: BatchCoordinator::new(Arc::new(runner)),
            clusterer: Clusterer::new(model.clone(), config.cluster),
            fusion: FusionEngine::new(model, config.fusion),
            worker_limit: config.worker_limit,
        })
    }

    pub async fn process(&self, documents: Vec<Document>, cancel: &CancellationToken) -> BatchOutcome {
        self.coordinator.run(documents, self.worker_limit, cancel).await
    }

    /// Cluster points into chapters, then fuse duplicates within each chapter
    pub async fn build_course(&self, points: &[KnowledgePoint]) -> CourseBuild {
        let structure = self.clusterer.cluster(points).await;
        let textbook = self.fusion.merge_course(&structure, points).await;
        info!(
            name = %textbook.name,
            chapters = textbook.chapters.len(),
            entries = textbook.entry_count(),
            "Textbook built"
        );
        CourseBuild { structure, textbook }
    }
}
