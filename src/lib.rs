pub mod batch;
pub mod clustering;
pub mod error;
pub mod fusion;
pub mod heuristics;
pub mod io;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod stages;
pub mod store;

pub use batch::{BatchCoordinator, BatchOutcome, BatchReport};
pub use clustering::{ClusterConfig, Clusterer};
pub use error::{ModelError, PipelineError, StoreError};
pub use fusion::{FusionConfig, FusionEngine};
pub use heuristics::{NoiseFilter, NoiseFilterConfig};
pub use io::{discover_sources, export, load_document, read_textbook, ExportFormat};
pub use llm::{HttpModelClient, LanguageModel, ModelConfig, OfflineModel, RetryPolicy};
pub use models::{CourseStructure, Document, KnowledgePoint, MergedKnowledge, Textbook};
pub use pipeline::{CourseBuild, Pipeline, PipelineConfig};
pub use stages::{DocumentOutcome, DocumentRunner, RunnerConfig};
pub use store::{JsonFileStore, MemoryStore, ProgressStore};
