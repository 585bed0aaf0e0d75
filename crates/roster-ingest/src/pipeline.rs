//! Ingestion pipeline
//!
//! Runs the stages strictly in order:
//!
//! ```text
//! idle -> staged -> fetched -> extracted -> schema-ready
//!      -> loaded(individuals) -> loaded(organizations) -> done
//! ```
//!
//! The first failing stage moves the pipeline to `failed(stage)` and ends
//! the run. Nothing is retried or rolled back: staging artifacts stay on
//! disk and batches committed before the failure stay in the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{IngestError, LoadError, PipelineError, SchemaError, Stage};
use crate::extract::{extract_archive, ExtractedTree};
use crate::fetch::{FetchOutcome, ResourceFetcher};
use crate::loader::{LoadStats, RecordLoader};
use crate::records::RecordKind;
use crate::schema::SchemaManager;
use crate::store::Store;

/// Observable state of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Staged,
    Fetched,
    Extracted,
    SchemaReady,
    Loaded(RecordKind),
    Done,
    Failed(Stage),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Staged => write!(f, "staged"),
            PipelineState::Fetched => write!(f, "fetched"),
            PipelineState::Extracted => write!(f, "extracted"),
            PipelineState::SchemaReady => write!(f, "schema-ready"),
            PipelineState::Loaded(kind) => write!(f, "loaded({})", kind),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed(stage) => write!(f, "failed({})", stage),
        }
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub source_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub archive: FetchOutcome,
    pub extracted_entries: usize,
    pub loads: Vec<LoadStats>,
}

impl PipelineReport {
    pub fn rows_for(&self, kind: RecordKind) -> Option<u64> {
        self.loads.iter().find(|l| l.kind == kind).map(|l| l.rows)
    }

    pub fn summary(&self) -> String {
        let loads: Vec<String> = self
            .loads
            .iter()
            .map(|l| format!("{}={}", l.table, l.rows))
            .collect();
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;

        format!(
            "Run {}: fetched {} bytes, extracted {} entries, loaded {} in {:.1}s",
            self.run_id,
            self.archive.bytes,
            self.extracted_entries,
            loads.join(", "),
            elapsed
        )
    }
}

/// Sequential ingestion pipeline
pub struct IngestPipeline {
    config: PipelineConfig,
    state: PipelineState,
    run_id: Uuid,
}

impl IngestPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage once
    ///
    /// Calling this again after a finished run starts a new run with a
    /// fresh run id.
    pub async fn run(&mut self) -> Result<PipelineReport, PipelineError> {
        if self.state != PipelineState::Idle {
            self.run_id = Uuid::new_v4();
            self.state = PipelineState::Idle;
        }

        let span = info_span!("pipeline", run_id = %self.run_id);
        self.execute().instrument(span).await
    }

    async fn execute(&mut self) -> Result<PipelineReport, PipelineError> {
        let started_at = Utc::now();
        info!(
            source_url = %self.config.source_url,
            store = %self.config.store.path.display(),
            "Starting ingestion pipeline"
        );

        // 1. Staging area
        info!("Phase 1: Preparing staging area");
        if let Err(e) = self.prepare().await {
            return Err(self.fail(Stage::Prepare, e));
        }
        self.transition(PipelineState::Staged);

        // 2. Fetch
        info!("Phase 2: Fetching archive");
        let archive = match self.fetch().await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(Stage::Fetch, e)),
        };
        self.transition(PipelineState::Fetched);

        // 3. Extract
        info!("Phase 3: Extracting archive");
        let tree = match extract_archive(&archive.path, &self.config.extract_dir()).await {
            Ok(tree) => tree,
            Err(e) => return Err(self.fail(Stage::Extract, e)),
        };
        self.transition(PipelineState::Extracted);

        // 4. Schema
        info!("Phase 4: Resetting destination schema");
        if let Err(e) = self.reset_schema().await {
            return Err(self.fail(Stage::Schema, e));
        }
        self.transition(PipelineState::SchemaReady);

        // 5. Load, one record type at a time
        let mut loads = Vec::with_capacity(RecordKind::ALL.len());
        for (i, kind) in RecordKind::ALL.into_iter().enumerate() {
            info!(table = kind.table(), "Phase 5.{}: Loading {}", i + 1, kind);
            match self.load(kind, &tree).await {
                Ok(stats) => loads.push(stats),
                Err(e) => return Err(self.fail(Stage::Load(kind), e)),
            }
            self.transition(PipelineState::Loaded(kind));
        }

        self.transition(PipelineState::Done);

        let report = PipelineReport {
            run_id: self.run_id,
            source_url: self.config.source_url.clone(),
            started_at,
            finished_at: Utc::now(),
            archive,
            extracted_entries: tree.entries,
            loads,
        };
        info!("{}", report.summary());

        Ok(report)
    }

    async fn prepare(&self) -> Result<(), IngestError> {
        let staging = &self.config.staging_dir;
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|source| staging_error(staging, source))?;

        // Leftovers from an earlier run must not mix with this archive's tree.
        let extract_dir = self.config.extract_dir();
        let exists = tokio::fs::try_exists(&extract_dir)
            .await
            .map_err(|source| staging_error(&extract_dir, source))?;
        if exists {
            tokio::fs::remove_dir_all(&extract_dir)
                .await
                .map_err(|source| staging_error(&extract_dir, source))?;
        }
        tokio::fs::create_dir_all(&extract_dir)
            .await
            .map_err(|source| staging_error(&extract_dir, source))?;

        Ok(())
    }

    async fn fetch(&self) -> Result<FetchOutcome, IngestError> {
        let fetcher = ResourceFetcher::new(self.config.fetch.clone())?;
        let outcome = fetcher
            .fetch(&self.config.source_url, &self.config.archive_path())
            .await?;
        Ok(outcome)
    }

    async fn reset_schema(&self) -> Result<(), IngestError> {
        let store = Store::open(&self.config.store)
            .await
            .map_err(|source| SchemaError::Open {
                path: self.config.store.path.clone(),
                source,
            })?;

        let result = SchemaManager::new(store.pool().clone()).reset().await;
        store.close().await;
        result.map_err(IngestError::from)
    }

    async fn load(&self, kind: RecordKind, tree: &ExtractedTree) -> Result<LoadStats, IngestError> {
        let store = Store::open(&self.config.store)
            .await
            .map_err(|source| LoadError::Open {
                path: self.config.store.path.clone(),
                source,
            })?;

        let loader = RecordLoader::new(store.pool().clone(), self.config.loader.clone());
        let result = loader.load(kind, &tree.path_of(kind)).await;
        store.close().await;
        result
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    fn fail(&mut self, stage: Stage, source: impl Into<IngestError>) -> PipelineError {
        let err = PipelineError::new(stage, source);
        error!(stage = %stage, error = %err.source, "Pipeline failed");
        self.transition(PipelineState::Failed(stage));
        err
    }
}

fn staging_error(path: &std::path::Path, source: std::io::Error) -> IngestError {
    IngestError::Staging {
        path: path.to_path_buf(),
        source,
    }
}
