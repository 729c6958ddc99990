//! # Batch Coordinator
//!
//! Un round trip del protocollo a pagine:
//!
//! 1. Risolve l'insieme ordinato dei candidati per il job
//! 2. Prende la fetta `[(page-1)*size, page*size)`
//! 3. Esegue il job su ogni candidato in parallelo (worker limitati da un
//!    semaforo), restituendo i risultati nell'ordine dei candidati
//! 4. Registra gli esiti e calcola il cursore successivo
//!
//! Un errore su un singolo elemento viene registrato nel risultato e non
//! interrompe mai la pagina. Nemmeno un salvataggio fallito del catalogo la
//! interrompe: i file sono già stati riscritti, quindi la pagina viene
//! restituita con `state_persisted = false`. Nessuno stato di sessione tra le
//! chiamate: tutto quello che serve viaggia nel cursore.

use super::catalog::{AssetCatalog, CatalogEntry};
use super::cursor::BatchCursor;
use super::task_optimizer::TaskOptimizer;
use super::JobKind;
use crate::error::OptimizeError;
use crate::file_manager::FileManager;
use crate::image_processor::OptimizationResult;
use crate::policy::OptimizationPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Response of one page round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    pub job: JobKind,
    /// Page that was just processed, with `total_candidates` and `run_id` filled in
    pub cursor: BatchCursor,
    pub results: Vec<OptimizationResult>,
    pub next_cursor: BatchCursor,
    pub completed: bool,
    pub processed: u64,
    pub failed: u64,
    pub savings_bytes: i64,
    pub savings_human: String,
    pub progress_percent: u8,
    /// False when the catalog could not be saved after this page
    pub state_persisted: bool,
}

/// Drives a job across a catalog, one page per call
pub struct BatchCoordinator<C: AssetCatalog> {
    catalog: C,
    task: TaskOptimizer,
    workers: usize,
}

impl<C: AssetCatalog> BatchCoordinator<C> {
    pub fn new(catalog: C, task: TaskOptimizer, workers: usize) -> Self {
        Self {
            catalog,
            task,
            workers: workers.max(1),
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Process the page described by `cursor`
    pub async fn run_page(
        &mut self,
        job: JobKind,
        cursor: &BatchCursor,
        policy: &OptimizationPolicy,
    ) -> Result<PageResponse> {
        cursor.validate()?;

        let run_id = match cursor.run_id {
            Some(run_id) => run_id,
            None => {
                let run_id = BatchCursor::new_run_id();
                self.catalog.begin_run(job, run_id);
                run_id
            }
        };

        let candidates = self.catalog.candidates(job, run_id);
        let current = BatchCursor {
            total_candidates: candidates.len(),
            run_id: Some(run_id),
            ..cursor.clone()
        };

        let page: Vec<CatalogEntry> = candidates
            .into_iter()
            .skip(current.offset())
            .take(current.page_size)
            .collect();
        info!(
            "{} page {} ({} of {} candidates)",
            job,
            current.page_number,
            page.len(),
            current.total_candidates
        );

        let outcomes = self.process_page(job, &page, policy).await;

        let mut results = Vec::with_capacity(page.len());
        let mut processed = 0u64;
        let mut failed = 0u64;
        let mut savings_bytes = 0i64;

        for (entry, outcome) in page.iter().zip(outcomes) {
            match outcome {
                Ok(result) => {
                    if let Err(e) = self.catalog.record(entry, job, Some(run_id), &result) {
                        warn!("Could not record {}: {}", entry.path.display(), e);
                    }
                    processed += 1;
                    savings_bytes += result.savings_bytes;
                    results.push(result);
                }
                Err(e) => {
                    warn!("{} failed for {}: {}", job, entry.path.display(), e);
                    let size = tokio::fs::metadata(&entry.path).await.map(|m| m.len()).unwrap_or(0);
                    failed += 1;
                    results.push(OptimizationResult::failed(entry.path.clone(), size, &e));
                }
            }
        }

        let state_persisted = self.persist().await;

        let completed = current.is_completed();
        let next_cursor = current.advance(processed, failed, savings_bytes);
        debug!(
            "Page {} done: {} processed, {} failed, completed={}",
            current.page_number, processed, failed, completed
        );

        Ok(PageResponse {
            job,
            progress_percent: current.progress_percent(),
            cursor: current,
            results,
            next_cursor,
            completed,
            processed,
            failed,
            savings_bytes,
            savings_human: FileManager::format_signed_size(savings_bytes),
            state_persisted,
        })
    }

    /// Optimize one file outside the page protocol (upload / on-demand path).
    ///
    /// Always re-encodes. A success is recorded in the catalog when the file
    /// belongs to it, so later bulk runs do not pick it up again.
    pub async fn optimize_file(
        &mut self,
        path: &Path,
        policy: &OptimizationPolicy,
    ) -> Result<OptimizationResult, OptimizeError> {
        let result = self.task.optimize_file(path, policy).await?;

        match self.catalog.entry_for(path) {
            Some(entry) => {
                if let Err(e) = self.catalog.record(&entry, JobKind::Optimize, None, &result) {
                    warn!("Could not record {}: {}", entry.path.display(), e);
                }
                self.persist().await;
            }
            None => debug!("{} is outside the catalog, not recorded", path.display()),
        }
        Ok(result)
    }

    async fn persist(&mut self) -> bool {
        match self.catalog.flush().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Catalog state not saved: {:#}", e);
                false
            }
        }
    }

    /// Run the job on every entry with at most `workers` in flight; output keeps entry order
    async fn process_page(
        &self,
        job: JobKind,
        page: &[CatalogEntry],
        policy: &OptimizationPolicy,
    ) -> Vec<Result<OptimizationResult, OptimizeError>> {
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let handles: Vec<_> = page
            .iter()
            .map(|entry| {
                let semaphore = semaphore.clone();
                let task = self.task.clone();
                let path = entry.path.clone();
                let policy = *policy;
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| OptimizeError::Io(std::io::Error::other(e)))?;
                    task.run(job, &path, &policy).await
                })
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(OptimizeError::Io(std::io::Error::other(e)))))
            .collect()
    }
}
