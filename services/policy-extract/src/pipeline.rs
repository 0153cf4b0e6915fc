//! Document pipeline: PDF bytes -> text -> structured record

use std::sync::Arc;
use std::time::Instant;

use extraction::{ExtractionRequest, Orchestrator, StructuredRecord};
use pdf_text::TextSource;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::metrics;

/// Everything needed to process one document.
#[derive(Clone)]
pub struct Pipeline {
    pub orchestrator: Arc<Orchestrator>,
    pub text_source: Arc<dyn TextSource>,
}

impl Pipeline {
    pub fn new(orchestrator: Arc<Orchestrator>, text_source: Arc<dyn TextSource>) -> Self {
        Self {
            orchestrator,
            text_source,
        }
    }

    /// Transcribe a PDF and extract a record from it.
    ///
    /// PDF parsing is CPU-bound and runs on the blocking pool.
    pub async fn process_pdf(&self, data: Vec<u8>, insurer: &str) -> Result<StructuredRecord> {
        let started = Instant::now();
        let label = self.metric_label(insurer);
        let bytes = data.len();
        let source = Arc::clone(&self.text_source);
        let text = tokio::task::spawn_blocking(move || source.extract_text(&data))
            .await
            .map_err(|e| Error::Task(e.to_string()))?;

        let text = match text {
            Ok(text) => text,
            Err(e) => {
                let err = Error::from(e);
                warn!(insurer, bytes, error = %err, "PDF transcription failed");
                metrics::record_extraction(label, err.kind(), started.elapsed().as_secs_f64());
                return Err(err);
            }
        };
        info!(insurer, bytes, chars = text.chars().count(), "PDF transcribed");

        self.finish(text, insurer, started).await
    }

    /// Extract a record from already transcribed text.
    pub async fn process_text(&self, text: String, insurer: &str) -> Result<StructuredRecord> {
        self.finish(text, insurer, Instant::now()).await
    }

    /// Metric label for a requested insurer: the registered id, or "unknown"
    /// so arbitrary input cannot create new series.
    fn metric_label(&self, insurer: &str) -> &str {
        self.orchestrator
            .registry()
            .get(insurer)
            .map_or("unknown", |profile| profile.id.as_str())
    }

    async fn finish(
        &self,
        text: String,
        insurer: &str,
        started: Instant,
    ) -> Result<StructuredRecord> {
        let label = self.metric_label(insurer);
        let request = ExtractionRequest::new(text, insurer);
        let result = self.orchestrator.extract(&request).await.map_err(Error::from);
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(record) => {
                metrics::record_extraction(label, "success", elapsed);
                info!(
                    insurer,
                    policy_no = record.policy_number(),
                    elapsed_secs = elapsed,
                    "extraction complete"
                );
            }
            Err(e) => {
                metrics::record_extraction(label, e.kind(), elapsed);
                warn!(insurer, kind = e.kind(), error = %e, "extraction failed");
            }
        }
        result
    }
}
