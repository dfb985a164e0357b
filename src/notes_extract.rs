// src/notes_extract.rs

use crate::config::{Config, LlmBackend};
use crate::heuristics::{self, ParsedRepair};
use crate::llm_extract::LlmExtractor;
use crate::repair_db::RepairStore;
use crate::valuation::{RepairJob, RepairRecord, RepairReport};
use std::{fs, path::Path};
use tracing::{Instrument, error, info, warn};

/// Counters for one ingest run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub seen: usize,
    pub stored: usize,
    /// Jobs whose notes carry no repair data.
    pub skipped: usize,
    /// Jobs whose notes hash matches what is already stored.
    pub unchanged: usize,
    /// Jobs that hit a store error; the rest of the batch still runs.
    pub failed: usize,
}

/// Load a JSON array of jobs exported from the scheduling system.
pub fn load_jobs(path: impl AsRef<Path>) -> Result<Vec<RepairJob>, Box<dyn std::error::Error>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let jobs: Vec<RepairJob> = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to read jobs from {}: {e}", path.display()))?;
    info!(path = %path.display(), count = jobs.len(), "Loaded jobs");
    Ok(jobs)
}

/// Structure notes with the configured engine. The heuristic parser is
/// always the fallback.
pub async fn structure_notes(
    notes: &str,
    llm: Option<&LlmExtractor>,
) -> (Option<ParsedRepair>, &'static str) {
    let Some(llm) = llm else {
        return (heuristics::parse_office_notes(notes), "heuristics");
    };
    match llm.extract(notes).await {
        Ok(parsed) => (parsed, "llm"),
        Err(e) => {
            warn!(error = %e, "LLM extraction failed, falling back to heuristics");
            (heuristics::parse_office_notes(notes), "heuristics")
        }
    }
}

/// Connect to the LLM backend when one is configured. A backend that can't be
/// reached degrades to heuristics for the whole run.
pub async fn connect_llm(config: &Config) -> Option<LlmExtractor> {
    if config.llm.backend == LlmBackend::Heuristics {
        info!("Backend set to heuristics, using regex extraction");
        return None;
    }
    match LlmExtractor::connect(&config.llm).await {
        Ok(llm) => {
            info!(backend = ?config.llm.backend, model = %llm.model(), "Using LLM-based extraction");
            Some(llm)
        }
        Err(e) => {
            warn!(error = %e, "LLM backend unavailable, falling back to heuristics");
            None
        }
    }
}

enum JobOutcome {
    Stored,
    Skipped,
    Unchanged,
}

async fn ingest_one(
    store: &RepairStore,
    job: RepairJob,
    config: &Config,
    llm: Option<&LlmExtractor>,
) -> Result<JobOutcome, Box<dyn std::error::Error>> {
    let hash = RepairStore::notes_hash(&job.job_id, &job.office_notes);
    if store.is_current(&job.job_id, &hash)? {
        return Ok(JobOutcome::Unchanged);
    }

    let (parsed, backend) = structure_notes(&job.office_notes, llm).await;
    let prices = heuristics::extract_prices(&job.office_notes);
    let job_id = job.job_id.clone();

    let Some(record) =
        RepairRecord::from_parts(job, parsed, prices, &config.report.completed_statuses)
    else {
        if store.remove_job(&job_id)? {
            info!("Notes no longer carry repair data, removed");
        }
        return Ok(JobOutcome::Skipped);
    };

    info!(
        invoice_no = ?record.parsed_repair.as_ref().and_then(|p| p.invoice_number.as_deref()),
        items = record.parsed_repair.as_ref().map_or(0, |p| p.items.len()),
        fallback_prices = record.price_extraction.prices.len(),
        total = record.total_repair_value,
        "Extraction result"
    );
    store.upsert_record(&record, backend)?;
    Ok(JobOutcome::Stored)
}

/// Parse every job's notes and persist the ones carrying repair data.
pub async fn ingest_jobs(
    store: &RepairStore,
    jobs: Vec<RepairJob>,
    config: &Config,
    llm: Option<&LlmExtractor>,
) -> Result<IngestStats, Box<dyn std::error::Error>> {
    let mut stats = IngestStats::default();

    for job in jobs {
        stats.seen += 1;
        let span = tracing::info_span!("job", job_id = %job.job_id);

        match ingest_one(store, job, config, llm).instrument(span.clone()).await {
            Ok(JobOutcome::Stored) => stats.stored += 1,
            Ok(JobOutcome::Skipped) => stats.skipped += 1,
            Ok(JobOutcome::Unchanged) => stats.unchanged += 1,
            Err(e) => {
                span.in_scope(|| error!(error = %e, "Failed to ingest job"));
                stats.failed += 1;
            }
        }
    }

    let (jobs, completed, items) = store.get_counts()?;
    info!(
        seen = stats.seen,
        stored = stats.stored,
        skipped = stats.skipped,
        unchanged = stats.unchanged,
        failed = stats.failed,
        jobs_total = jobs,
        jobs_completed = completed,
        items_total = items,
        "Ingest complete"
    );
    Ok(stats)
}

/// Summary and per-property rollup over everything in the store.
pub fn build_report(
    store: &RepairStore,
    config: &Config,
) -> Result<RepairReport, Box<dyn std::error::Error>> {
    let records = store.get_records()?;
    info!(records = records.len(), "Building repair report");
    Ok(RepairReport::build(&records, config.report.commission_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, notes: &str) -> RepairJob {
        serde_json::from_value(serde_json::json!({
            "jobId": id,
            "status": "Completed",
            "customerId": "c1",
            "customerName": "Palm Court",
            "technicianName": "Lee",
            "scheduledDate": "2025-05-12",
            "officeNotes": notes,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn ingest_skips_unchanged_and_empty_jobs() {
        let store = RepairStore::new(":memory:").unwrap();
        let config = Config::default();

        let jobs = vec![
            job("1", "Invoice 54253\nAir Relief Assembly TR Series\n$148.64\nLabor\n$150.00"),
            job("2", "Skimmer checked, no issues"),
        ];
        let stats = ingest_jobs(&store, jobs.clone(), &config, None).await.unwrap();
        assert_eq!(
            stats,
            IngestStats { seen: 2, stored: 1, skipped: 1, unchanged: 0, failed: 0 }
        );

        let again = ingest_jobs(&store, jobs, &config, None).await.unwrap();
        assert_eq!(again.unchanged, 1);
        assert_eq!(again.stored, 0);

        let report = build_report(&store, &config).unwrap();
        assert_eq!(report.summary.total_repairs, 1);
        assert_eq!(report.summary.completed_repairs, 1);
        assert_eq!(report.summary.total_repair_value, 298.64);
        assert_eq!(report.summary.commission, 44.8);
        assert_eq!(report.properties.len(), 1);
        assert_eq!(report.properties[0].customer_name, "Palm Court");
    }

    #[tokio::test]
    async fn emptied_notes_remove_stored_job() {
        let store = RepairStore::new(":memory:").unwrap();
        let config = Config::default();

        ingest_jobs(&store, vec![job("9", "Labor\n$40.00")], &config, None)
            .await
            .unwrap();
        assert_eq!(store.get_counts().unwrap().0, 1);

        let stats = ingest_jobs(&store, vec![job("9", "cancelled")], &config, None)
            .await
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.get_counts().unwrap(), (0, 0, 0));
    }

    #[tokio::test]
    async fn failing_job_does_not_stop_batch() {
        let store = RepairStore::new(":memory:").unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON repair_jobs
                 WHEN NEW.job_id = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let config = Config::default();

        let jobs = vec![job("bad", "Labor\n$40.00"), job("good", "Labor\n$60.00")];
        let stats = ingest_jobs(&store, jobs, &config, None).await.unwrap();
        assert_eq!(
            stats,
            IngestStats { seen: 2, stored: 1, skipped: 0, unchanged: 0, failed: 1 }
        );
        assert_eq!(store.get_counts().unwrap(), (1, 1, 1));
        assert!(store.get_record("good").unwrap().is_some());
        assert!(store.get_record("bad").unwrap().is_none());
    }

    #[tokio::test]
    async fn heuristics_without_llm() {
        let (parsed, backend) = structure_notes("Labor\n$10.00", None).await;
        assert_eq!(backend, "heuristics");
        assert_eq!(parsed.unwrap().total_labor, 10.0);
    }

    #[test]
    fn load_jobs_reports_bad_files() {
        assert!(load_jobs("/nonexistent/jobs.json").is_err());
    }
}
