mod config;
mod heuristics;
mod llm_extract;
mod notes_extract;
mod repair_db;
mod valuation;

use config::Config;
use repair_db::RepairStore;
use std::io::Read;
use std::path::Path;
use std::{env, fs};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = ".config/repair_notes.toml";

const USAGE: &str = "usage: repair-notes <command>

  parse <file|->      parse one office-notes file (or stdin) and print JSON
  ingest <jobs.json>  parse a job export and store the results
  report              print repair summary and per-property rollup
  show <job_id>       print one stored job and its line items
  llm <file>          compare heuristic and LLM extraction for one file";

fn read_notes(source: &str) -> Result<String, Box<dyn std::error::Error>> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    Ok(fs::read_to_string(source)?)
}

fn open_store(cfg: &Config) -> Result<RepairStore, Box<dyn std::error::Error>> {
    if let Some(dir) = Path::new(&cfg.db_path).parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    info!(db_path = %cfg.db_path, "Opening repair store");
    Ok(RepairStore::new(&cfg.db_path)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = env::var("REPAIR_NOTES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = Config::load_or_default(&config_path)?;

    let args: Vec<String> = env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["parse", source] => {
            let notes = read_notes(source)?;
            let parsed = heuristics::parse_office_notes(&notes);
            let prices = heuristics::extract_prices(&notes);
            info!(
                items = parsed.as_ref().map_or(0, |p| p.items.len()),
                fallback_prices = prices.prices.len(),
                "Parsed office notes"
            );
            let out = serde_json::json!({
                "parsedRepair": parsed,
                "priceExtraction": prices,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        ["ingest", jobs_path] => {
            let jobs = notes_extract::load_jobs(jobs_path)?;
            let store = open_store(&cfg)?;
            let llm = notes_extract::connect_llm(&cfg).await;
            notes_extract::ingest_jobs(&store, jobs, &cfg, llm.as_ref()).await?;
        }
        ["report"] => {
            let store = open_store(&cfg)?;
            let report = notes_extract::build_report(&store, &cfg)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ["show", job_id] => {
            let store = open_store(&cfg)?;
            let record = store
                .get_record(job_id)?
                .ok_or_else(|| format!("No stored repair for job {job_id}"))?;
            let items = store.get_items(job_id)?;
            let out = serde_json::json!({ "record": record, "storedItems": items });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        ["llm", source] => {
            let notes = read_notes(source)?;

            println!("--- Heuristic Extraction ---");
            let parsed = heuristics::parse_office_notes(&notes);
            println!("{}", serde_json::to_string_pretty(&parsed)?);

            let llm = llm_extract::LlmExtractor::connect(&cfg.llm).await?;
            println!("--- LLM Extraction ({:?} / {}) ---", cfg.llm.backend, llm.model());
            match llm.extract(&notes).await {
                Ok(parsed) => println!("{}", serde_json::to_string_pretty(&parsed)?),
                Err(e) => {
                    tracing::error!(error = %e, "LLM extraction failed");
                    println!("LLM error: {e}");
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}
