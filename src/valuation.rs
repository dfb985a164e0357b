// src/valuation.rs

use crate::heuristics::{self, ParsedRepair, PriceExtraction, round_cents};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// A service-repair job as exported from the scheduling system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairJob {
    #[serde(deserialize_with = "id_string")]
    pub job_id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub customer_id: Option<String>,
    #[serde(default = "default_customer")]
    pub customer_name: String,
    #[serde(default = "default_technician")]
    pub technician_name: String,
    #[serde(default)]
    pub scheduled_date: Option<String>,
    #[serde(default)]
    pub office_notes: String,
}

fn default_title() -> String {
    "Service Job".to_string()
}

fn default_status() -> String {
    "Pending".to_string()
}

fn default_customer() -> String {
    "Unknown".to_string()
}

fn default_technician() -> String {
    "Unassigned".to_string()
}

// Job and customer ids arrive as either JSON numbers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(id: RawId) -> Self {
        match id {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawId::deserialize(d).map(String::from)
}

fn opt_id_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(d)?.map(String::from))
}

/// A job together with what was recovered from its office notes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRecord {
    #[serde(flatten)]
    pub job: RepairJob,
    pub parsed_repair: Option<ParsedRepair>,
    pub price_extraction: PriceExtraction,
    pub is_completed: bool,
    pub total_repair_value: f64,
    pub labor_amount: f64,
    pub parts_amount: f64,
}

impl RepairRecord {
    /// Combine both extraction results. Jobs whose notes produced neither a
    /// parse nor a single dollar amount carry no repair data.
    pub fn from_parts(
        job: RepairJob,
        parsed_repair: Option<ParsedRepair>,
        price_extraction: PriceExtraction,
        completed_statuses: &[String],
    ) -> Option<Self> {
        if parsed_repair.is_none() && price_extraction.prices.is_empty() {
            return None;
        }

        let total_repair_value = match &parsed_repair {
            Some(p) if p.total_price != 0.0 => p.total_price,
            _ => price_extraction.total,
        };
        let labor_amount = parsed_repair.as_ref().map_or(0.0, |p| p.total_labor);
        let parts_amount = parsed_repair.as_ref().map_or(0.0, |p| p.total_parts);
        let is_completed = completed_statuses.iter().any(|s| *s == job.status);

        Some(Self {
            job,
            parsed_repair,
            price_extraction,
            is_completed,
            total_repair_value,
            labor_amount,
            parts_amount,
        })
    }

    fn service_date(&self) -> Option<Date> {
        self.job.scheduled_date.as_deref().and_then(parse_service_date)
    }
}

/// Run the heuristic parser and the fallback extractor over a job's notes.
pub fn evaluate_job(job: RepairJob, completed_statuses: &[String]) -> Option<RepairRecord> {
    let parsed = heuristics::parse_office_notes(&job.office_notes);
    let prices = heuristics::extract_prices(&job.office_notes);
    RepairRecord::from_parts(job, parsed, prices, completed_statuses)
}

/// Accepts RFC 3339 timestamps or anything starting with `YYYY-MM-DD`.
pub fn parse_service_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts.date());
    }
    let day = raw.get(..10)?;
    Date::parse(day, format_description!("[year]-[month]-[day]")).ok()
}

fn month_key(date: Date) -> String {
    format!("{:04}-{:02}", date.year(), u8::from(date.month()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairSummary {
    pub total_repairs: usize,
    pub completed_repairs: usize,
    pub total_labor: f64,
    pub total_parts: f64,
    pub total_repair_value: f64,
    pub commission: f64,
}

impl RepairSummary {
    pub fn from_records(records: &[RepairRecord], commission_rate: f64) -> Self {
        let total_labor = records.iter().fold(0.0, |acc, r| acc + r.labor_amount);
        let total_parts = records.iter().fold(0.0, |acc, r| acc + r.parts_amount);
        let total_repair_value = records.iter().fold(0.0, |acc, r| acc + r.total_repair_value);

        Self {
            total_repairs: records.len(),
            completed_repairs: records.iter().filter(|r| r.is_completed).count(),
            total_labor: round_cents(total_labor),
            total_parts: round_cents(total_parts),
            total_repair_value: round_cents(total_repair_value),
            commission: round_cents(total_repair_value * commission_rate),
        }
    }
}

/// Repair spend for one property (customer).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRollup {
    pub property_id: String,
    pub customer_name: String,
    pub technicians: Vec<String>,
    pub total_repairs: usize,
    pub completed_repairs: usize,
    pub pending_repairs: usize,
    pub total_spend: f64,
    pub average_repair_cost: f64,
    pub last_service_date: Option<String>,
    pub monthly_spend: BTreeMap<String, f64>,
}

#[derive(Default)]
struct PropertyAcc {
    customer_name: String,
    technicians: BTreeSet<String>,
    total_repairs: usize,
    completed_repairs: usize,
    total_spend: f64,
    last_service: Option<(Date, String)>,
    monthly_spend: BTreeMap<String, f64>,
}

fn property_key(job: &RepairJob) -> Option<String> {
    if let Some(id) = job.customer_id.as_ref().filter(|id| !id.is_empty()) {
        return Some(id.clone());
    }
    let name = job.customer_name.trim();
    (!name.is_empty() && name != "Unknown").then(|| name.to_string())
}

/// Group records by property, most expensive first. Records that can't be
/// tied to a customer are left out.
pub fn rollup_properties(records: &[RepairRecord]) -> Vec<PropertyRollup> {
    let mut order: Vec<String> = Vec::new();
    let mut by_property: HashMap<String, PropertyAcc> = HashMap::new();

    for record in records {
        let Some(key) = property_key(&record.job) else {
            continue;
        };
        let acc = by_property.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            PropertyAcc {
                customer_name: record.job.customer_name.clone(),
                ..PropertyAcc::default()
            }
        });

        let tech = record.job.technician_name.trim();
        if !tech.is_empty() && tech != "Unassigned" && tech != "Unknown" {
            acc.technicians.insert(tech.to_string());
        }

        acc.total_repairs += 1;
        if record.is_completed {
            acc.completed_repairs += 1;
        }
        acc.total_spend += record.total_repair_value;

        if let Some(date) = record.service_date() {
            *acc.monthly_spend.entry(month_key(date)).or_insert(0.0) += record.total_repair_value;
            let newer = acc.last_service.as_ref().is_none_or(|(seen, _)| date > *seen);
            if newer {
                let raw = record.job.scheduled_date.clone().unwrap_or_default();
                acc.last_service = Some((date, raw));
            }
        }
    }

    let mut rollups: Vec<PropertyRollup> = order
        .into_iter()
        .filter_map(|key| {
            let acc = by_property.remove(&key)?;
            Some(PropertyRollup {
                average_repair_cost: if acc.total_repairs > 0 {
                    round_cents(acc.total_spend / acc.total_repairs as f64)
                } else {
                    0.0
                },
                property_id: key,
                customer_name: acc.customer_name,
                technicians: acc.technicians.into_iter().collect(),
                total_repairs: acc.total_repairs,
                completed_repairs: acc.completed_repairs,
                pending_repairs: acc.total_repairs - acc.completed_repairs,
                total_spend: round_cents(acc.total_spend),
                last_service_date: acc.last_service.map(|(_, raw)| raw),
                monthly_spend: acc
                    .monthly_spend
                    .into_iter()
                    .map(|(month, spend)| (month, round_cents(spend)))
                    .collect(),
            })
        })
        .collect();

    rollups.sort_by(|a, b| b.total_spend.total_cmp(&a.total_spend));
    rollups
}

/// Everything the `report` command prints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub summary: RepairSummary,
    pub properties: Vec<PropertyRollup>,
}

impl RepairReport {
    pub fn build(records: &[RepairRecord], commission_rate: f64) -> Self {
        Self {
            summary: RepairSummary::from_records(records, commission_rate),
            properties: rollup_properties(records),
        }
    }
}
