// Plate lookup: enriches plate text with registry data
//
// The registry is a CSV file with a `plate,stolen,vin,year` header, loaded
// when the stage starts. Without a registry every plate is reported unknown.

use crate::pipeline::{Outputs, Processor, StageContext};
use crate::workers::types::{unexpected, Job, PlateInfo};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CHANNEL_PLATE_INFO: &str = "plate_info";

#[derive(Debug, Clone, Deserialize)]
struct RegistryRow {
    plate: String,
    #[serde(default)]
    stolen: bool,
    #[serde(default)]
    vin: Option<String>,
    #[serde(default)]
    year: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryEntry {
    pub stolen: bool,
    pub vin: Option<String>,
    pub year: Option<u16>,
}

/// Uppercases and strips everything that is not a letter or digit.
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn load_registry(path: &Path) -> Result<HashMap<String, RegistryEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open plate registry {:?}", path))?;

    let mut registry = HashMap::new();
    for (line, row) in reader.deserialize::<RegistryRow>().enumerate() {
        let row = row.with_context(|| format!("Bad registry row {} in {:?}", line + 1, path))?;
        let plate = normalize_plate(&row.plate);
        if plate.is_empty() {
            continue;
        }
        registry.insert(
            plate,
            RegistryEntry {
                stolen: row.stolen,
                vin: row.vin.filter(|v| !v.is_empty()),
                year: row.year,
            },
        );
    }
    Ok(registry)
}

pub struct PlateLookup {
    registry_path: Option<PathBuf>,
    registry: HashMap<String, RegistryEntry>,
    last_plate: Option<String>,
}

impl PlateLookup {
    pub fn new(registry_path: Option<PathBuf>) -> Self {
        Self {
            registry_path,
            registry: HashMap::new(),
            last_plate: None,
        }
    }

    pub fn lookup(&self, plate: &str) -> PlateInfo {
        let entry = self.registry.get(plate);
        let entry_or_default = entry.cloned().unwrap_or_default();
        PlateInfo {
            plate: plate.to_string(),
            known: entry.is_some(),
            stolen: entry_or_default.stolen,
            vin: entry_or_default.vin,
            year: entry_or_default.year,
            seen_at: Utc::now(),
        }
    }
}

impl Processor<Job> for PlateLookup {
    fn on_starting(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        self.last_plate = None;
        if let Some(path) = &self.registry_path {
            self.registry = load_registry(path)?;
            tracing::info!("{}: loaded {} registry entries", ctx.name(), self.registry.len());
        }
        Ok(())
    }

    fn process(&mut self, job: Job, ctx: &StageContext<'_>) -> Result<Outputs<Job>> {
        let text = match job {
            Job::Text(text) => text,
            other => return Err(unexpected(ctx.name(), &other)),
        };

        let plate = normalize_plate(&text);
        if plate.is_empty() || self.last_plate.as_deref() == Some(plate.as_str()) {
            return Ok(Outputs::none());
        }

        let info = self.lookup(&plate);
        if info.stolen {
            tracing::warn!("{}: plate {} is reported stolen", ctx.name(), plate);
        }
        self.last_plate = Some(plate);
        Ok(Outputs::none().emit(CHANNEL_PLATE_INFO, Job::Plate(info)))
    }
}
