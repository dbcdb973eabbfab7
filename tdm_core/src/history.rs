//! Dose and observation history import from CSV.
//!
//! Exports from ward systems are messy, so rows that fail to parse are logged
//! and skipped rather than failing the whole import.

use crate::{DoseEvent, ObservationEvent, Result, Route};
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::path::Path;

/// CSV row format for dose history
#[derive(Debug, Deserialize)]
struct DoseRow {
    timestamp: String,
    amount: f64,
    route: Option<String>,
    infusion_minutes: Option<f64>,
}

/// CSV row format for measured levels
#[derive(Debug, Deserialize)]
struct ObservationRow {
    timestamp: String,
    concentration: f64,
    unit: String,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Other(format!("Invalid timestamp {:?}: {}", raw, e)))
}

/// Parse a route label; blank means intravenous
pub fn parse_route(raw: &str) -> Result<Route> {
    match raw.trim().to_lowercase().as_str() {
        "" | "iv" | "intravenous" => Ok(Route::Iv),
        "po" | "oral" => Ok(Route::Oral),
        "sc" | "subcutaneous" => Ok(Route::Sc),
        "im" | "intramuscular" => Ok(Route::Im),
        other => Err(crate::Error::Other(format!("Unknown route: {}", other))),
    }
}

impl TryFrom<DoseRow> for DoseEvent {
    type Error = crate::Error;

    fn try_from(row: DoseRow) -> Result<Self> {
        if !(row.amount > 0.0) {
            return Err(crate::Error::Other(format!(
                "Dose amount must be positive, got {}",
                row.amount
            )));
        }
        Ok(DoseEvent {
            timestamp: parse_timestamp(&row.timestamp)?,
            amount: row.amount,
            route: parse_route(row.route.as_deref().unwrap_or(""))?,
            infusion_minutes: row.infusion_minutes.filter(|m| *m > 0.0),
        })
    }
}

impl TryFrom<ObservationRow> for ObservationEvent {
    type Error = crate::Error;

    fn try_from(row: ObservationRow) -> Result<Self> {
        if row.concentration < 0.0 {
            return Err(crate::Error::Other(format!(
                "Concentration must not be negative, got {}",
                row.concentration
            )));
        }
        Ok(ObservationEvent {
            timestamp: parse_timestamp(&row.timestamp)?,
            concentration: row.concentration,
            unit: row.unit.trim().to_string(),
        })
    }
}

fn load_rows<R, T>(path: &Path, kind: &str) -> Result<Vec<T>>
where
    R: for<'de> Deserialize<'de>,
    T: TryFrom<R, Error = crate::Error>,
{
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut events = Vec::new();
    for (line, result) in reader.deserialize::<R>().enumerate() {
        match result {
            Ok(row) => match T::try_from(row) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("Skipping {} row {}: {}", kind, line + 1, e);
                    // Continue processing other rows
                }
            },
            Err(e) => {
                tracing::warn!("Failed to deserialize {} row {}: {}", kind, line + 1, e);
            }
        }
    }

    tracing::info!("Loaded {} {} rows from {:?}", events.len(), kind, path);
    Ok(events)
}

/// Load dose history from a CSV file, sorted by time
///
/// Columns: `timestamp,amount,route,infusion_minutes`.
pub fn load_dose_events(path: &Path) -> Result<Vec<DoseEvent>> {
    let mut doses: Vec<DoseEvent> = load_rows::<DoseRow, _>(path, "dose")?;
    doses.sort_by_key(|d| d.timestamp);
    Ok(doses)
}

/// Load measured levels from a CSV file, sorted by time
///
/// Columns: `timestamp,concentration,unit`.
pub fn load_observation_events(path: &Path) -> Result<Vec<ObservationEvent>> {
    let mut observations: Vec<ObservationEvent> =
        load_rows::<ObservationRow, _>(path, "observation")?;
    observations.sort_by_key(|o| o.timestamp);
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_doses_sorted() {
        let file = write_csv(
            "timestamp,amount,route,infusion_minutes\n\
             2026-03-02T08:00:00Z,1000,iv,60\n\
             2026-03-01T20:00:00Z,750,IV,\n\
             2026-03-02T20:00:00Z,100,po,\n",
        );
        let doses = load_dose_events(file.path()).unwrap();
        assert_eq!(doses.len(), 3);
        assert_eq!(doses[0].amount, 750.0);
        assert_eq!(doses[0].infusion_minutes, None);
        assert_eq!(doses[1].infusion_minutes, Some(60.0));
        assert_eq!(doses[2].route, Route::Oral);
    }

    #[test]
    fn test_bad_dose_rows_skipped() {
        let file = write_csv(
            "timestamp,amount,route,infusion_minutes\n\
             not-a-date,1000,iv,60\n\
             2026-03-01T20:00:00Z,abc,iv,60\n\
             2026-03-01T21:00:00Z,500,nasal,\n\
             2026-03-01T22:00:00Z,0,iv,\n\
             2026-03-02T08:00:00Z,1000,iv,60\n",
        );
        let doses = load_dose_events(file.path()).unwrap();
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].amount, 1000.0);
    }

    #[test]
    fn test_load_observations() {
        let file = write_csv(
            "timestamp,concentration,unit\n\
             2026-03-02T07:30:00Z,12.5,mg/L\n\
             2026-03-01T07:30:00Z, 180 , ng/mL \n\
             2026-03-01T09:00:00Z,-1,mg/L\n",
        );
        let observations = load_observation_events(file.path()).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].concentration, 180.0);
        assert_eq!(observations[0].unit, "ng/mL");
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_dose_events(&dir.path().join("absent.csv")).is_err());
    }
}
