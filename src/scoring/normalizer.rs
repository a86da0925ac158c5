use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::buckets;
use super::schema::{DerivationSources, FieldSpec, SchemaRegistry};

/// Raw claim field value exactly as the form or CSV supplied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Number(value) => write!(f, "{value}"),
            RawValue::Text(text) => f.write_str(text),
        }
    }
}

/// One claim as entered, keyed by raw field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawClaimRecord(pub BTreeMap<String, RawValue>);

impl RawClaimRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: RawValue) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&RawValue> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Intermediate value while a record moves through the transformation pass.
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Number(f64),
    Date(NaiveDate),
    Text(String),
    Missing,
}

impl FieldValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            FieldValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(date) => Some(*date),
            FieldValue::Text(text) => parse_claim_date(text),
            _ => None,
        }
    }

    fn as_option_key(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Feature vector projected onto the trained column order, plus the numeric
/// observations the advisory rules evaluate. Projected values are `f64` with
/// NaN standing in for a missing observation, mirroring what the classifiers
/// saw in training.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedClaim {
    columns: Vec<String>,
    values: Vec<f64>,
    observations: BTreeMap<String, f64>,
}

impl NormalizedClaim {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value for a projected column; `None` when the column was not part of
    /// the expected set at all.
    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|index| self.values[index])
    }

    /// Numeric observation for a column before range snapping. Range features
    /// collapse onto training midpoints for the models, but the advisory
    /// rules compare against the entered magnitude (a holder with eight past
    /// claims must trip the history rule even though the nearest midpoint is
    /// five). Currency conversion still applies.
    pub fn observation(&self, column: &str) -> Option<f64> {
        self.observations.get(column).copied()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("source column '{column}' required by '{field}' is missing from the claim record")]
    MissingSource { field: String, column: String },
    #[error("column '{column}' did not resolve to a numeric value")]
    NonNumericColumn { column: String },
    #[error("required feature columns are missing after transformation: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

/// Claim dates are day-first throughout the form.
pub fn parse_claim_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%d/%m/%Y").ok()
}

/// Transforms a raw claim record into the feature vector the classifiers
/// expect: rename raw fields to their canonical columns, apply the
/// schema-declared transformation per field, then project onto
/// `expected_columns` in order.
pub fn normalize(
    record: &RawClaimRecord,
    schema: &SchemaRegistry,
    expected_columns: &[String],
) -> Result<NormalizedClaim, NormalizeError> {
    let mut working: BTreeMap<String, FieldValue> = BTreeMap::new();
    for (field, value) in record.iter() {
        let canonical = schema.canonical_name(field).to_string();
        let seeded = match value {
            RawValue::Number(number) => FieldValue::Number(*number),
            RawValue::Text(text) => FieldValue::Text(text.clone()),
        };
        working.insert(canonical, seeded);
    }

    let mut observations: BTreeMap<String, f64> = BTreeMap::new();

    for (field, spec) in schema.iter() {
        let column = spec.original().unwrap_or(field);
        match spec {
            FieldSpec::Date { .. } => {
                let value = require_column(&working, field, column)?;
                let parsed = match value.as_date() {
                    Some(date) => FieldValue::Date(date),
                    None => FieldValue::Missing,
                };
                working.insert(column.to_string(), parsed);
            }
            FieldSpec::Categorical { options, .. } => {
                let value = require_column(&working, field, column)?;
                let mapped = value
                    .as_option_key()
                    .and_then(|key| options.get(key))
                    .copied();
                let mapped = mapped.map(FieldValue::Number).unwrap_or(FieldValue::Missing);
                observe(&mut observations, column, &mapped);
                working.insert(column.to_string(), mapped);
            }
            FieldSpec::Numeric { .. } => {
                let value = require_column(&working, field, column)?;
                let coerced = match value.as_number() {
                    Some(number) => {
                        let (observed, snapped) = apply_bucketing(column, number);
                        observations.insert(column.to_string(), observed);
                        FieldValue::Number(snapped)
                    }
                    None => {
                        observations.insert(column.to_string(), f64::NAN);
                        FieldValue::Missing
                    }
                };
                working.insert(column.to_string(), coerced);
            }
            FieldSpec::Derived {
                sources: DerivationSources::Single(source),
                options,
                ..
            } => {
                let source_column = schema.canonical_name(source);
                let value = require_column(&working, field, source_column)?;
                let source_date = value.as_date();
                match derive_single(column, options.as_ref(), source_date) {
                    Some(derived) => {
                        observe(&mut observations, column, &derived);
                        working.insert(column.to_string(), derived);
                    }
                    None => {
                        debug!(
                            field = %column,
                            "derived field has options but no recognized derivation; skipped"
                        );
                    }
                }
            }
            FieldSpec::Derived {
                sources: DerivationSources::Pair(first, second),
                ..
            } => {
                let (Some(start), Some(end)) = (working.get(first.as_str()), working.get(second.as_str()))
                else {
                    warn!(
                        field = %column,
                        first = %first,
                        second = %second,
                        "source columns for date delta are absent; field skipped"
                    );
                    continue;
                };
                let delta = match (start.as_date(), end.as_date()) {
                    (Some(start), Some(end)) => {
                        FieldValue::Number((end - start).num_days() as f64)
                    }
                    _ => FieldValue::Missing,
                };
                observe(&mut observations, column, &delta);
                working.insert(column.to_string(), delta);
            }
        }
    }

    project(&working, expected_columns, observations)
}

fn observe(observations: &mut BTreeMap<String, f64>, column: &str, value: &FieldValue) {
    observations.insert(
        column.to_string(),
        match value {
            FieldValue::Number(number) => *number,
            _ => f64::NAN,
        },
    );
}

fn require_column<'a>(
    working: &'a BTreeMap<String, FieldValue>,
    field: &str,
    column: &str,
) -> Result<&'a FieldValue, NormalizeError> {
    working
        .get(column)
        .ok_or_else(|| NormalizeError::MissingSource {
            field: field.to_string(),
            column: column.to_string(),
        })
}

/// Returns `(observed, snapped)`: the value the advisory rules compare
/// against and the representative midpoint the models receive. Currency
/// conversion happens before both.
fn apply_bucketing(column: &str, value: f64) -> (f64, f64) {
    match buckets::representatives(column) {
        Some(representatives) => {
            let value = if column == "VehiclePrice" {
                value * buckets::EUR_TO_USD
            } else {
                value
            };
            (value, buckets::snap_to_representative(value, representatives))
        }
        None => (value, value),
    }
}

/// Single-source derivations: month code and weekday code need an `options`
/// map keyed by the derived column's name; without options the derivation is
/// the week-of-month index.
fn derive_single(
    column: &str,
    options: Option<&BTreeMap<String, f64>>,
    source_date: Option<NaiveDate>,
) -> Option<FieldValue> {
    let lowered = column.to_ascii_lowercase();
    match options {
        Some(options) if lowered.contains("month") => Some(map_date_label(
            source_date.map(|date| date.format("%b").to_string()),
            options,
        )),
        Some(options) if lowered.contains("dayofweek") => Some(map_date_label(
            source_date.map(|date| date.format("%A").to_string()),
            options,
        )),
        Some(_) => None,
        None => Some(match source_date {
            Some(date) => {
                FieldValue::Number((f64::from((date.day() - 1) / 7)) + 1.0)
            }
            None => FieldValue::Missing,
        }),
    }
}

fn map_date_label(label: Option<String>, options: &BTreeMap<String, f64>) -> FieldValue {
    label
        .and_then(|label| options.get(&label).copied())
        .map(FieldValue::Number)
        .unwrap_or(FieldValue::Missing)
}

fn project(
    working: &BTreeMap<String, FieldValue>,
    expected_columns: &[String],
    observations: BTreeMap<String, f64>,
) -> Result<NormalizedClaim, NormalizeError> {
    let missing: Vec<String> = expected_columns
        .iter()
        .filter(|column| !working.contains_key(column.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(NormalizeError::MissingColumns(missing));
    }

    let mut values = Vec::with_capacity(expected_columns.len());
    for column in expected_columns {
        let value = match &working[column.as_str()] {
            FieldValue::Number(value) => *value,
            FieldValue::Missing => f64::NAN,
            FieldValue::Date(_) | FieldValue::Text(_) => {
                return Err(NormalizeError::NonNumericColumn {
                    column: column.clone(),
                })
            }
        };
        values.push(value);
    }

    Ok(NormalizedClaim {
        columns: expected_columns.to_vec(),
        values,
        observations,
    })
}
