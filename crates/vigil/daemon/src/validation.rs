//! Validation of provider data before it is cached.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use vigil_types::{Classify, FailureKind};

/// Inclusive numeric bounds for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    pub field: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Rules for the records of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRules {
    pub dataset: String,
    /// Fields every record must carry (non-null).
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub ranges: Vec<FieldRange>,
}

/// Outcome of validating one payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Data rejected before caching.
#[derive(Debug, Clone, Error)]
#[error("dataset '{dataset}' failed validation: {}", .errors.join("; "))]
pub struct ValidationError {
    pub dataset: String,
    pub errors: Vec<String>,
}

impl Classify for ValidationError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Validation
    }
}

/// Checks provider payloads against per-dataset rules.
///
/// A payload is either one JSON object or an array of objects. Datasets
/// without rules are accepted as they are.
#[derive(Debug, Clone, Default)]
pub struct DataValidator {
    rules: HashMap<String, DatasetRules>,
}

impl DataValidator {
    pub fn new(rules: impl IntoIterator<Item = DatasetRules>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|r| (r.dataset.clone(), r))
                .collect(),
        }
    }

    pub fn validate(&self, dataset: &str, data: &Value) -> ValidationReport {
        let mut report = ValidationReport {
            is_valid: true,
            ..Default::default()
        };

        let records: Vec<&Value> = match data {
            Value::Array(items) => items.iter().collect(),
            Value::Null => {
                report.errors.push("payload is empty".to_string());
                report.is_valid = false;
                return report;
            }
            other => vec![other],
        };

        if records.is_empty() {
            report.warnings.push("payload contains no records".to_string());
        }

        let Some(rules) = self.rules.get(dataset) else {
            return report;
        };

        for (i, record) in records.iter().enumerate() {
            let Some(fields) = record.as_object() else {
                report.errors.push(format!("record {} is not an object", i));
                continue;
            };

            for field in &rules.required_fields {
                match fields.get(field) {
                    None | Some(Value::Null) => {
                        report
                            .errors
                            .push(format!("record {}: missing required field '{}'", i, field));
                    }
                    Some(_) => {}
                }
            }

            for range in &rules.ranges {
                let Some(value) = fields.get(&range.field) else {
                    continue;
                };
                let Some(number) = value.as_f64() else {
                    report
                        .errors
                        .push(format!("record {}: field '{}' is not numeric", i, range.field));
                    continue;
                };
                if range.min.is_some_and(|min| number < min) || range.max.is_some_and(|max| number > max)
                {
                    report.errors.push(format!(
                        "record {}: field '{}' = {} outside [{}, {}]",
                        i,
                        range.field,
                        number,
                        range.min.map_or("-inf".to_string(), |v| v.to_string()),
                        range.max.map_or("inf".to_string(), |v| v.to_string()),
                    ));
                }
            }

            let unknown: Vec<&String> = fields
                .keys()
                .filter(|k| {
                    !rules.required_fields.contains(k) && !rules.ranges.iter().any(|r| &r.field == *k)
                })
                .collect();
            if !unknown.is_empty() && i == 0 {
                report.warnings.push(format!(
                    "fields without rules: {}",
                    unknown.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
                ));
            }
        }

        report.is_valid = report.errors.is_empty();
        report
    }

    /// Validate and turn a failing report into an error.
    pub fn check(&self, dataset: &str, data: &Value) -> Result<ValidationReport, ValidationError> {
        let report = self.validate(dataset, data);
        if report.is_valid {
            Ok(report)
        } else {
            Err(ValidationError {
                dataset: dataset.to_string(),
                errors: report.errors,
            })
        }
    }
}
