use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::Result;

/// One physical per-database store belonging to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub file_path: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl DatabaseDescriptor {
    pub fn new(id: i64, name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id,
            project_id: 0,
            name: name.into(),
            file_path: file_path.into(),
            is_active: true,
            last_used_at: None,
        }
    }

    pub fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn with_last_used_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_used_at = Some(at);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    #[serde(default, deserialize_with = "lenient_count")]
    pub count: i64,
    #[serde(default, deserialize_with = "lenient_quality")]
    pub avg_quality: f64,
}

/// Quality statistics of a single database as reported by a stats provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_items: i64,
    #[serde(default, deserialize_with = "lenient_quality")]
    pub average_quality: f64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub benchmark_count: i64,
    #[serde(default)]
    pub by_level: BTreeMap<String, LevelStats>,
}

impl StatsRecord {
    pub fn new(total_items: i64, average_quality: f64) -> Self {
        Self {
            total_items,
            average_quality,
            ..Default::default()
        }
    }

    pub fn with_benchmarks(mut self, benchmark_count: i64) -> Self {
        self.benchmark_count = benchmark_count;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>, count: i64, avg_quality: f64) -> Self {
        self.by_level.insert(level.into(), LevelStats { count, avg_quality });
        self
    }
}

/// What a stats provider hands back: either an already typed record or a
/// loosely shaped JSON document.
#[derive(Debug, Clone)]
pub enum StatsPayload {
    Typed(StatsRecord),
    Document(serde_json::Value),
}

impl StatsPayload {
    /// Canonical decoding step applied once at the aggregator boundary.
    pub fn into_record(self) -> Result<StatsRecord> {
        match self {
            StatsPayload::Typed(record) => Ok(record),
            StatsPayload::Document(value) => Ok(serde_json::from_value(value)?),
        }
    }
}

impl From<StatsRecord> for StatsPayload {
    fn from(record: StatsRecord) -> Self {
        StatsPayload::Typed(record)
    }
}

impl From<serde_json::Value> for StatsPayload {
    fn from(value: serde_json::Value) -> Self {
        StatsPayload::Document(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub count: i64,
    pub avg_quality: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseBreakdown {
    pub database_id: i64,
    pub database_name: String,
    pub database_path: String,
    pub stats: StatsRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_upload_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Project-wide statistics merged from every database that answered in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub total_items: i64,
    pub by_level: BTreeMap<String, LevelSummary>,
    pub average_quality: f64,
    pub benchmark_count: i64,
    pub benchmark_percentage: f64,
    pub databases: Vec<DatabaseBreakdown>,
    pub databases_count: usize,
    pub databases_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl AggregateResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Float(f64),
}

// Documents coming from dynamically typed stores often carry counts as floats.
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Number>::deserialize(deserializer)? {
        Some(Number::Int(n)) => n,
        Some(Number::Float(f)) => f as i64,
        None => 0,
    })
}

fn lenient_quality<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Number>::deserialize(deserializer)? {
        Some(Number::Int(n)) => n as f64,
        Some(Number::Float(f)) => f,
        None => 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_payload_passes_through() {
        let record = StatsRecord::new(10, 0.5).with_benchmarks(2);
        let decoded = StatsPayload::from(record.clone()).into_record().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_document_with_float_counts() {
        let doc = json!({
            "total_items": 120.0,
            "average_quality": 0.75,
            "benchmark_count": 12.0,
            "by_level": {
                "basic": {"count": 100.0, "avg_quality": 0.7},
                "premium": {"count": 20, "avg_quality": 1}
            },
            "unrelated": "ignored"
        });

        let record = StatsPayload::from(doc).into_record().unwrap();
        assert_eq!(record.total_items, 120);
        assert_eq!(record.benchmark_count, 12);
        assert_eq!(record.by_level["basic"].count, 100);
        assert_eq!(record.by_level["premium"].avg_quality, 1.0);
    }

    #[test]
    fn test_document_missing_fields_default_to_zero() {
        let record = StatsPayload::from(json!({"average_quality": null}))
            .into_record()
            .unwrap();
        assert_eq!(record, StatsRecord::default());
    }

    #[test]
    fn test_non_object_document_is_rejected() {
        assert!(StatsPayload::from(json!([1, 2, 3])).into_record().is_err());
    }

    #[test]
    fn test_empty_aggregate_serialization() {
        let value = serde_json::to_value(AggregateResult::empty()).unwrap();
        assert_eq!(value["total_items"], 0);
        assert_eq!(value["databases_count"], 0);
        assert!(value["databases"].as_array().unwrap().is_empty());
        assert!(value.get("last_activity").is_none());
    }
}
