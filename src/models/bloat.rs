use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::BloatThresholds;

/// Sizes reported by the estimation queries, normalised so that
/// `0 <= bloat_bytes <= real_bytes` and the ratio agrees with both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloatMeasurement {
    pub real_size_bytes: i64,
    pub bloat_size_bytes: i64,
    pub bloat_ratio: f64,
}

impl BloatMeasurement {
    /// The estimate is statistical: fresh statistics can put the expected page
    /// count above the allocated one, which yields a negative raw bloat.
    pub fn from_raw(real_size_bytes: i64, bloat_size_bytes: i64) -> Self {
        let real_size_bytes = real_size_bytes.max(0);
        let bloat_size_bytes = bloat_size_bytes.clamp(0, real_size_bytes);
        let bloat_ratio = if real_size_bytes > 0 {
            100.0 * bloat_size_bytes as f64 / real_size_bytes as f64
        } else {
            0.0
        };

        BloatMeasurement {
            real_size_bytes,
            bloat_size_bytes,
            bloat_ratio,
        }
    }

    fn reaches(&self, min_percent: f64, min_bytes: i64) -> bool {
        self.bloat_ratio >= min_percent && self.bloat_size_bytes >= min_bytes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableBloatRecord {
    pub schema: String,
    pub table_name: String,
    #[serde(flatten)]
    pub measurement: BloatMeasurement,
    pub captured_at: DateTime<Utc>,
}

impl TableBloatRecord {
    pub fn real_size_bytes(&self) -> i64 {
        self.measurement.real_size_bytes
    }

    pub fn bloat_size_bytes(&self) -> i64 {
        self.measurement.bloat_size_bytes
    }

    pub fn bloat_ratio(&self) -> f64 {
        self.measurement.bloat_ratio
    }

    pub fn exceeds(&self, thresholds: &BloatThresholds) -> bool {
        self.measurement.reaches(
            thresholds.min_table_bloat_percent,
            thresholds.min_table_bloat_bytes,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexBloatRecord {
    pub schema: String,
    pub table_name: String,
    pub index_name: String,
    #[serde(flatten)]
    pub measurement: BloatMeasurement,
    pub captured_at: DateTime<Utc>,
}

impl IndexBloatRecord {
    pub fn real_size_bytes(&self) -> i64 {
        self.measurement.real_size_bytes
    }

    pub fn bloat_size_bytes(&self) -> i64 {
        self.measurement.bloat_size_bytes
    }

    pub fn bloat_ratio(&self) -> f64 {
        self.measurement.bloat_ratio
    }

    pub fn exceeds(&self, thresholds: &BloatThresholds) -> bool {
        self.measurement.reaches(
            thresholds.min_index_bloat_percent,
            thresholds.min_index_bloat_bytes,
        )
    }

    /// `"schema"."index"`, as it appears in log output.
    pub fn qualified_name(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.index_name)
    }
}

fn by_bloat_desc(a: &BloatMeasurement, b: &BloatMeasurement) -> Ordering {
    b.bloat_size_bytes
        .cmp(&a.bloat_size_bytes)
        .then_with(|| b.bloat_ratio.total_cmp(&a.bloat_ratio))
}

/// Largest absolute waste first; ties broken by name so output is stable.
pub fn rank_table_bloat(records: &mut [TableBloatRecord]) {
    records.sort_by(|a, b| {
        by_bloat_desc(&a.measurement, &b.measurement)
            .then_with(|| a.schema.cmp(&b.schema))
            .then_with(|| a.table_name.cmp(&b.table_name))
    });
}

pub fn rank_index_bloat(records: &mut [IndexBloatRecord]) {
    records.sort_by(|a, b| {
        by_bloat_desc(&a.measurement, &b.measurement)
            .then_with(|| a.schema.cmp(&b.schema))
            .then_with(|| a.table_name.cmp(&b.table_name))
            .then_with(|| a.index_name.cmp(&b.index_name))
    });
}
