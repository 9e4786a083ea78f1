use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::postgres::{self, BloatRow};
use crate::error::Result;
use crate::models::{
    rank_index_bloat, BloatThresholds, IndexBloatRecord, TableBloatRecord,
};

/// Statistics-based bloat estimates. Cheap (catalog reads only) and as fresh
/// as the last ANALYZE, so expect drift on busy tables.
#[derive(Clone)]
pub struct BloatEstimator {
    pool: PgPool,
}

impl BloatEstimator {
    pub fn new(pool: PgPool) -> Self {
        BloatEstimator { pool }
    }

    pub async fn estimate_table_bloat(&self) -> Result<Vec<TableBloatRecord>> {
        let rows = postgres::get_table_bloat(&self.pool).await?;
        log::debug!("Table bloat query returned {} rows", rows.len());
        Ok(table_records(rows, Utc::now()))
    }

    pub async fn estimate_index_bloat(&self) -> Result<Vec<IndexBloatRecord>> {
        let rows = postgres::get_index_bloat(&self.pool).await?;
        log::debug!("Index bloat query returned {} rows", rows.len());
        Ok(index_records(rows, Utc::now()))
    }
}

pub fn table_records(rows: Vec<BloatRow>, captured_at: DateTime<Utc>) -> Vec<TableBloatRecord> {
    rows.into_iter()
        .map(|row| TableBloatRecord {
            measurement: row.measurement(),
            schema: row.schema,
            table_name: row.table_name,
            captured_at,
        })
        .collect()
}

pub fn index_records(rows: Vec<BloatRow>, captured_at: DateTime<Utc>) -> Vec<IndexBloatRecord> {
    rows.into_iter()
        .filter_map(|row| {
            let measurement = row.measurement();
            Some(IndexBloatRecord {
                index_name: row.index_name?,
                schema: row.schema,
                table_name: row.table_name,
                measurement,
                captured_at,
            })
        })
        .collect()
}

/// Indexes worth rebuilding, most wasted bytes first.
pub fn select_reindex_candidates(
    mut records: Vec<IndexBloatRecord>,
    thresholds: &BloatThresholds,
) -> Vec<IndexBloatRecord> {
    records.retain(|r| r.exceeds(thresholds));
    rank_index_bloat(&mut records);
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: i64 = 1024 * 1024;

    fn row(table: &str, index: Option<&str>, real: i64, bloat: i64) -> BloatRow {
        BloatRow {
            schema: "public".into(),
            table_name: table.into(),
            index_name: index.map(String::from),
            real_size: real,
            bloat_size: bloat,
            reported_ratio: if real > 0 {
                100.0 * bloat as f64 / real as f64
            } else {
                0.0
            },
        }
    }

    #[test]
    fn test_table_records_hold_invariants() {
        let now = Utc::now();
        let records = table_records(
            vec![
                row("obs", None, 100 * MB, 40 * MB),
                row("grid", None, 8 * 8192, -3 * 8192),
                row("empty", None, 0, 0),
            ],
            now,
        );

        assert_eq!(records.len(), 3);
        for r in &records {
            assert!(r.bloat_size_bytes() <= r.real_size_bytes());
            assert!((0.0..=100.0).contains(&r.bloat_ratio()));
            assert_eq!(r.captured_at, now);
        }
        assert!((records[0].bloat_ratio() - 40.0).abs() < 1e-9);
        assert_eq!(records[1].bloat_size_bytes(), 0);
    }

    #[test]
    fn test_no_rows_is_empty_list() {
        assert!(table_records(Vec::new(), Utc::now()).is_empty());
        assert!(index_records(Vec::new(), Utc::now()).is_empty());
    }

    #[test]
    fn test_index_records_keep_index_name() {
        let records = index_records(
            vec![row("obs", Some("obs_pkey"), 16 * MB, 4 * MB)],
            Utc::now(),
        );
        assert_eq!(records[0].index_name, "obs_pkey");
        assert_eq!(records[0].table_name, "obs");
        assert!((records[0].bloat_ratio() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_candidates_filters_and_ranks() {
        let records = index_records(
            vec![
                row("obs", Some("small_idx"), 2 * MB, MB),
                row("obs", Some("mid_idx"), 100 * MB, 35 * MB),
                row("obs", Some("big_idx"), 400 * MB, 300 * MB),
                row("obs", Some("healthy_idx"), 400 * MB, 10 * MB),
            ],
            Utc::now(),
        );

        let candidates = select_reindex_candidates(records, &BloatThresholds::default());
        let names: Vec<_> = candidates.iter().map(|r| r.index_name.as_str()).collect();
        assert_eq!(names, ["big_idx", "mid_idx"]);
    }
}
