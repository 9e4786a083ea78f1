use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::{Duration, Instant};

use crate::models::{
    BloatMeasurement, ConnectionConfig, ConstraintInfo, ConstraintKind, DependentConstraint,
    IndexDefinition, ObjectId, PoolSettings,
};

/// Table bloat estimate, adapted from https://github.com/ioguix/pgsql-bloat-estimation
/// (PostgreSQL 9.0+). Only returns schema, table, real size, bloat size and
/// bloat percent, and skips system schemas.
const TABLE_BLOAT_SQL: &str = r#"
SELECT schemaname, tblname, (bs*tblpages)::numeric AS real_size,
  ((tblpages-est_tblpages_ff)*bs)::numeric AS bloat_size,
  CASE WHEN tblpages - est_tblpages_ff > 0
    THEN 100 * (tblpages - est_tblpages_ff)/tblpages::float
    ELSE 0
  END::float AS bloat_ratio
FROM (
  SELECT ceil( reltuples / ( (bs-page_hdr)/tpl_size ) ) + ceil( toasttuples / 4 ) AS est_tblpages,
    ceil( reltuples / ( (bs-page_hdr)*fillfactor/(tpl_size*100) ) ) + ceil( toasttuples / 4 ) AS est_tblpages_ff,
    tblpages, fillfactor, bs, tblid, schemaname, tblname, heappages, toastpages, is_na
  FROM (
    SELECT
      ( 4 + tpl_hdr_size + tpl_data_size + (2*ma)
        - CASE WHEN tpl_hdr_size%ma = 0 THEN ma ELSE tpl_hdr_size%ma END
        - CASE WHEN ceil(tpl_data_size)::int%ma = 0 THEN ma ELSE ceil(tpl_data_size)::int%ma END
      ) AS tpl_size, bs - page_hdr AS size_per_block, (heappages + toastpages) AS tblpages, heappages,
      toastpages, reltuples, toasttuples, bs, page_hdr, tblid, schemaname, tblname, fillfactor, is_na
    FROM (
      SELECT
        tbl.oid AS tblid, ns.nspname AS schemaname, tbl.relname AS tblname, tbl.reltuples,
        tbl.relpages AS heappages, coalesce(toast.relpages, 0) AS toastpages,
        coalesce(toast.reltuples, 0) AS toasttuples,
        coalesce(substring(
          array_to_string(tbl.reloptions, ' ')
          FROM 'fillfactor=([0-9]+)')::smallint, 100) AS fillfactor,
        current_setting('block_size')::numeric AS bs,
        CASE WHEN version()~'mingw32' OR version()~'64-bit|x86_64|ppc64|ia64|amd64' THEN 8 ELSE 4 END AS ma,
        24 AS page_hdr,
        23 + CASE WHEN MAX(coalesce(s.null_frac,0)) > 0 THEN ( 7 + count(*) ) / 8 ELSE 0::int END AS tpl_hdr_size,
        sum( (1-coalesce(s.null_frac, 0)) * coalesce(s.avg_width, 1024) ) AS tpl_data_size,
        bool_or(att.atttypid = 'pg_catalog.name'::regtype) AS is_na
      FROM pg_attribute AS att
        JOIN pg_class AS tbl ON att.attrelid = tbl.oid
        JOIN pg_namespace AS ns ON ns.oid = tbl.relnamespace
        JOIN pg_stats AS s ON s.schemaname=ns.nspname
          AND s.tablename = tbl.relname AND s.inherited=false AND s.attname=att.attname
        LEFT JOIN pg_class AS toast ON tbl.reltoastrelid = toast.oid
      WHERE att.attnum > 0 AND NOT att.attisdropped
        AND tbl.relkind = 'r'
        AND ns.nspname NOT IN ('pg_catalog', 'information_schema')
      GROUP BY 1,2,3,4,5,6,7,8,9,10
      ORDER BY 2,3
    ) AS s
  ) AS s2
) AS s3
WHERE NOT is_na
ORDER BY 1, 2
"#;

/// Btree index bloat estimate from the same project. Fillfactor defaults to
/// 90 for btree.
const INDEX_BLOAT_SQL: &str = r#"
SELECT nspname AS schemaname, tblname, idxname, (bs*relpages)::numeric AS real_size,
  (bs*(relpages-est_pages_ff))::numeric AS bloat_size,
  CASE WHEN relpages > 0
    THEN 100 * (relpages-est_pages_ff)::float / relpages
    ELSE 0
  END::float AS bloat_ratio
FROM (
  SELECT coalesce(1 +
       ceil(reltuples/floor((bs-pageopqdata-pagehdr)/(4+nulldatahdrwidth)::float)), 0
    ) AS est_pages,
    coalesce(1 +
       ceil(reltuples/floor((bs-pageopqdata-pagehdr)*fillfactor/(100*(4+nulldatahdrwidth)::float))), 0
    ) AS est_pages_ff,
    bs, nspname, table_oid, tblname, idxname, relpages, fillfactor, is_na
  FROM (
    SELECT maxalign, bs, nspname, tblname, idxname, reltuples, relpages, relam, table_oid, fillfactor,
      ( index_tuple_hdr_bm +
          maxalign - CASE
            WHEN index_tuple_hdr_bm%maxalign = 0 THEN maxalign
            ELSE index_tuple_hdr_bm%maxalign
          END
        + nulldatawidth + maxalign - CASE
            WHEN nulldatawidth = 0 THEN 0
            WHEN nulldatawidth::integer%maxalign = 0 THEN maxalign
            ELSE nulldatawidth::integer%maxalign
          END
      )::numeric AS nulldatahdrwidth, pagehdr, pageopqdata, is_na
    FROM (
      SELECT
        i.nspname, i.tblname, i.idxname, i.reltuples, i.relpages, i.relam, a.attrelid AS table_oid,
        current_setting('block_size')::numeric AS bs, fillfactor,
        CASE
          WHEN version() ~ 'mingw32' OR version() ~ '64-bit|x86_64|ppc64|ia64|amd64' THEN 8
          ELSE 4
        END AS maxalign,
        24 AS pagehdr,
        16 AS pageopqdata,
        CASE WHEN max(coalesce(s.null_frac,0)) = 0
          THEN 2
          ELSE 2 + (( 32 + 8 - 1 ) / 8)
        END AS index_tuple_hdr_bm,
        sum( (1-coalesce(s.null_frac, 0)) * coalesce(s.avg_width, 1024)) AS nulldatawidth,
        max( CASE WHEN a.atttypid = 'pg_catalog.name'::regtype THEN 1 ELSE 0 END ) > 0 AS is_na
      FROM pg_attribute AS a
        JOIN (
          SELECT nspname, tbl.relname AS tblname, idx.relname AS idxname, idx.reltuples, idx.relpages, idx.relam,
            indrelid, indexrelid, indkey::smallint[] AS attnum,
            coalesce(substring(
              array_to_string(idx.reloptions, ' ')
               from 'fillfactor=([0-9]+)')::smallint, 90) AS fillfactor
          FROM pg_index
            JOIN pg_class idx ON idx.oid=pg_index.indexrelid
            JOIN pg_class tbl ON tbl.oid=pg_index.indrelid
            JOIN pg_namespace ON pg_namespace.oid = idx.relnamespace
          WHERE pg_index.indisvalid AND tbl.relkind = 'r' AND idx.relpages > 0
            AND nspname NOT IN ('pg_catalog', 'information_schema')
        ) AS i ON a.attrelid = i.indexrelid
        JOIN pg_stats AS s ON s.schemaname = i.nspname
          AND ((s.tablename = i.tblname AND s.attname = pg_catalog.pg_get_indexdef(a.attrelid, a.attnum, TRUE))
          OR   (s.tablename = i.idxname AND s.attname = a.attname))
        JOIN pg_type AS t ON a.atttypid = t.oid
      WHERE a.attnum > 0
      GROUP BY 1, 2, 3, 4, 5, 6, 7, 8, 9
    ) AS s1
  ) AS s2
    JOIN pg_am am ON s2.relam = am.oid WHERE am.amname = 'btree'
) AS sub
WHERE NOT is_na
ORDER BY 1, 2, 3
"#;

/// Constraints enforced through index `$1`, leaving out constraint `$2` (the
/// one the index backs) when given.
const INDEX_DEPENDENTS_SQL: &str = r#"
SELECT
    fcon.conname AS fconname,
    fconrel.relname AS fconrelname,
    fconns.nspname AS fconns,
    fcon.contype::text AS fcontype,
    pg_get_constraintdef(fcon.oid) AS fcondef
FROM pg_constraint fcon
JOIN pg_class fconrel ON fcon.conrelid = fconrel.oid
JOIN pg_namespace fconns ON fcon.connamespace = fconns.oid
WHERE fcon.conindid = $1
  AND ($2::oid IS NULL OR fcon.oid <> $2)
ORDER BY fconns.nspname, fconrel.relname, fcon.conname
"#;

/// Build a connection string with proper URL encoding and SSL mode
pub fn build_connection_string(config: &ConnectionConfig) -> String {
    let username = urlencoding::encode(&config.username);
    let password = urlencoding::encode(&config.password);

    format!(
        "postgres://{}:{}@{}:{}/{}?sslmode={}",
        username, password, config.host, config.port, config.database, config.ssl_mode
    )
}

/// Create a PostgreSQL connection pool for the given configuration
pub async fn create_pool(
    config: &ConnectionConfig,
    pool_settings: &PoolSettings,
) -> Result<PgPool, sqlx::Error> {
    let connection_string = build_connection_string(config);

    let pool = PgPoolOptions::new()
        .max_connections(pool_settings.max_connections)
        .acquire_timeout(Duration::from_secs(pool_settings.acquire_timeout_secs))
        .connect(&connection_string)
        .await?;

    Ok(pool)
}

/// Round-trip latency of a trivial query, in milliseconds
pub async fn ping(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let start = Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(start.elapsed().as_millis() as u64)
}

/// Raw row of either bloat query.
#[derive(Debug, Clone)]
pub struct BloatRow {
    pub schema: String,
    pub table_name: String,
    pub index_name: Option<String>,
    pub real_size: i64,
    pub bloat_size: i64,
    pub reported_ratio: f64,
}

impl BloatRow {
    fn from_row(row: &PgRow, with_index: bool) -> Result<Self, sqlx::Error> {
        Ok(BloatRow {
            schema: row.try_get("schemaname")?,
            table_name: row.try_get("tblname")?,
            index_name: if with_index {
                Some(row.try_get("idxname")?)
            } else {
                None
            },
            real_size: decimal_to_i64(row.try_get("real_size")?),
            bloat_size: decimal_to_i64(row.try_get("bloat_size")?),
            reported_ratio: row.try_get::<Option<f64>, _>("bloat_ratio")?.unwrap_or(0.0),
        })
    }

    pub fn measurement(&self) -> BloatMeasurement {
        let measurement = BloatMeasurement::from_raw(self.real_size, self.bloat_size);
        if measurement.bloat_size_bytes != self.bloat_size {
            log::debug!(
                "Clamped bloat estimate for {}.{}{}: raw {} bytes of {} ({:.1}% reported)",
                self.schema,
                self.table_name,
                self.index_name
                    .as_deref()
                    .map(|i| format!(".{}", i))
                    .unwrap_or_default(),
                self.bloat_size,
                self.real_size,
                self.reported_ratio
            );
        }
        measurement
    }
}

fn decimal_to_i64(value: Option<Decimal>) -> i64 {
    value.and_then(|d| d.round().to_i64()).unwrap_or(0)
}

/// Estimated bloat of every user table
pub async fn get_table_bloat(pool: &PgPool) -> Result<Vec<BloatRow>, sqlx::Error> {
    let rows = sqlx::query(TABLE_BLOAT_SQL).fetch_all(pool).await?;
    rows.iter().map(|row| BloatRow::from_row(row, false)).collect()
}

/// Estimated bloat of every valid btree index on a user table
pub async fn get_index_bloat(pool: &PgPool) -> Result<Vec<BloatRow>, sqlx::Error> {
    let rows = sqlx::query(INDEX_BLOAT_SQL).fetch_all(pool).await?;
    rows.iter().map(|row| BloatRow::from_row(row, true)).collect()
}

/// Look up the oid and `pg_get_indexdef` text of an index
pub async fn get_index_definition(
    pool: &PgPool,
    schema_name: &str,
    index_name: &str,
) -> Result<Option<IndexDefinition>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT idx.oid, pg_get_indexdef(idx.oid) AS indexdef
        FROM pg_class idx
        JOIN pg_namespace ns ON ns.oid = idx.relnamespace
        WHERE idx.relname = $1 AND ns.nspname = $2
          AND idx.relkind IN ('i', 'I')
        "#,
    )
    .bind(index_name)
    .bind(schema_name)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let oid: Oid = row.try_get("oid")?;
    let definition: Option<String> = row.try_get("indexdef")?;

    Ok(definition.map(|definition| IndexDefinition {
        oid: oid.0,
        definition,
    }))
}

/// Look up a constraint by name within a schema
pub async fn get_constraint(
    pool: &PgPool,
    schema_name: &str,
    constraint_name: &str,
) -> Result<Option<ConstraintInfo>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT con.oid, con.contype::text AS contype, con.condeferrable, con.condeferred
        FROM pg_constraint con
        JOIN pg_namespace ns ON ns.oid = con.connamespace
        WHERE con.conname = $1 AND ns.nspname = $2
        ORDER BY con.oid
        LIMIT 1
        "#,
    )
    .bind(constraint_name)
    .bind(schema_name)
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<ConstraintInfo, sqlx::Error> {
        let oid: Oid = row.try_get("oid")?;
        let contype: String = row.try_get("contype")?;
        Ok(ConstraintInfo {
            oid: oid.0,
            kind: ConstraintKind::from_code(&contype),
            deferrable: row.try_get("condeferrable")?,
            initially_deferred: row.try_get("condeferred")?,
        })
    })
    .transpose()
}

/// Constraints, in any schema, enforced through the given index
pub async fn get_index_dependents(
    pool: &PgPool,
    index_oid: ObjectId,
    exclude_constraint: Option<ObjectId>,
) -> Result<Vec<DependentConstraint>, sqlx::Error> {
    let rows = sqlx::query(INDEX_DEPENDENTS_SQL)
        .bind(Oid(index_oid))
        .bind(exclude_constraint.map(Oid))
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|row| -> Result<DependentConstraint, sqlx::Error> {
            let contype: String = row.try_get("fcontype")?;
            Ok(DependentConstraint {
                name: row.try_get("fconname")?,
                table_name: row.try_get("fconrelname")?,
                schema: row.try_get("fconns")?,
                kind: ConstraintKind::from_code(&contype),
                definition: row.try_get("fcondef")?,
            })
        })
        .collect()
}
