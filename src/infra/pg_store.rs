use crate::config::{DatabaseConfig, OperationConfig, TableName};
use crate::model::ProbePoint;
use crate::services::probe_store::{PointFilter, ProbeStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use postgres::types::ToSql;
use postgres::{Config, NoTls, Row};
use tracing::debug;

/// Column names of the stored probe table, as configured under `operation`.
#[derive(Debug, Clone)]
struct StoredColumns {
    vehicle_id: String,
    zone_id: String,
    link_id: String,
    vehicle_class: String,
    velocity: String,
}

/// PostgreSQL-backed store. The `postgres` client is synchronous, so every
/// call runs on the blocking pool with its own short-lived connection.
pub struct PgProbeStore {
    config: Config,
    schema: String,
    insert_table: String,
    naming: TableName,
    columns: StoredColumns,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl PgProbeStore {
    pub fn new(database: &DatabaseConfig, operation: &OperationConfig, naming: TableName) -> Self {
        let mut config = Config::new();
        config
            .host(&database.host)
            .port(database.port)
            .user(&database.user)
            .password(&database.password)
            .dbname(&database.dbname);
        Self {
            config,
            schema: database.schema.clone(),
            insert_table: database.insert_table.clone(),
            naming,
            columns: StoredColumns {
                vehicle_id: operation.vehicle_id_column.clone(),
                zone_id: operation.zone_id_column.clone(),
                link_id: operation.fid_column.clone(),
                vehicle_class: operation.vehicle_class_column.clone(),
                velocity: operation.velocity_column.clone(),
            },
        }
    }

    // direction and velocity are int4 in the probe tables; the casts keep
    // the bound and decoded values f64 on this side.
    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {}.{} (gid, x, y, direction, velocity, dt, status, vehicle_id, vehicle_class, zone_id, fid, ts_insert) \
             VALUES ($1, $2, $3, $4::float8::int4, $5::float8::int4, $6::timestamp, $7, $8, $9, $10, $11, $12::timestamp)",
            quote_ident(&self.schema),
            quote_ident(&self.insert_table),
        )
    }

    fn select_sql(&self, date: NaiveDate, by_class: bool) -> String {
        let c = &self.columns;
        let mut sql = format!(
            "SELECT gid, x, y, direction::float8, {velocity}::float8, dt::timestamp, status, {vehicle_id}, {vehicle_class}, {zone_id}, trip_id, {fid}, ts_insert::timestamp \
             FROM {schema}.{table}",
            velocity = quote_ident(&c.velocity),
            vehicle_id = quote_ident(&c.vehicle_id),
            vehicle_class = quote_ident(&c.vehicle_class),
            zone_id = quote_ident(&c.zone_id),
            fid = quote_ident(&c.link_id),
            schema = quote_ident(&self.schema),
            table = quote_ident(&self.naming.day_table(date)),
        );
        if by_class {
            sql.push_str(&format!(" WHERE {} = $1", quote_ident(&c.vehicle_class)));
        }
        sql.push_str(" ORDER BY dt");
        sql
    }
}

fn point_from_row(row: &Row) -> Result<ProbePoint> {
    Ok(ProbePoint {
        gid: row.try_get(0)?,
        x: row.try_get(1)?,
        y: row.try_get(2)?,
        direction: row.try_get(3)?,
        velocity: row.try_get(4)?,
        timestamp: row.try_get(5)?,
        status: row.try_get(6)?,
        vehicle_id: row.try_get(7)?,
        vehicle_class: row.try_get(8)?,
        zone_id: row.try_get(9)?,
        trip_id: row.try_get(10)?,
        link_id: row.try_get(11)?,
        inserted_at: row.try_get(12)?,
    })
}

#[async_trait]
impl ProbeStore for PgProbeStore {
    async fn insert_points(&self, points: &[ProbePoint]) -> Result<usize> {
        let config = self.config.clone();
        let sql = self.insert_sql();
        let points = points.to_vec();

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut client = config.connect(NoTls).context("database connection failed")?;
            let mut tx = client.transaction()?;
            let statement = tx.prepare(&sql)?;
            for p in &points {
                tx.execute(
                    &statement,
                    &[
                        &p.gid,
                        &p.x,
                        &p.y,
                        &p.direction,
                        &p.velocity,
                        &p.timestamp,
                        &p.status,
                        &p.vehicle_id,
                        &p.vehicle_class,
                        &p.zone_id,
                        &p.link_id,
                        &p.inserted_at,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(points.len())
        })
        .await?
    }

    async fn load_day(&self, date: NaiveDate, filter: &PointFilter) -> Result<Vec<ProbePoint>> {
        let config = self.config.clone();
        let class = filter.vehicle_class.clone();
        let sql = self.select_sql(date, class.is_some());
        let table = self.naming.day_table(date);
        debug!(table = %table, "Loading day table");

        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<Row>> {
            let mut client = config.connect(NoTls).context("database connection failed")?;
            let params: Vec<&(dyn ToSql + Sync)> = match &class {
                Some(c) => vec![c as &(dyn ToSql + Sync)],
                None => Vec::new(),
            };
            let rows = client
                .query(sql.as_str(), &params)
                .with_context(|| format!("query on {table} failed"))?;
            Ok(rows)
        })
        .await??;

        let mut points = Vec::with_capacity(rows.len());
        for row in &rows {
            let point = point_from_row(row)?;
            if filter.matches(&point) {
                points.push(point);
            }
        }
        Ok(points)
    }
}
