//! Postgres carrier store
//!
//! One connection, one transaction per batch. The parent `carriers` row is
//! upserted ("last write wins" on every column); each child table is
//! cleared for the batch's USDOT numbers and re-inserted so a newer snapshot
//! with fewer entries leaves no stale rows behind.
//!
//! Inserts are multi-row `VALUES` lists split to stay under Postgres's
//! 65,535 bind-parameter limit.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use super::{QueryContext, RecordStore, StoreError};
use crate::models::{
    Address, AddressKind, CarrierRecord, CrashSummary, Identifier, InspectionSummary,
    ParsedRecord, Region, SafetyRating,
};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const MAX_BIND_PARAMS: usize = 65_535;

/// Child tables keyed by `usdot_number`, cleared before re-insert
const CHILD_TABLES: [&str; 7] = [
    "carrier_authority_numbers",
    "carrier_addresses",
    "carrier_classifications",
    "carrier_cargo",
    "carrier_inspections",
    "carrier_crashes",
    "carrier_safety_ratings",
];

/// Carrier snapshot store holding a single Postgres connection
pub struct PgCarrierStore {
    conn: PgConnection,
}

/// A batch entry with its numeric key
type Keyed<'r> = (i64, &'r CarrierRecord);

impl PgCarrierStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let conn = PgConnection::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { conn })
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&mut self) -> Result<(), StoreError> {
        MIGRATOR.run(&mut self.conn).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Key each record by its numeric USDOT number, keeping the last record
    /// per key in first-seen position
    fn key_batch(batch: &[CarrierRecord]) -> Vec<Keyed<'_>> {
        let mut keyed: Vec<Keyed<'_>> = Vec::with_capacity(batch.len());
        let mut positions: HashMap<i64, usize> = HashMap::with_capacity(batch.len());

        for record in batch {
            let Some(id) = record.identifier() else {
                warn!("Skipping record without USDOT number");
                continue;
            };
            let Ok(usdot) = id.as_str().parse::<i64>() else {
                warn!(usdot = %id, "Skipping record with non-numeric USDOT number");
                continue;
            };

            match positions.get(&usdot) {
                Some(&position) => keyed[position] = (usdot, record),
                None => {
                    positions.insert(usdot, keyed.len());
                    keyed.push((usdot, record));
                }
            }
        }
        keyed
    }

    async fn upsert_carriers(
        conn: &mut PgConnection,
        records: &[Keyed<'_>],
    ) -> Result<(), StoreError> {
        const COLUMNS: usize = 15;

        for chunk in records.chunks(MAX_BIND_PARAMS / COLUMNS) {
            let mut query_builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO carriers (
                    usdot_number, entity_type, snapshot_date,
                    legal_name, dba_name, duns_number, phone,
                    usdot_status, operating_authority_status, out_of_service_date,
                    mcs_150_form_date, mcs_150_mileage, mcs_150_mileage_year,
                    power_units, drivers, updated_at
                )
                "#,
            );

            query_builder.push_values(chunk, |mut b, (usdot, record)| {
                let status = &record.status;
                b.push_bind(*usdot)
                    .push_bind(record.metadata.entity_type.as_deref())
                    .push_bind(record.metadata.snapshot_date)
                    .push_bind(record.identity.legal_name.as_deref())
                    .push_bind(record.identity.dba_name.as_deref())
                    .push_bind(record.identity.duns_number.as_deref())
                    .push_bind(record.contact.phone.as_deref())
                    .push_bind(status.usdot_status.as_deref())
                    .push_bind(status.operating_authority_status.as_deref())
                    .push_bind(status.out_of_service_date)
                    .push_bind(status.mcs_150_form_date)
                    .push_bind(status.mcs_150_mileage)
                    .push_bind(status.mcs_150_mileage_year)
                    .push_bind(record.operations.power_units)
                    .push_bind(record.operations.drivers)
                    .push("NOW()");
            });

            query_builder.push(
                r#"
                ON CONFLICT (usdot_number) DO UPDATE SET
                    entity_type = EXCLUDED.entity_type,
                    snapshot_date = EXCLUDED.snapshot_date,
                    legal_name = EXCLUDED.legal_name,
                    dba_name = EXCLUDED.dba_name,
                    duns_number = EXCLUDED.duns_number,
                    phone = EXCLUDED.phone,
                    usdot_status = EXCLUDED.usdot_status,
                    operating_authority_status = EXCLUDED.operating_authority_status,
                    out_of_service_date = EXCLUDED.out_of_service_date,
                    mcs_150_form_date = EXCLUDED.mcs_150_form_date,
                    mcs_150_mileage = EXCLUDED.mcs_150_mileage,
                    mcs_150_mileage_year = EXCLUDED.mcs_150_mileage_year,
                    power_units = EXCLUDED.power_units,
                    drivers = EXCLUDED.drivers,
                    updated_at = NOW()
                "#,
            );

            query_builder
                .build()
                .execute(&mut *conn)
                .await
                .context("Failed to upsert carriers")?;
        }
        Ok(())
    }

    async fn clear_children(conn: &mut PgConnection, usdots: &[i64]) -> Result<(), StoreError> {
        for table in CHILD_TABLES {
            let sql = format!("DELETE FROM {table} WHERE usdot_number = ANY($1)");
            let deleted = sqlx::query(&sql)
                .bind(usdots)
                .execute(&mut *conn)
                .await
                .context("Failed to clear child rows")?;
            debug!(table, rows = deleted.rows_affected(), "Cleared child rows");
        }
        Ok(())
    }

    /// Insert `(usdot, value)` rows into a two-column list table
    async fn insert_values(
        conn: &mut PgConnection,
        table: &'static str,
        column: &'static str,
        rows: &[(i64, &str)],
    ) -> Result<(), StoreError> {
        for chunk in rows.chunks(MAX_BIND_PARAMS / 2) {
            let mut query_builder: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO {table} (usdot_number, {column}) "));
            query_builder.push_values(chunk, |mut b, (usdot, value)| {
                b.push_bind(*usdot).push_bind(*value);
            });
            query_builder.push(format!(" ON CONFLICT (usdot_number, {column}) DO NOTHING"));

            query_builder
                .build()
                .execute(&mut *conn)
                .await
                .context("Failed to insert list rows")?;
        }
        Ok(())
    }

    async fn insert_addresses(
        conn: &mut PgConnection,
        rows: &[(i64, AddressKind, &Address)],
    ) -> Result<(), StoreError> {
        for chunk in rows.chunks(MAX_BIND_PARAMS / 7) {
            let mut query_builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO carrier_addresses (usdot_number, address_type, street, city, state, zip_code, country) ",
            );
            query_builder.push_values(chunk, |mut b, (usdot, kind, address)| {
                b.push_bind(*usdot)
                    .push_bind(kind.as_str())
                    .push_bind(address.street.as_deref())
                    .push_bind(address.city.as_deref())
                    .push_bind(address.state.as_deref())
                    .push_bind(address.zip_code.as_deref())
                    .push_bind(address.country.as_str());
            });

            query_builder
                .build()
                .execute(&mut *conn)
                .await
                .context("Failed to insert addresses")?;
        }
        Ok(())
    }

    async fn insert_inspections(
        conn: &mut PgConnection,
        rows: &[(i64, Region, &InspectionSummary)],
    ) -> Result<(), StoreError> {
        for chunk in rows.chunks(MAX_BIND_PARAMS / 16) {
            let mut query_builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO carrier_inspections (
                    usdot_number, region,
                    total_inspections, total_iep_inspections,
                    vehicle_inspections, vehicle_oos, vehicle_oos_rate,
                    driver_inspections, driver_oos, driver_oos_rate,
                    hazmat_inspections, hazmat_oos, hazmat_oos_rate,
                    iep_inspections, iep_oos, iep_oos_rate
                )
                "#,
            );
            query_builder.push_values(chunk, |mut b, (usdot, region, summary)| {
                b.push_bind(*usdot)
                    .push_bind(region.as_str())
                    .push_bind(summary.total_inspections)
                    .push_bind(summary.total_iep_inspections);
                for breakdown in [&summary.vehicle, &summary.driver, &summary.hazmat, &summary.iep] {
                    b.push_bind(breakdown.inspections)
                        .push_bind(breakdown.out_of_service)
                        .push_bind(breakdown.out_of_service_rate_pct);
                }
            });

            query_builder
                .build()
                .execute(&mut *conn)
                .await
                .context("Failed to insert inspections")?;
        }
        Ok(())
    }

    async fn insert_crashes(
        conn: &mut PgConnection,
        rows: &[(i64, Region, CrashSummary)],
    ) -> Result<(), StoreError> {
        for chunk in rows.chunks(MAX_BIND_PARAMS / 6) {
            let mut query_builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO carrier_crashes (usdot_number, region, fatal, injury, tow, total) ",
            );
            query_builder.push_values(chunk, |mut b, (usdot, region, crashes)| {
                b.push_bind(*usdot)
                    .push_bind(region.as_str())
                    .push_bind(crashes.fatal)
                    .push_bind(crashes.injury)
                    .push_bind(crashes.tow)
                    .push_bind(crashes.total);
            });

            query_builder
                .build()
                .execute(&mut *conn)
                .await
                .context("Failed to insert crashes")?;
        }
        Ok(())
    }

    async fn insert_safety_ratings(
        conn: &mut PgConnection,
        rows: &[(i64, &SafetyRating)],
    ) -> Result<(), StoreError> {
        for chunk in rows.chunks(MAX_BIND_PARAMS / 5) {
            let mut query_builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO carrier_safety_ratings (usdot_number, rating, rating_date, review_date, rating_type) ",
            );
            query_builder.push_values(chunk, |mut b, (usdot, rating)| {
                b.push_bind(*usdot)
                    .push_bind(rating.rating.as_deref())
                    .push_bind(rating.rating_date)
                    .push_bind(rating.review_date)
                    .push_bind(rating.rating_type.as_deref());
            });

            query_builder
                .build()
                .execute(&mut *conn)
                .await
                .context("Failed to insert safety ratings")?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgCarrierStore {
    type Record = CarrierRecord;

    async fn existing_identifiers(&mut self) -> Result<HashSet<Identifier>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT usdot_number::text FROM carriers")
            .fetch_all(&mut self.conn)
            .await
            .context("Failed to read persisted USDOT numbers")?;

        Ok(rows.into_iter().map(Identifier::from).collect())
    }

    async fn bulk_upsert(&mut self, batch: &[CarrierRecord]) -> Result<u64, StoreError> {
        let keyed = Self::key_batch(batch);
        if keyed.is_empty() {
            return Ok(0);
        }

        let usdots: Vec<i64> = keyed.iter().map(|(usdot, _)| *usdot).collect();

        let mut authority_rows = Vec::new();
        let mut address_rows = Vec::with_capacity(keyed.len() * 2);
        let mut classification_rows = Vec::new();
        let mut cargo_rows = Vec::new();
        let mut inspection_rows = Vec::with_capacity(keyed.len() * 2);
        let mut crash_rows = Vec::with_capacity(keyed.len() * 2);
        let mut rating_rows = Vec::with_capacity(keyed.len());

        for &(usdot, record) in &keyed {
            authority_rows.extend(
                record.identity.authority_numbers.iter().map(|n| (usdot, n.as_str())),
            );
            address_rows.push((usdot, AddressKind::Physical, &record.contact.physical_address));
            address_rows.push((usdot, AddressKind::Mailing, &record.contact.mailing_address));
            classification_rows.extend(
                record.operations.operation_classifications.iter().map(|c| (usdot, c.as_str())),
            );
            cargo_rows.extend(record.operations.cargo_carried.iter().map(|c| (usdot, c.as_str())));

            let safety = &record.safety;
            inspection_rows.push((usdot, Region::Us, &safety.us_inspections));
            inspection_rows.push((usdot, Region::Canada, &safety.canada_inspections));
            crash_rows.push((usdot, Region::Us, safety.us_crashes));
            crash_rows.push((usdot, Region::Canada, safety.canada_crashes));
            rating_rows.push((usdot, &safety.safety_rating));
        }

        let mut tx = self.conn.begin().await.context("Failed to begin transaction")?;

        Self::upsert_carriers(&mut tx, &keyed).await?;
        Self::clear_children(&mut tx, &usdots).await?;
        Self::insert_values(&mut tx, "carrier_authority_numbers", "authority_number", &authority_rows)
            .await?;
        Self::insert_addresses(&mut tx, &address_rows).await?;
        Self::insert_values(&mut tx, "carrier_classifications", "classification", &classification_rows)
            .await?;
        Self::insert_values(&mut tx, "carrier_cargo", "cargo_type", &cargo_rows).await?;
        Self::insert_inspections(&mut tx, &inspection_rows).await?;
        Self::insert_crashes(&mut tx, &crash_rows).await?;
        Self::insert_safety_ratings(&mut tx, &rating_rows).await?;

        tx.commit().await.context("Failed to commit transaction")?;

        debug!(carriers = keyed.len(), "Batch committed");
        Ok(keyed.len() as u64)
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await.context("Failed to close connection")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(usdot: &str, legal_name: &str) -> CarrierRecord {
        let mut record = CarrierRecord::default();
        record.metadata.usdot_number = Some(Identifier::new(usdot));
        record.identity.legal_name = Some(legal_name.to_string());
        record
    }

    #[test]
    fn test_key_batch_last_record_wins_in_first_position() {
        let batch = vec![
            record("10", "first"),
            record("20", "other"),
            record("10", "second"),
        ];

        let keyed = PgCarrierStore::key_batch(&batch);
        let summary: Vec<(i64, Option<&str>)> = keyed
            .iter()
            .map(|(usdot, r)| (*usdot, r.identity.legal_name.as_deref()))
            .collect();

        assert_eq!(summary, vec![(10, Some("second")), (20, Some("other"))]);
    }

    #[test]
    fn test_key_batch_skips_unusable_identifiers() {
        let batch = vec![record("abc", "bad"), CarrierRecord::default(), record("7", "ok")];
        let keyed = PgCarrierStore::key_batch(&batch);
        assert_eq!(keyed.len(), 1);
        assert_eq!(keyed[0].0, 7);
    }

    #[test]
    fn test_chunk_sizes_respect_bind_limit() {
        for columns in [2, 5, 6, 7, 15, 16] {
            assert!((MAX_BIND_PARAMS / columns) * columns <= MAX_BIND_PARAMS);
        }
    }
}
