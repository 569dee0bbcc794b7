//! Postgres store tests against a throwaway container
//!
//! Require Docker. Run with `cargo test -p safer-ingest --test storage_tests -- --ignored`.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use safer_ingest::models::{Address, CrashSummary, InspectionBreakdown};
use safer_ingest::storage::{PgCarrierStore, RecordStore};
use safer_ingest::{CarrierRecord, Identifier};
use serial_test::serial;
use sqlx::{Connection, PgConnection};
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;

struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    url: String,
}

impl TestPostgres {
    async fn start() -> Result<Self> {
        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;
        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        Ok(Self {
            _container: container,
            url: format!("postgresql://postgres:postgres@{}:{}/postgres", host, port),
        })
    }

    async fn store(&self) -> Result<PgCarrierStore> {
        let mut store = PgCarrierStore::connect(&self.url).await?;
        store.migrate().await?;
        Ok(store)
    }

    async fn conn(&self) -> Result<PgConnection> {
        Ok(PgConnection::connect(&self.url).await?)
    }
}

fn carrier(usdot: &str, legal_name: &str, cargo: &[&str]) -> CarrierRecord {
    let mut record = CarrierRecord::default();
    record.metadata.source = "test".to_string();
    record.metadata.usdot_number = Some(Identifier::new(usdot));
    record.metadata.snapshot_date = NaiveDate::from_ymd_opt(2024, 10, 17);
    record.identity.legal_name = Some(legal_name.to_string());
    record.identity.authority_numbers = vec!["MC-1".to_string()];
    record.contact.physical_address = Address {
        street: Some("100 MAIN ST".to_string()),
        city: Some("SPRINGFIELD".to_string()),
        state: Some("IL".to_string()),
        zip_code: Some("62701".to_string()),
        ..Address::default()
    };
    record.operations.cargo_carried = cargo.iter().map(|c| c.to_string()).collect();
    record.status.mcs_150_mileage = Some(1_250_000);
    record.safety.us_inspections.vehicle = InspectionBreakdown {
        inspections: 20,
        out_of_service: 4,
        out_of_service_rate_pct: Some(20.0),
    };
    record.safety.us_crashes = CrashSummary {
        fatal: 0,
        injury: 1,
        tow: 2,
        total: 3,
    };
    record.safety.safety_rating.rating = Some("Satisfactory".to_string());
    record
}

async fn count(conn: &mut PgConnection, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(conn).await.unwrap()
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_upsert_and_existing_identifiers() {
    let pg = TestPostgres::start().await.unwrap();
    let mut store = pg.store().await.unwrap();

    let saved = store
        .bulk_upsert(&[
            carrier("100", "ACME", &["General Freight"]),
            carrier("200", "BETA", &[]),
        ])
        .await
        .unwrap();
    assert_eq!(saved, 2);

    let existing = store.existing_identifiers().await.unwrap();
    assert_eq!(
        existing,
        [Identifier::new("100"), Identifier::new("200")]
            .into_iter()
            .collect::<HashSet<_>>()
    );

    let mut conn = pg.conn().await.unwrap();
    assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM carrier_addresses").await, 4);
    assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM carrier_inspections").await, 4);
    assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM carrier_crashes").await, 4);
    assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM carrier_safety_ratings").await, 2);

    let oos_rate: Option<f64> = sqlx::query_scalar(
        "SELECT vehicle_oos_rate FROM carrier_inspections WHERE usdot_number = 100 AND region = 'US'",
    )
    .fetch_one(&mut conn)
    .await
    .unwrap();
    assert_eq!(oos_rate, Some(20.0));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_upsert_replaces_child_rows() {
    let pg = TestPostgres::start().await.unwrap();
    let mut store = pg.store().await.unwrap();

    store
        .bulk_upsert(&[carrier("100", "ACME", &["General Freight", "Machinery"])])
        .await
        .unwrap();
    store
        .bulk_upsert(&[carrier("100", "ACME RENAMED", &["Chemicals"])])
        .await
        .unwrap();

    let mut conn = pg.conn().await.unwrap();
    let cargo: Vec<String> =
        sqlx::query_scalar("SELECT cargo_type FROM carrier_cargo WHERE usdot_number = 100")
            .fetch_all(&mut conn)
            .await
            .unwrap();
    assert_eq!(cargo, vec!["Chemicals".to_string()]);

    let name: Option<String> =
        sqlx::query_scalar("SELECT legal_name FROM carriers WHERE usdot_number = 100")
            .fetch_one(&mut conn)
            .await
            .unwrap();
    assert_eq!(name.as_deref(), Some("ACME RENAMED"));
    assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM carrier_addresses").await, 2);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_duplicate_identifiers_in_batch_last_wins() {
    let pg = TestPostgres::start().await.unwrap();
    let mut store = pg.store().await.unwrap();

    let saved = store
        .bulk_upsert(&[
            carrier("300", "FIRST", &["Grain"]),
            carrier("300", "SECOND", &["Livestock"]),
        ])
        .await
        .unwrap();
    assert_eq!(saved, 1);

    let mut conn = pg.conn().await.unwrap();
    let name: Option<String> =
        sqlx::query_scalar("SELECT legal_name FROM carriers WHERE usdot_number = 300")
            .fetch_one(&mut conn)
            .await
            .unwrap();
    assert_eq!(name.as_deref(), Some("SECOND"));
    assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM carrier_cargo").await, 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_close_releases_connection() {
    let pg = TestPostgres::start().await.unwrap();
    let store = pg.store().await.unwrap();
    store.close().await.unwrap();
}
