use leadscrape_core::{BusinessRecord, Carrier, ScrapeConfig, SessionId};
use leadscrape_db::{businesses, sessions, Database};
use leadscrape_scraper::{export_session, write_workbook, ScrapeError, SessionSummary};
use std::collections::HashMap;

fn record(name: &str, phone: Option<&str>, carrier: Carrier) -> BusinessRecord {
    let mut record = BusinessRecord::new(name, "Alpha", "Pharmacy");
    record.phone = phone.map(str::to_string);
    record.map_url = Some(format!("https://maps.example.com/place/{name}"));
    record.carrier = carrier;
    record
}

#[test]
fn test_workbook_groups_records_by_carrier() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("out.xlsx");
    let id = SessionId::generate();

    let records = vec![
        record("Nile Pharmacy", Some("01112345678"), Carrier::Named("Etisalat".into())),
        record("Delta Cafe", Some("01012345678"), Carrier::Named("Vodafone".into())),
        record("Giza Books", Some("01198765432"), Carrier::Named("Etisalat".into())),
        record("No Phone Bakery", None, Carrier::Unknown),
        record("Pending Shop", Some("0229999999"), Carrier::Unresolved),
    ];
    let summary = SessionSummary {
        town_count: 1,
        completed_towns: 1,
        business_count: records.len(),
        ..SessionSummary::default()
    };

    let report = write_workbook(&path, &id, &records, Some(&summary)).expect("write workbook");

    assert!(path.exists());
    assert_eq!(report.path, path);
    assert_eq!(report.sheets, vec!["Summary", "Etisalat", "Vodafone", "Unresolved"]);
    assert_eq!(report.rows, 5);
}

#[test]
fn test_workbook_without_unresolved_records() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("named.xlsx");

    let records = vec![
        record("A", Some("0111"), Carrier::Named("Orange".into())),
        record("B", Some("0122"), Carrier::Named("orange".into())),
        record("C", Some("0100"), Carrier::Named("We/Telecom".into())),
    ];

    let report =
        write_workbook(&path, &SessionId::generate(), &records, None).expect("write workbook");

    // Names are deduplicated without case and cleaned of forbidden characters.
    assert_eq!(report.sheets, vec!["Summary", "Orange", "We_Telecom", "orange (2)"]);
    assert_eq!(report.rows, 3);
}

#[test]
fn test_empty_session_still_writes_summary() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("empty.xlsx");

    let report = write_workbook(&path, &SessionId::generate(), &[], None).expect("write workbook");

    assert!(path.exists());
    assert_eq!(report.sheets, vec!["Summary"]);
    assert_eq!(report.rows, 0);
}

#[tokio::test]
async fn test_export_session_reads_stored_records() {
    let db = Database::new(":memory:").await.expect("create db");
    db.run_migrations().await.expect("run migrations");

    let id = SessionId::generate();
    let config = ScrapeConfig::new(["Alpha"], ["Pharmacy"], 1, 1, 1, true).expect("config");
    sessions::create_session(db.pool(), &id, &config)
        .await
        .expect("create session");

    let stored = vec![
        record("Nile Pharmacy", Some("01112345678"), Carrier::Unresolved),
        record("Delta Cafe", Some("01012345678"), Carrier::Unresolved),
        record("No Phone Bakery", None, Carrier::Unresolved),
    ];
    businesses::insert_businesses(db.pool(), &id, &stored)
        .await
        .expect("insert");

    let carriers = HashMap::from([
        ("01112345678".to_string(), Carrier::Named("Etisalat".into())),
        ("01012345678".to_string(), Carrier::Named("Vodafone".into())),
    ]);
    businesses::apply_carriers(db.pool(), &id, &carriers)
        .await
        .expect("apply carriers");

    let dir = tempfile::tempdir().expect("temp dir");
    let out = dir.path().join("nested").join("exports");
    let report = export_session(db.pool(), &id, &out).await.expect("export");

    assert!(report.path.starts_with(&out));
    assert!(report.path.exists());
    assert_eq!(report.sheets, vec!["Summary", "Etisalat", "Vodafone", "Unresolved"]);
    assert_eq!(report.rows, 3);
}

#[tokio::test]
async fn test_export_unknown_session() {
    let db = Database::new(":memory:").await.expect("create db");
    db.run_migrations().await.expect("run migrations");
    let dir = tempfile::tempdir().expect("temp dir");

    let result = export_session(db.pool(), &SessionId::generate(), dir.path()).await;

    assert!(matches!(result, Err(ScrapeError::SessionNotFound(_))));
}
