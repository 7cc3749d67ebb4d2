use leadscrape_browser::ChromiumLauncher;
use leadscrape_core::{BrowserConfig, LookupConfig, ScrapeConfig, ScrapingConfig, SessionStatus};
use leadscrape_db::{businesses, Database};
use leadscrape_lookup::{backend_from_config, MemoryCache, ProviderLookupService, RateLimiter};
use leadscrape_scraper::{write_workbook, ScrapeEvent, ScrapingOrchestrator};
use std::sync::Arc;

#[tokio::test]
#[ignore = "Requires Chrome browser - run with --ignored"]
async fn test_full_session_flow() {
    let db = Database::new(":memory:").await.expect("create db");
    db.run_migrations().await.expect("run migrations");

    let lookup_config = LookupConfig::default();
    let backend = backend_from_config(&lookup_config).expect("carrier backend");
    let lookup = ProviderLookupService::new(
        Arc::from(backend),
        Arc::new(MemoryCache::new()),
        Arc::new(RateLimiter::from_config(&lookup_config)),
        lookup_config.country_code.clone(),
    );
    let launcher = ChromiumLauncher::new(BrowserConfig::default()).expect("launcher");

    let orchestrator = ScrapingOrchestrator::new(
        db.pool().clone(),
        Arc::new(launcher),
        Arc::new(lookup),
        ScrapingConfig::default(),
    );

    let config = ScrapeConfig::new(["Zamalek"], ["Pharmacy"], 1, 1, 1, true).expect("config");
    let handle = orchestrator.start(config).await.expect("start session");
    let session_id = handle.session_id().clone();

    let (outcome, events) = handle.wait_with_events().await.expect("session finished");
    let report = outcome.into_report().expect("session ran to the end");

    assert_eq!(report.session_id, session_id);
    assert!(matches!(
        report.status,
        SessionStatus::Completed | SessionStatus::Failed
    ));
    assert!(matches!(events.last(), Some(ScrapeEvent::Complete(_))));

    let stored = businesses::get_businesses(db.pool(), &session_id)
        .await
        .expect("stored businesses");
    assert_eq!(stored.len(), report.businesses.len());

    let dir = tempfile::tempdir().expect("temp dir");
    let export = write_workbook(
        &dir.path().join("session.xlsx"),
        &session_id,
        &stored,
        Some(&report.summary),
    )
    .expect("export");
    assert_eq!(export.rows, stored.len());

    println!(
        "Session {} finished as {} with {} businesses",
        session_id,
        report.status.as_str(),
        stored.len()
    );
}
