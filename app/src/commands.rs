//! Handlers for each CLI subcommand.

use crate::cli::RunArgs;
use crate::state::AppState;
use anyhow::Context;
use leadscrape_core::{ScrapeConfig, SessionId};
use leadscrape_scraper::{
    export_session, ScrapeEvent, SessionHandle, SessionOutcome, SessionStatusReport,
    SessionSummary,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const PRINTER_DRAIN: Duration = Duration::from_millis(250);

pub async fn run(state: &AppState, args: &RunArgs) -> anyhow::Result<()> {
    warn_interrupted(state).await;

    let scraping = args.overlay(&state.config.scraping);
    let config = ScrapeConfig::new(
        args.towns.iter().cloned(),
        args.industries.iter().cloned(),
        scraping.simultaneous_towns,
        scraping.simultaneous_industries,
        scraping.simultaneous_lookups,
        scraping.lookup_enabled,
    )?;

    let handle = state.orchestrator.start(config).await?;
    println!("Session {}", handle.session_id());
    let session_id = handle.session_id().clone();
    let outcome = drive(state, handle, args.pause_on_interrupt).await?;
    report_outcome(&outcome);

    if let Some(dir) = &args.export {
        if matches!(outcome, SessionOutcome::Finished(_)) {
            export(state, &session_id, Some(dir.clone())).await?;
        }
    }
    Ok(())
}

pub async fn resume(
    state: &AppState,
    session_id: &str,
    pause_on_interrupt: bool,
) -> anyhow::Result<()> {
    let session_id = SessionId::new(session_id)?;
    let handle = state.orchestrator.resume(&session_id).await?;
    println!("Resumed session {session_id}");
    let outcome = drive(state, handle, pause_on_interrupt).await?;
    report_outcome(&outcome);
    Ok(())
}

pub async fn status(state: &AppState, session_id: Option<&str>) -> anyhow::Result<()> {
    if let Some(id) = session_id {
        let report = state.orchestrator.status(&SessionId::new(id)?).await?;
        print_status(&report);
        return Ok(());
    }

    let sessions = state.orchestrator.sessions().await?;
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {:<9}  towns {}/{} ({} failed)  businesses {}  created {}",
            session.id,
            session.status.as_str(),
            session.completed_towns + session.failed_towns,
            session.total_towns,
            session.failed_towns,
            session.business_count,
            session.created_at.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

pub async fn export(
    state: &AppState,
    session_id: &SessionId,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let dir = match out.or_else(|| state.config.export.output_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let report = export_session(state.db.pool(), session_id, &dir).await?;
    println!(
        "Wrote {} businesses across {} sheets to {}",
        report.rows,
        report.sheets.len(),
        report.path.display()
    );
    Ok(())
}

pub async fn export_by_id(
    state: &AppState,
    session_id: &str,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let session_id = SessionId::new(session_id)?;
    export(state, &session_id, out.map(Path::to_path_buf)).await
}

pub async fn lookup(state: &AppState, session_id: &str) -> anyhow::Result<()> {
    let session_id = SessionId::new(session_id)?;
    let summary = state.orchestrator.lookup_carriers(&session_id).await?;
    print_summary(&summary);
    Ok(())
}

/// What a Ctrl-C does to the session being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    Pause,
    Stop,
    Ignore,
}

/// Action for the `count`th interrupt. Without `pause_first` the first
/// interrupt stops; with it the first pauses and the second stops.
fn interrupt_action(pause_first: bool, count: u32) -> InterruptAction {
    match (pause_first, count) {
        (true, 1) => InterruptAction::Pause,
        (false, 1) | (true, 2) => InterruptAction::Stop,
        _ => InterruptAction::Ignore,
    }
}

/// Wait for a session while printing progress. Ctrl-C stops the session
/// cooperatively, or pauses it first when `pause_first` is set; records from
/// finished towns are kept either way.
async fn drive(
    state: &AppState,
    handle: SessionHandle,
    pause_first: bool,
) -> anyhow::Result<SessionOutcome> {
    let session_id = handle.session_id().clone();
    let printer = state
        .orchestrator
        .subscribe(&session_id)
        .map(|events| tokio::spawn(print_progress(events)));

    let wait = handle.wait();
    tokio::pin!(wait);
    let mut interrupts = 0;

    let outcome = loop {
        let listening = interrupt_action(pause_first, interrupts + 1) != InterruptAction::Ignore;
        tokio::select! {
            outcome = &mut wait => break outcome?,
            signal = tokio::signal::ctrl_c(), if listening => {
                signal.context("listening for Ctrl-C")?;
                interrupts += 1;
                match interrupt_action(pause_first, interrupts) {
                    InterruptAction::Pause => {
                        info!(session_id = %session_id, "Interrupt received, pausing session; press Ctrl-C again to stop");
                        if let Err(e) = state.orchestrator.pause(&session_id).await {
                            warn!(session_id = %session_id, "Pause request failed: {}", e);
                        }
                    }
                    InterruptAction::Stop => {
                        info!(session_id = %session_id, "Interrupt received, stopping session");
                        if let Err(e) = state.orchestrator.stop(&session_id).await {
                            warn!(session_id = %session_id, "Stop request failed: {}", e);
                        }
                    }
                    InterruptAction::Ignore => {}
                }
            }
        }
    };

    if let Some(mut printer) = printer {
        // Let the printer drain what the session published before it ended.
        if tokio::time::timeout(PRINTER_DRAIN, &mut printer).await.is_err() {
            printer.abort();
        }
    }
    Ok(outcome)
}

async fn print_progress(mut events: tokio::sync::broadcast::Receiver<ScrapeEvent>) {
    loop {
        match events.recv().await {
            Ok(ScrapeEvent::Progress(update)) => println!(
                "[{:>5.1}%] {}/{} towns, {} businesses{}",
                update.percentage,
                update.processed_towns,
                update.total_towns,
                update.business_count,
                update
                    .eta_secs
                    .map(|eta| format!(", about {eta:.0}s left"))
                    .unwrap_or_default(),
            ),
            Ok(ScrapeEvent::Complete(_)) | Err(RecvError::Closed) => break,
            Ok(ScrapeEvent::Log(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Progress printer skipped {} events", skipped);
            }
        }
    }
}

fn report_outcome(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Finished(report) => {
            println!("Session {} {}", report.session_id, report.status.as_str());
            if let Some(error) = &report.error {
                println!("  error: {error}");
            }
            print_summary(&report.summary);
        }
        SessionOutcome::Paused {
            session_id,
            pending_towns,
        } => {
            println!(
                "Session {session_id} paused with {} towns left; resume with `leadscrape resume {session_id}`",
                pending_towns.len()
            );
        }
    }
}

fn print_summary(summary: &SessionSummary) {
    println!(
        "  towns {}/{} completed, {} businesses ({:.2} per town) in {:.0}s",
        summary.completed_towns,
        summary.town_count,
        summary.business_count,
        summary.businesses_per_town,
        summary.duration_secs
    );
    if !summary.failed_towns.is_empty() {
        println!("  failed towns: {}", summary.failed_towns.join(", "));
    }
    if summary.failed_industries > 0 {
        println!("  failed industry searches: {}", summary.failed_industries);
    }
    if summary.lookup_performed {
        println!(
            "  carriers resolved for {} numbers, {} lookups failed",
            summary.resolved_carriers, summary.failed_lookups
        );
    }
}

fn print_status(report: &SessionStatusReport) {
    println!(
        "Session {} ({}{})",
        report.session_id,
        report.status.as_str(),
        if report.live { ", live" } else { "" }
    );
    println!(
        "  towns {}/{} ({} failed), businesses {}",
        report.completed_towns + report.failed_towns,
        report.total_towns,
        report.failed_towns,
        report.business_count
    );
    if let Some(at) = report.last_checkpoint_at {
        println!("  last checkpoint {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &report.error_message {
        println!("  error: {error}");
    }
    for entry in &report.recent_logs {
        println!(
            "  {} {:?} {}",
            entry.at.format("%H:%M:%S"),
            entry.level,
            entry.message
        );
    }
}

async fn warn_interrupted(state: &AppState) {
    match state.orchestrator.interrupted_sessions().await {
        Ok(sessions) => {
            for session in sessions {
                warn!(
                    session_id = %session.id,
                    "Session was interrupted; resume it with `leadscrape resume {}`",
                    session.id
                );
            }
        }
        Err(e) => warn!("Could not list interrupted sessions: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_stops_by_default() {
        assert_eq!(interrupt_action(false, 1), InterruptAction::Stop);
        assert_eq!(interrupt_action(false, 2), InterruptAction::Ignore);
    }

    #[test]
    fn test_interrupt_pauses_then_stops() {
        assert_eq!(interrupt_action(true, 1), InterruptAction::Pause);
        assert_eq!(interrupt_action(true, 2), InterruptAction::Stop);
        assert_eq!(interrupt_action(true, 3), InterruptAction::Ignore);
    }
}
