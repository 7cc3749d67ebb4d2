//! Spreadsheet export of a session's businesses.
//!
//! The workbook opens with a summary sheet, followed by one sheet per
//! resolved carrier in name order. Records without a resolved carrier go to
//! a trailing `Unresolved` sheet so nothing the session found is left out.

use crate::error::{Result, ScrapeError};
use crate::events::SessionSummary;
use leadscrape_core::{BusinessRecord, Carrier, SessionId};
use leadscrape_db::{businesses, sessions};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use sqlx::{Pool, Sqlite};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Excel's sheet name length limit.
const MAX_SHEET_NAME_LEN: usize = 31;

/// Excel's hyperlink length limit.
const MAX_URL_LEN: usize = 2079;

const SUMMARY_SHEET: &str = "Summary";
const UNRESOLVED_SHEET: &str = "Unresolved";

const COLUMNS: [(&str, f64); 8] = [
    ("Name", 36.0),
    ("Phone", 18.0),
    ("Address", 40.0),
    ("Category", 22.0),
    ("Town", 16.0),
    ("Industry", 18.0),
    ("Carrier", 14.0),
    ("Map", 12.0),
];

/// What an export wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub path: PathBuf,
    /// Sheet names in workbook order
    pub sheets: Vec<String>,
    /// Business rows written across all sheets
    pub rows: usize,
}

/// File name used when the caller gives only a directory.
pub fn default_file_name(session_id: &SessionId) -> String {
    let short: String = session_id.as_str().chars().take(8).collect();
    format!("leadscrape-{short}.xlsx")
}

/// Load a session from storage and write its workbook into `output_dir`.
pub async fn export_session(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    output_dir: &Path,
) -> Result<ExportReport> {
    let record = sessions::get_session(pool, session_id)
        .await?
        .ok_or_else(|| ScrapeError::SessionNotFound(session_id.clone()))?;
    let records = businesses::get_businesses(pool, session_id).await?;
    let summary = record.summary_as::<SessionSummary>()?;

    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(default_file_name(session_id));
    let session_id = session_id.clone();

    tokio::task::spawn_blocking(move || {
        write_workbook(&path, &session_id, &records, summary.as_ref())
    })
    .await
    .map_err(|e| ScrapeError::Task(e.to_string()))?
}

/// Write the workbook for `records` to `path`.
pub fn write_workbook(
    path: &Path,
    session_id: &SessionId,
    records: &[BusinessRecord],
    summary: Option<&SessionSummary>,
) -> Result<ExportReport> {
    let formats = Formats::new();

    let mut by_carrier: BTreeMap<&str, Vec<&BusinessRecord>> = BTreeMap::new();
    let mut unresolved = Vec::new();
    for record in records {
        match &record.carrier {
            Carrier::Named(name) => by_carrier.entry(name.as_str()).or_default().push(record),
            Carrier::Unknown | Carrier::Unresolved => unresolved.push(record),
        }
    }

    let mut workbook = Workbook::new();
    let mut sheets = vec![SUMMARY_SHEET.to_string()];
    write_summary_sheet(
        workbook.add_worksheet().set_name(SUMMARY_SHEET)?,
        &formats,
        session_id,
        records.len(),
        &by_carrier,
        unresolved.len(),
        summary,
    )?;

    let mut seen: HashSet<String> = [SUMMARY_SHEET, UNRESOLVED_SHEET]
        .iter()
        .map(|name| name.to_lowercase())
        .collect();
    let mut rows = 0;
    for (carrier, carrier_records) in &by_carrier {
        let name = unique_sheet_name(carrier, &mut seen);
        write_records_sheet(
            workbook.add_worksheet().set_name(&name)?,
            &formats,
            carrier_records,
        )?;
        rows += carrier_records.len();
        sheets.push(name);
    }
    if !unresolved.is_empty() {
        write_records_sheet(
            workbook.add_worksheet().set_name(UNRESOLVED_SHEET)?,
            &formats,
            &unresolved,
        )?;
        rows += unresolved.len();
        sheets.push(UNRESOLVED_SHEET.to_string());
    }

    workbook.save(path)?;
    tracing::info!(
        session_id = %session_id,
        "Exported {} businesses to {} ({} sheets)",
        rows,
        path.display(),
        sheets.len()
    );

    Ok(ExportReport {
        path: path.to_path_buf(),
        sheets,
        rows,
    })
}

struct Formats {
    header: Format,
    cell: Format,
    label: Format,
    number: Format,
}

impl Formats {
    fn new() -> Self {
        Self {
            header: Format::new()
                .set_bold()
                .set_background_color(Color::RGB(0x00D9_E1F2))
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Center),
            cell: Format::new().set_border(FormatBorder::Thin),
            label: Format::new().set_bold(),
            number: Format::new().set_num_format("0.00"),
        }
    }
}

fn write_summary_sheet(
    sheet: &mut Worksheet,
    formats: &Formats,
    session_id: &SessionId,
    record_count: usize,
    by_carrier: &BTreeMap<&str, Vec<&BusinessRecord>>,
    unresolved: usize,
    summary: Option<&SessionSummary>,
) -> std::result::Result<(), XlsxError> {
    sheet.set_column_width(0, 26)?;
    sheet.set_column_width(1, 40)?;

    let mut row = 0;
    sheet.write_string_with_format(row, 0, "Session", &formats.label)?;
    sheet.write_string(row, 1, session_id.as_str())?;
    row += 1;

    let mut put = |label: &str, value: f64, format: Option<&Format>| {
        sheet.write_string_with_format(row, 0, label, &formats.label)?;
        match format {
            Some(format) => sheet.write_number_with_format(row, 1, value, format)?,
            None => sheet.write_number(row, 1, value)?,
        };
        row += 1;
        Ok::<(), XlsxError>(())
    };

    put("Businesses", count_value(record_count), None)?;
    if let Some(summary) = summary {
        put("Towns", f64::from(summary.town_count), None)?;
        put("Completed towns", f64::from(summary.completed_towns), None)?;
        put("Failed towns", count_value(summary.failed_towns.len()), None)?;
        put("Duration (s)", summary.duration_secs, Some(&formats.number))?;
        put(
            "Businesses per town",
            summary.businesses_per_town,
            Some(&formats.number),
        )?;
        put("Failed industries", count_value(summary.failed_industries), None)?;
        put("Failed lookups", count_value(summary.failed_lookups), None)?;
    }

    if let Some(failed) = summary.filter(|s| !s.failed_towns.is_empty()) {
        sheet.write_string_with_format(row, 0, "Failed town list", &formats.label)?;
        sheet.write_string(row, 1, failed.failed_towns.join(", "))?;
        row += 1;
    }

    row += 1;
    sheet.write_string_with_format(row, 0, "Carrier", &formats.header)?;
    sheet.write_string_with_format(row, 1, "Businesses", &formats.header)?;
    for (carrier, records) in by_carrier {
        row += 1;
        sheet.write_string_with_format(row, 0, *carrier, &formats.cell)?;
        sheet.write_number_with_format(row, 1, count_value(records.len()), &formats.cell)?;
    }
    if unresolved > 0 {
        row += 1;
        sheet.write_string_with_format(row, 0, UNRESOLVED_SHEET, &formats.cell)?;
        sheet.write_number_with_format(row, 1, count_value(unresolved), &formats.cell)?;
    }
    Ok(())
}

fn write_records_sheet(
    sheet: &mut Worksheet,
    formats: &Formats,
    records: &[&BusinessRecord],
) -> std::result::Result<(), XlsxError> {
    for (col, (title, width)) in (0u16..).zip(COLUMNS) {
        sheet.set_column_width(col, width)?;
        sheet.write_string_with_format(0, col, title, &formats.header)?;
    }
    sheet.set_freeze_panes(1, 0)?;

    for (row, record) in (1u32..).zip(records) {
        let text_cells = [
            Some(record.name.as_str()),
            record.phone.as_deref(),
            record.address.as_deref(),
            record.category.as_deref(),
            Some(record.town.as_str()),
            Some(record.industry.as_str()),
            Some(record.carrier.label()),
        ];
        for (col, value) in (0u16..).zip(text_cells) {
            sheet.write_string_with_format(row, col, value.unwrap_or_default(), &formats.cell)?;
        }

        match record.map_url.as_deref() {
            Some(url) if is_linkable(url) => {
                sheet.write_url_with_text(row, 7, url, "Open map")?;
            }
            Some(url) => {
                sheet.write_string_with_format(row, 7, url, &formats.cell)?;
            }
            None => {
                sheet.write_blank(row, 7, &formats.cell)?;
            }
        }
    }

    let last_row = u32::try_from(records.len()).unwrap_or(u32::MAX);
    sheet.autofilter(0, 0, last_row, 7)?;
    Ok(())
}

fn is_linkable(url: &str) -> bool {
    (url.starts_with("https://") || url.starts_with("http://")) && url.len() <= MAX_URL_LEN
}

/// Make a carrier name usable as a sheet name: Excel forbids `[]:*?/\`,
/// leading or trailing apostrophes and names over 31 characters.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('\'').trim();
    let truncated: String = trimmed.chars().take(MAX_SHEET_NAME_LEN).collect();
    let truncated = truncated.trim_end().to_string();
    if truncated.is_empty() {
        "Carrier".to_string()
    } else {
        truncated
    }
}

/// Sanitize `name` and add a numeric suffix until it is unique among `seen`,
/// comparing without case as Excel does.
fn unique_sheet_name(name: &str, seen: &mut HashSet<String>) -> String {
    let base = sanitize_sheet_name(name);
    if seen.insert(base.to_lowercase()) {
        return base;
    }

    let mut n = 2;
    loop {
        let suffix = format!(" ({n})");
        let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
        let stem: String = base.chars().take(keep).collect();
        let candidate = format!("{}{}", stem.trim_end(), suffix);
        if seen.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

#[allow(clippy::cast_precision_loss)]
fn count_value(count: usize) -> f64 {
    count as f64
}
