//! Flattened attendance report and its CSV sink.

use crate::timer::{Elapsed, Timer, DATE_FORMAT};
use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column order of the exported CSV.
pub const REPORT_COLUMNS: [&str; 5] = ["name", "date", "on_work", "off_work", "working_hours"];

const FILE_DATE_FORMAT: &str = "%Y%m%d";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report is empty: no punches recorded")]
    Empty,
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One employee-day of attendance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub name: String,
    #[serde(serialize_with = "serialize_date")]
    pub date: NaiveDate,
    pub on_work: Option<Timer>,
    pub off_work: Option<Timer>,
    pub working_hours: Option<Elapsed>,
}

fn serialize_date<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&date.format(DATE_FORMAT))
}

impl ReportRow {
    fn csv_fields(&self) -> [String; 5] {
        let opt = |v: Option<String>| v.unwrap_or_default();
        [
            self.name.clone(),
            self.date.format(DATE_FORMAT).to_string(),
            opt(self.on_work.map(|t| t.to_string())),
            opt(self.off_work.map(|t| t.to_string())),
            opt(self.working_hours.map(|e| e.to_string())),
        ]
    }
}

/// File stem for a report: "20240101" for a single day, "20240101-20240103" for a range.
pub fn report_file_stem(rows: &[ReportRow]) -> Result<String, ReportError> {
    let min = rows.iter().map(|r| r.date).min().ok_or(ReportError::Empty)?;
    let max = rows.iter().map(|r| r.date).max().ok_or(ReportError::Empty)?;

    let min_s = min.format(FILE_DATE_FORMAT).to_string();
    if min == max {
        Ok(min_s)
    } else {
        Ok(format!("{min_s}-{}", max.format(FILE_DATE_FORMAT)))
    }
}

/// Write rows as CSV, header first.
pub fn write_csv<W: Write>(rows: &[ReportRow], mut out: W) -> std::io::Result<()> {
    writeln!(out, "{}", REPORT_COLUMNS.join(","))?;
    for row in rows {
        let line: Vec<String> = row.csv_fields().iter().map(|f| escape_field(f)).collect();
        writeln!(out, "{}", line.join(","))?;
    }
    out.flush()
}

fn escape_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Export `rows` as `{dir}/{stem}.csv` and return the written path.
///
/// The file is staged under a temporary name and renamed into place, so a
/// failed write never leaves a truncated report behind.
pub fn export_csv(rows: &[ReportRow], dir: &Path) -> Result<PathBuf, ReportError> {
    let stem = report_file_stem(rows)?;
    let path = dir.join(format!("{stem}.csv"));
    let staging = dir.join(format!(".{stem}.csv.tmp"));

    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ReportError::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let file = std::fs::File::create(&staging).map_err(io_err(&staging))?;
    if let Err(e) = write_csv(rows, std::io::BufWriter::new(file)) {
        let _ = std::fs::remove_file(&staging);
        return Err(io_err(&staging)(e));
    }
    std::fs::rename(&staging, &path).map_err(io_err(&path))?;

    tracing::info!(path = %path.display(), rows = rows.len(), "report exported");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, day: u32, on: Option<&str>, off: Option<&str>) -> ReportRow {
        let on_work = on.map(|s| s.parse::<Timer>().unwrap());
        let off_work = off.map(|s| s.parse::<Timer>().unwrap());
        ReportRow {
            name: name.into(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            on_work,
            off_work,
            working_hours: on_work.zip(off_work).map(|(a, b)| b.difference(&a)),
        }
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("punchcard-report-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_file_stem_single_day() {
        let rows = vec![row("alice", 1, Some("09:00:00"), None), row("bob", 1, None, None)];
        assert_eq!(report_file_stem(&rows).unwrap(), "20240101");
    }

    #[test]
    fn test_file_stem_range() {
        let rows = vec![
            row("alice", 3, Some("09:00:00"), None),
            row("bob", 1, Some("09:00:00"), None),
            row("bob", 2, Some("09:00:00"), None),
        ];
        assert_eq!(report_file_stem(&rows).unwrap(), "20240101-20240103");
    }

    #[test]
    fn test_file_stem_empty() {
        assert!(matches!(report_file_stem(&[]), Err(ReportError::Empty)));
    }

    #[test]
    fn test_write_csv() {
        let rows = vec![
            row("alice", 1, Some("09:00:00"), Some("17:30:00")),
            row("bob", 1, Some("10:00:00"), None),
        ];
        let mut buf = Vec::new();
        write_csv(&rows, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "name,date,on_work,off_work,working_hours\n\
             alice,2024/01/01,09:00:00,17:30:00,08:30:00\n\
             bob,2024/01/01,10:00:00,,\n"
        );
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_export_csv_writes_named_file() {
        let dir = scratch_dir();
        let rows = vec![
            row("alice", 1, Some("09:00:00"), Some("17:00:00")),
            row("alice", 3, Some("09:10:00"), None),
        ];
        let path = export_csv(&rows, &dir).unwrap();
        assert_eq!(path, dir.join("20240101-20240103.csv"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!dir.join(".20240101-20240103.csv.tmp").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_export_empty_writes_nothing() {
        let dir = scratch_dir();
        assert!(matches!(export_csv(&[], &dir), Err(ReportError::Empty)));
        assert!(!dir.exists());
    }

    #[test]
    fn test_row_serializes_dates_with_slashes() {
        let r = row("alice", 2, Some("09:00:00"), None);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["date"], "2024/01/02");
        assert_eq!(json["on_work"], "09:00:00");
        assert!(json["off_work"].is_null());
        assert!(json["working_hours"].is_null());
    }
}
