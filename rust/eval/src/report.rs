//! The cumulative plain-text report. Every run appends a timestamp banner,
//! then one block per evaluated configuration. Existing content is never
//! rewritten.

use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use hdidx_error::{ErrorCodes, HdidxError};
use thiserror::Error;

use crate::stats::RecallCurve;

pub const REPORT_FILE_NAME: &str = "report.txt";
const RULE_WIDTH: usize = 64;
// Same layout as C's asctime, e.g. `Tue Jul 28 13:31:06 2015`.
const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to append to report `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to describe configuration: {0}")]
    Description(#[from] serde_json::Error),
}

impl HdidxError for ReportError {
    fn code(&self) -> ErrorCodes {
        match self {
            ReportError::Io { source, .. } => source.code(),
            ReportError::Description(_) => ErrorCodes::Internal,
        }
    }
}

fn rule(c: char) -> String {
    std::iter::repeat(c).take(RULE_WIDTH).collect()
}

pub fn format_banner<Tz>(timestamp: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}\n* {}\n{}\n",
        rule('*'),
        timestamp.format(ASCTIME_FORMAT),
        rule('*')
    )
}

pub fn format_block(description: &str, curve: &RecallCurve) -> String {
    let mut block = format!("{}\n{}\n{}\n", rule('='), description, rule('-'));
    for point in curve.iter() {
        // Writing to a String cannot fail.
        let _ = writeln!(block, "recall@{:<8}{:.4}", point.threshold, point.recall);
    }
    block
}

pub struct Report {
    path: PathBuf,
}

impl Report {
    /// The report of an experiment directory.
    pub fn new(exp_dir: &Path) -> Self {
        Report {
            path: exp_dir.join(REPORT_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    // Opens, appends and closes, so the file holds every block written so
    // far even if a later configuration fails.
    fn append(&self, text: &str) -> Result<(), ReportError> {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(text.as_bytes()))
            .map_err(|source| ReportError::Io {
                path: self.path.display().to_string(),
                source,
            })
    }

    pub fn write_banner<Tz>(&self, timestamp: &DateTime<Tz>) -> Result<(), ReportError>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        self.append(&format_banner(timestamp))
    }

    pub fn write_block(&self, description: &str, curve: &RecallCurve) -> Result<(), ReportError> {
        self.append(&format_block(description, curve))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RecallPoint;
    use chrono::Utc;

    fn curve() -> RecallCurve {
        RecallCurve {
            points: vec![
                RecallPoint {
                    threshold: 1,
                    recall: 1.0 / 3.0,
                },
                RecallPoint {
                    threshold: 10,
                    recall: 2.0 / 3.0,
                },
                RecallPoint {
                    threshold: 100,
                    recall: 1.0,
                },
            ],
        }
    }

    #[test]
    fn test_banner_uses_asctime() {
        let timestamp = Utc.with_ymd_and_hms(2015, 7, 8, 13, 31, 6).unwrap();
        let banner = format_banner(&timestamp);
        let lines: Vec<&str> = banner.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "*".repeat(64));
        assert_eq!(lines[1], "* Wed Jul  8 13:31:06 2015");
        assert_eq!(lines[2], "*".repeat(64));
    }

    #[test]
    fn test_block_layout() {
        let block = format_block(r#"{"indexer":"sh"}"#, &curve());
        let expected = format!(
            "{}\n{{\"indexer\":\"sh\"}}\n{}\n{}",
            "=".repeat(64),
            "-".repeat(64),
            "recall@1       0.3333\nrecall@10      0.6667\nrecall@100     1.0000\n"
        );
        assert_eq!(block, expected);
    }

    #[test]
    fn test_report_only_appends() {
        let dir = tempfile::tempdir().unwrap();
        let report = Report::new(dir.path());
        assert!(!report.exists());
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        report.write_banner(&timestamp).unwrap();
        report.write_block("first", &curve()).unwrap();
        report.write_banner(&timestamp).unwrap();
        report.write_block("second", &RecallCurve::default()).unwrap();

        let content = std::fs::read_to_string(report.path()).unwrap();
        assert!(content.starts_with(&format_banner(&timestamp)));
        assert!(content.ends_with(&format_block("second", &RecallCurve::default())));
        assert_eq!(content.matches("* Tue Jan  2 03:04:05 2024").count(), 2);
        assert_eq!(content.matches("recall@").count(), 3);
    }
}
