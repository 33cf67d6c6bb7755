//! Run metadata and the end-of-run report card.
//!
//! A [`SuiteReport`] aggregates the [`TestRecord`] of every check that ran. It renders
//! as the operator-facing text summary, and exports to JSON (archived per device) and
//! CSV (one row per subcheck, for spreadsheets on the line).

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::checks::TestRecord;
use crate::error::FactoryResult;

/// Width of the closing rule under the totals line.
const RULE_WIDTH: usize = 40;

/// Who ran what against which device, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub operator: String,
    pub host: String,
    /// Flash id reported by `GetDeviceInfo`
    pub device_id: u64,
    pub started_at: DateTime<Local>,
}

impl RunMetadata {
    /// Captures the host name and the current time.
    pub fn new(operator: impl Into<String>, device_id: u64) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            operator: operator.into(),
            host,
            device_id,
            started_at: Local::now(),
        }
    }

    /// Flash id as lowercase hex.
    pub fn device_id_hex(&self) -> String {
        format!("{:x}", self.device_id)
    }

    pub fn render(&self) -> Vec<String> {
        vec![
            format!("Operator: {}", self.operator),
            format!("Host: {}", self.host),
            format!("Date: {}", self.started_at.format("%Y/%m/%d %H:%M:%S")),
            format!("Device flash ID: {}", self.device_id_hex()),
        ]
    }
}

/// Aggregate results of one suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub metadata: RunMetadata,
    pub tests: Vec<TestRecord>,
    /// The run was cut short; `tests` holds only the checks that completed.
    pub interrupted: bool,
    pub finished_at: DateTime<Local>,
}

impl SuiteReport {
    pub fn new(metadata: RunMetadata) -> Self {
        Self {
            metadata,
            tests: Vec::new(),
            interrupted: false,
            finished_at: Local::now(),
        }
    }

    pub fn add_test(&mut self, record: TestRecord) {
        self.tests.push(record);
    }

    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub fn mark_completed(&mut self) {
        self.finished_at = Local::now();
    }

    pub fn total_passed(&self) -> usize {
        self.tests.iter().map(|t| t.passed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.tests.iter().map(|t| t.failed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.tests.iter().map(|t| t.skipped).sum()
    }

    /// `true` iff no subcheck failed. Skips never fail the suite.
    pub fn success(&self) -> bool {
        self.total_failed() == 0
    }

    /// "P tests passed, F tests failed[, S tests skipped]."
    pub fn totals_line(&self) -> String {
        let mut line = format!(
            "{} tests passed, {} tests failed",
            self.total_passed(),
            self.total_failed()
        );
        let skipped = self.total_skipped();
        if skipped > 0 {
            line.push_str(&format!(", {skipped} tests skipped"));
        }
        line.push('.');
        line
    }

    /// Operator-facing report card.
    pub fn render_text(&self) -> Vec<String> {
        let mut lines = vec![
            String::new(),
            "============".to_string(),
            "Test Summary".to_string(),
            "============".to_string(),
        ];
        lines.extend(self.metadata.render());

        for test in &self.tests {
            lines.push(String::new());
            lines.push(test.name.clone());
            for outcome in &test.outcomes {
                lines.push(format!("  {} | {}", outcome.outcome, outcome.name));
            }
        }

        lines.push(String::new());
        if self.interrupted {
            lines.push("Run interrupted; results are partial.".to_string());
        }
        lines.push(self.totals_line());
        lines.push("=".repeat(RULE_WIDTH));
        lines
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One row per subcheck.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("DeviceID,Test,Subcheck,Outcome,Samples,Mean,Detail\n");

        for test in &self.tests {
            for outcome in &test.outcomes {
                let (count, mean) = outcome
                    .samples
                    .map(|s| (s.count.to_string(), format!("{:.2}", s.mean)))
                    .unwrap_or_default();
                let detail = outcome.detail.as_deref().map(escape_csv_field).unwrap_or_default();

                csv.push_str(&format!(
                    "{},{},{},{},{},{},{}\n",
                    self.metadata.device_id_hex(),
                    escape_csv_field(&test.name),
                    escape_csv_field(&outcome.name),
                    outcome.outcome,
                    count,
                    mean,
                    detail
                ));
            }
        }

        csv
    }

    /// File name used by [`SuiteReport::write_json`].
    pub fn file_name(&self) -> String {
        format!(
            "factory-report-{}-{}.json",
            self.metadata.started_at.format("%Y%m%d%H%M%S"),
            self.metadata.device_id_hex()
        )
    }

    /// Writes the JSON report into `dir`, creating it if needed.
    pub fn write_json(&self, dir: &Path) -> FactoryResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        self.write_json_to(&path)?;
        Ok(path)
    }

    /// Writes the JSON report to exactly `path`.
    pub fn write_json_to(&self, path: &Path) -> FactoryResult<()> {
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::OutcomeRecord;
    use crate::sampling::SampleSummary;

    fn metadata() -> RunMetadata {
        RunMetadata {
            operator: "tester".to_string(),
            host: "bench-3".to_string(),
            device_id: 0xE660_5838_3B47_9C2A,
            started_at: Local::now(),
        }
    }

    fn sample_report() -> SuiteReport {
        let mut led = TestRecord::new("LED", Vec::new());
        led.push(OutcomeRecord::pass("led_white"));
        led.push(OutcomeRecord::fail("led_red", "operator did not confirm colour"));

        let mut bme = TestRecord::new("BME688", Vec::new());
        bme.push(OutcomeRecord::skip("bme688_gas_resistance_poor", "declined by operator"));
        bme.push(
            OutcomeRecord::pass("bme688_temperature_hot").with_samples(Some(SampleSummary {
                count: 6,
                min: 24.0,
                max: 29.5,
                mean: 28.6,
            })),
        );

        let mut report = SuiteReport::new(metadata());
        report.add_test(led);
        report.add_test(bme);
        report
    }

    #[test]
    fn test_totals() {
        let report = sample_report();
        assert_eq!(report.total_passed(), 2);
        assert_eq!(report.total_failed(), 1);
        assert_eq!(report.total_skipped(), 1);
        assert!(!report.success());
        assert_eq!(
            report.totals_line(),
            "2 tests passed, 1 tests failed, 1 tests skipped."
        );
    }

    #[test]
    fn test_totals_line_omits_zero_skips() {
        let mut record = TestRecord::new("LED", Vec::new());
        record.push(OutcomeRecord::pass("led_white"));
        let mut report = SuiteReport::new(metadata());
        report.add_test(record);
        assert!(report.success());
        assert_eq!(report.totals_line(), "1 tests passed, 0 tests failed.");
    }

    #[test]
    fn test_render_text() {
        let lines = sample_report().render_text();
        assert!(lines.contains(&"Test Summary".to_string()));
        assert!(lines.contains(&"Device flash ID: e66058383b479c2a".to_string()));
        assert!(lines.contains(&"  FAIL | led_red".to_string()));
        assert!(lines.contains(&"  SKIP | bme688_gas_resistance_poor".to_string()));
        assert_eq!(lines.last().map(String::len), Some(40));
        assert!(!lines.iter().any(|l| l.contains("interrupted")));
    }

    #[test]
    fn test_interrupted_report_is_flagged() {
        let mut report = sample_report();
        report.mark_interrupted();
        assert!(report
            .render_text()
            .contains(&"Run interrupted; results are partial.".to_string()));
    }

    #[test]
    fn test_csv_export() {
        let csv = sample_report().to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "DeviceID,Test,Subcheck,Outcome,Samples,Mean,Detail");
        assert_eq!(
            lines[2],
            "e66058383b479c2a,LED,led_red,FAIL,,,operator did not confirm colour"
        );
        assert_eq!(
            lines[4],
            "e66058383b479c2a,BME688,bme688_temperature_hot,PASS,6,28.60,"
        );
    }

    #[test]
    fn test_escape_csv_field() {
        assert_eq!(escape_csv_field("plain"), "plain");
        assert_eq!(escape_csv_field("a,b"), "\"a,b\"");
        assert_eq!(escape_csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_json_write() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample_report();
        let path = report.write_json(&dir.path().join("reports")).unwrap();

        assert!(path.file_name().unwrap().to_string_lossy().ends_with("-e66058383b479c2a.json"));
        let parsed: SuiteReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.tests.len(), 2);
        assert_eq!(parsed.tests[1].outcomes[1].samples.unwrap().count, 6);
        assert_eq!(parsed.metadata.device_id, report.metadata.device_id);
    }
}
