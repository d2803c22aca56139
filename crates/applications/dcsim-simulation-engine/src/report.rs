//! Text and JSON rendering of analysis results

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use dcsim_core::{Resource, Result, Tick};
use serde::{Deserialize, Serialize};

use crate::analyzer::{Analyzer, EntityOverview, EntitySelector, EntitySeries, WindowSummary};
use crate::simulator::{SimulationRun, SimulationSummary};

/// Everything written to a report file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilizationReport {
    pub generated_at: DateTime<Utc>,
    pub window: Tick,
    pub summary: SimulationSummary,
    pub windows: Vec<WindowSummary>,
    pub overall: Vec<EntityOverview>,
    /// Raw per-tick usage, only when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<EntitySeries>>,
}

impl UtilizationReport {
    pub fn build(run: &SimulationRun, selector: &EntitySelector, window: Tick) -> Result<Self> {
        Self::build_with(run, selector, window, false)
    }

    /// Like `build`, optionally attaching the raw sample series
    pub fn build_with(
        run: &SimulationRun,
        selector: &EntitySelector,
        window: Tick,
        include_samples: bool,
    ) -> Result<Self> {
        let analyzer = Analyzer::new(run);
        let samples = if include_samples {
            Some(analyzer.series(selector)?)
        } else {
            None
        };
        Ok(UtilizationReport {
            generated_at: Utc::now(),
            window,
            summary: run.summary.clone(),
            windows: analyzer.analyze(selector, window)?,
            overall: analyzer.overall(selector)?,
            samples,
        })
    }

    /// `utilization_report_<YYYYmmdd_HHMMSS>.json`
    pub fn file_name(at: DateTime<Local>) -> String {
        format!("utilization_report_{}.json", at.format("%Y%m%d_%H%M%S"))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON into `dir`, creating it if needed
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(Local::now()));
        fs::write(&path, self.to_json()?)?;
        Ok(path)
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

/// One line per (entity, window)
pub fn render_windows(records: &[WindowSummary]) -> String {
    let mut lines = vec![
        format!(
            "{:<32} {:>9} {:>5} {:>11} {:>4} {:>8} {:>8} {:>8} {:>10} {:>10} {:>9} {:>9} {:>8}",
            "Entity", "Kind", "Win", "Ticks", "N", "CPU min", "CPU avg", "CPU max", "RAM avg", "Disk avg",
            "BW avg", "Overload", "A/F/R"
        ),
        "-".repeat(145),
    ];

    for record in records {
        let placements = record
            .placements
            .map(|p| format!("{}/{}/{}", p.admitted, p.fallback, p.rejected))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{:<32} {:>9} {:>5} {:>11} {:>4} {:>8} {:>8} {:>8} {:>10} {:>10} {:>9} {:>8.1}% {:>8}",
            record.entity,
            record.kind.to_string(),
            record.window,
            format!("{}-{}", record.start_tick, record.end_tick),
            record.samples,
            fmt_opt(record.stats.map(|s| s.min.cpu)),
            fmt_opt(record.mean(Resource::Cpu)),
            fmt_opt(record.stats.map(|s| s.max.cpu)),
            fmt_opt(record.mean(Resource::Ram)),
            fmt_opt(record.mean(Resource::Disk)),
            fmt_opt(record.mean(Resource::Bandwidth)),
            record.overload_fraction * 100.0,
            placements,
        ));
    }
    lines.join("\n")
}

/// Whole-run mean usage per entity
pub fn render_overall(overview: &[EntityOverview]) -> String {
    let mut lines = vec![
        format!(
            "{:<32} {:>9} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "Entity", "Kind", "N", "CPU", "RAM", "Disk", "BW", "Overloads"
        ),
        "-".repeat(104),
    ];
    for entry in overview {
        let mean = |r: Resource| fmt_opt(entry.mean.map(|m| m.get(r)));
        lines.push(format!(
            "{:<32} {:>9} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10}",
            entry.entity,
            entry.kind.to_string(),
            entry.samples,
            mean(Resource::Cpu),
            mean(Resource::Ram),
            mean(Resource::Disk),
            mean(Resource::Bandwidth),
            entry.overloaded_ticks,
        ));
    }
    lines.join("\n")
}

pub fn render_summary(summary: &SimulationSummary) -> String {
    let mut lines = vec![
        format!("Datacenter: {}", summary.datacenter),
        format!("  Seed: {}", summary.seed),
        format!("  Ticks: {} x {} time units", summary.total_ticks, summary.tick_size),
    ];
    if let Some(strategy) = &summary.strategy {
        lines.push(format!("  Placement strategy: {}", strategy));
    }
    lines.push(format!("  Entities: {} ({} samples)", summary.entities, summary.samples));
    lines.push(format!("  Overloads: {}  Failures: {}", summary.overloads, summary.failures));
    lines.push(format!(
        "  Placements: {} admitted, {} deferred, {} fallback, {} rejected, {} never placed",
        summary.admitted, summary.deferred, summary.fallbacks, summary.rejected, summary.never_placed
    ));
    lines.push(format!(
        "  Reservations: {} created, {} consumed, {} discarded",
        summary.reservations_created, summary.reservations_consumed, summary.reservations_discarded
    ));
    lines.push(format!("  Completed workloads: {}", summary.completed_workloads));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatacenterConfig;
    use crate::simulator::Simulator;
    use chrono::TimeZone;
    use serde_json::json;

    fn run() -> SimulationRun {
        let config = DatacenterConfig::from_json_value(json!({
            "name": "dc-report",
            "simulation": { "duration": 5, "seed": 3 },
            "nodes": [{
                "name": "Node-1", "cpu": 4, "ram": 1024, "cpu_fluctuation_percent": 10,
                "containers": [{
                    "name": "Container-1", "cpu": 2, "ram": 512,
                    "workloads": [{ "cpu": 1, "ram": 128, "duration": 3, "cpu_fluctuation_percent": 20 }]
                }]
            }]
        }))
        .unwrap();
        Simulator::new(&config, 3).unwrap().run().unwrap()
    }

    #[test]
    fn test_file_name_is_timestamped() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            UtilizationReport::file_name(at),
            "utilization_report_20240309_140507.json"
        );
    }

    #[test]
    fn test_write_json_report() {
        let run = run();
        let report = UtilizationReport::build(&run, &EntitySelector::All, 1).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let path = report.write_json(&dir.path().join("reports")).unwrap();
        assert!(path.exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: UtilizationReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.windows.len(), 3 * 5);
        assert_eq!(parsed.summary.datacenter, "dc-report");
        assert_eq!(parsed.summary.seed, 3);
        assert!(parsed.samples.is_none());
        assert!(!raw.contains("\"samples\": ["));
    }

    #[test]
    fn test_sample_series_are_opt_in() {
        let run = run();
        let report = UtilizationReport::build_with(&run, &EntitySelector::All, 5, true).unwrap();

        let series = report.samples.as_ref().unwrap();
        assert_eq!(series.len(), 3);
        let node = series.iter().find(|s| s.entity == "Node-1").unwrap();
        assert_eq!(node.ticks, vec![0, 1, 2, 3, 4]);
        assert_eq!(node.cpu.len(), 5);
        assert!(node.cpu.iter().all(|&cpu| (0.0..=4.0).contains(&cpu)));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["samples"][0]["entity"], "Node-1");
        assert_eq!(json["samples"][0]["ram"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_tables_render_every_record() {
        let run = run();
        let report = UtilizationReport::build(&run, &EntitySelector::All, 2).unwrap();

        let table = render_windows(&report.windows);
        assert_eq!(table.lines().count(), 2 + report.windows.len());
        assert!(table.contains("Container-1/workload-0"));

        let overall = render_overall(&report.overall);
        assert_eq!(overall.lines().count(), 2 + 3);

        let summary = render_summary(&report.summary);
        assert!(summary.contains("Datacenter: dc-report"));
        assert!(!summary.contains("Placement strategy"));
    }
}
