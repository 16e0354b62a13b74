use anyhow::Result;
use clap::ArgMatches;

use crate::core::system_monitor::trend::MIN_TREND_SAMPLES;
use crate::core::system_monitor::{Probe, SampleStore, SensorProbe, TrendAnalyzer};
use crate::error::HealthError;
use crate::ui::{self, print_report};

/// Probe once, add the sample to the stored history and report on the window.
pub fn execute(matches: &ArgMatches, root: &ArgMatches) -> Result<()> {
    let json = matches.get_flag("json");
    let backend = super::open_backend(root)?;
    let analyzer = TrendAnalyzer::default();

    let store = SampleStore::new();
    store.hydrate(backend.load_samples(analyzer.window())?);

    let sample = SensorProbe::new().probe().map_err(HealthError::from)?;
    let appended = store.append(sample)?;
    if let Err(e) = backend.append_sample(&appended) {
        ui::warn(&format!("Could not store sample: {}", e));
    }

    let window = store.last_n(analyzer.window());
    let report = analyzer
        .analyze(&window)
        .ok_or_else(|| HealthError::other("no samples to analyze"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
        if window.len() < MIN_TREND_SAMPLES {
            ui::dimmed(&format!(
                "Trend predictions need at least {} samples; run `healthmon run` to build history.",
                MIN_TREND_SAMPLES
            ));
        }
    }
    Ok(())
}
