use anyhow::Result;
use clap::ArgMatches;

use crate::core::system_monitor::{Probe, SensorProbe};
use crate::error::HealthError;
use crate::ui::print_sample;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let json = matches.get_flag("json");

    let mut probe = SensorProbe::new();
    let sample = probe.probe().map_err(HealthError::from)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sample)?);
    } else {
        print_sample(&sample);
    }
    Ok(())
}
