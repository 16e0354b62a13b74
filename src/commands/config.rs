use anyhow::Result;
use clap::ArgMatches;
use colored::Colorize;

use crate::core::config::Config;
use crate::core::storage::{StorageOp, WriteBehindQueue};
use crate::ui;

pub fn execute(matches: &ArgMatches, root: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", sub_matches)) => {
            let config = Config::load()?;
            if sub_matches.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }
            println!("{}", "Configuration:".white().bold());
            println!("  {}", Config::get_config_path()?.display().to_string().dimmed());
            for (key, value) in config.settings_entries()? {
                println!("  {:<36} {}", key.cyan(), value);
            }
        }
        Some(("set", sub_matches)) => {
            let key = sub_matches
                .get_one::<String>("key")
                .map(String::as_str)
                .unwrap_or_default();
            let value = sub_matches
                .get_one::<String>("value")
                .map(String::as_str)
                .unwrap_or_default();

            let mut config = Config::load()?;
            config.set(key, value)?;
            config.save()?;

            // Mirror into the settings table.
            let queue = WriteBehindQueue::new(super::open_backend(root)?);
            let entries = config.settings_entries()?;
            let mirrored = super::runtime()?.block_on(async {
                for (key, value) in entries {
                    queue.write(StorageOp::SetSetting { key, value }).await;
                }
                queue.retry_pending().await
            });
            if !mirrored {
                ui::warn(&format!(
                    "{} setting(s) were saved to the config file but not to the state store",
                    queue.pending_len()
                ));
            }

            ui::success(&format!("{} set to {}", key, value));
        }
        _ => {
            println!("Use 'healthmon config --help' for more information.");
        }
    }

    Ok(())
}
