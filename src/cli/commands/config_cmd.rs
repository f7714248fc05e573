//! Configuration inspection command.

use console::style;

use crate::config::Settings;

/// Print the effective configuration as JSON.
///
/// Secrets never serialise, so the output is safe to paste into a bug
/// report.
pub async fn cmd_config_show(settings: &Settings) -> anyhow::Result<()> {
    match &settings.source_path {
        Some(path) => eprintln!("{} Loaded from {}", style("→").dim(), path.display()),
        None => eprintln!(
            "{} No config file found, showing defaults plus env overrides",
            style("→").dim()
        ),
    }
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}
