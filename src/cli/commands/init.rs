//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::store::Store;

/// Create the data directory, blob root and database schema.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    Store::new(&settings.database_path())?;

    println!(
        "  {} Database ready at {}",
        style("✓").green(),
        settings.database_path().display()
    );
    println!(
        "{} Initialized RenoGuard in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
