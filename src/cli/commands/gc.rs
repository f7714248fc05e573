//! Report garbage collection command.

use console::style;

use crate::config::Settings;
use crate::store::Store;

/// Clear raw vendor payloads from old completed reports and prune
/// expired rows. Typed findings stay; only the audit raws go.
pub async fn cmd_gc(settings: &Settings, keep_days: u32) -> anyhow::Result<()> {
    let store = Store::new(&settings.database_path())?;
    let outcome = store.run(move |store| store.gc(keep_days)).await?;

    println!(
        "{} Cleared raw payloads from {} report(s)",
        style("✓").green(),
        outcome.raws_cleared
    );
    println!(
        "{} Pruned {} expired report(s)",
        style("✓").green(),
        outcome.rows_pruned
    );

    Ok(())
}
