//! Cache invalidation command.

use console::style;

use crate::config::Settings;
use crate::models::AnalysisKind;
use crate::store::Store;

/// Mark cached reports expired so the next submission rebuilds them.
pub async fn cmd_invalidate(
    settings: &Settings,
    fingerprint: Option<&str>,
    kind: Option<&str>,
    pattern: Option<&str>,
) -> anyhow::Result<()> {
    let store = Store::new(&settings.database_path())?;

    let invalidated = match (fingerprint, kind, pattern) {
        (Some(fingerprint), None, None) => {
            let fingerprint = fingerprint.to_string();
            store
                .run(move |store| store.invalidate_fingerprint(&fingerprint))
                .await?
        }
        (None, Some(kind), Some(pattern)) => {
            let kind = AnalysisKind::from_str(kind)
                .ok_or_else(|| anyhow::anyhow!("Unknown analysis kind: {}", kind))?;
            let pattern = pattern.to_string();
            store
                .run(move |store| store.invalidate_matching(kind, &pattern))
                .await?
        }
        _ => anyhow::bail!("Pass either --fingerprint, or both --kind and --pattern"),
    };

    if invalidated == 0 {
        println!("{} No matching reports", style("!").yellow());
    } else {
        println!(
            "{} Invalidated {} report(s)",
            style("✓").green(),
            invalidated
        );
    }

    Ok(())
}
