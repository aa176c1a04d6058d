use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;

use Satchel::{restore_into, Database, PluginRegistry, RestoreTarget, SatchelConfig};

pub fn exec(path: PathBuf, from: PathBuf, into_course: Option<i64>, json: bool) -> Result<()> {
    let cfg = SatchelConfig::from_env();
    let db = Database::open(&path, &cfg).with_context(|| format!("open {}", path.display()))?;
    let registry = PluginRegistry::with_defaults()?;
    let target = match into_course {
        Some(id) => RestoreTarget::ExistingCourse(id),
        None => RestoreTarget::NewCourse,
    };

    let report = restore_into(&db, &cfg, &registry, &from, target)?;

    if json {
        let warnings: Vec<String> = report.record_errors.iter().map(|e| e.to_string()).collect();
        let out = json!({
            "session_id": report.session_id,
            "course_id": report.new_course_id,
            "outcome": report.outcome(),
            "persisted": report.persisted,
            "skipped": report.skipped,
            "unmatched": report.unmatched,
            "unmatched_paths": report.unmatched_paths,
            "deferred_resolved": report.deferred_resolved,
            "deferred_nulled": report.deferred_nulled,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Restored into course {} (session {})",
            report.new_course_id, report.session_id
        );
        println!(
            "  persisted={} skipped={} unmatched={}",
            report.persisted, report.skipped, report.unmatched
        );
        for p in &report.unmatched_paths {
            println!("  no handler: {}", p);
        }
        for e in &report.record_errors {
            println!("  warning: {}", e);
        }
        println!("Outcome: {:?}", report.outcome());
    }
    Ok(())
}
