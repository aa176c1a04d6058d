use anyhow::{Context, Result};
use log::debug;
use serde_json::json;
use std::path::PathBuf;

use Satchel::{backup_to_dir, Database, PluginRegistry, SatchelConfig, Scope};

pub struct BackupArgs {
    pub db: PathBuf,
    pub course: i64,
    pub cmid: Option<i64>,
    pub out: PathBuf,
    pub include_users: bool,
    pub include_logs: bool,
    pub include_files: bool,
    pub compress: bool,
    pub json: bool,
}

pub fn exec(args: BackupArgs) -> Result<()> {
    // CLI-флаги поверх SATCHEL_* окружения
    let cfg = SatchelConfig::from_env()
        .with_include_users(args.include_users)
        .with_include_logs(args.include_logs)
        .with_include_files(args.include_files)
        .with_compress_streams(args.compress)
        .build();
    debug!("{}", cfg);

    let db = Database::open(&args.db, &cfg)
        .with_context(|| format!("open {}", args.db.display()))?;
    let registry = PluginRegistry::with_defaults()?;
    let scope = match args.cmid {
        Some(cmid) => Scope::Activity {
            course_id: args.course,
            cmid,
        },
        None => Scope::Course {
            course_id: args.course,
        },
    };

    let report = backup_to_dir(&db, &cfg, &registry, scope, &args.out)?;

    if args.json {
        let streams: Vec<_> = report
            .streams
            .iter()
            .map(|(name, records)| json!({ "name": name, "records": records }))
            .collect();
        let warnings: Vec<String> = report.record_errors.iter().map(|e| e.to_string()).collect();
        let out = json!({
            "session_id": report.session_id,
            "outcome": report.outcome(),
            "streams": streams,
            "annotations": report.annotations,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Backup {} -> {}", report.session_id, args.out.display());
        for (name, records) in &report.streams {
            println!("  {:<10} {} record(s)", name, records);
        }
        for e in &report.record_errors {
            println!("  warning: {}", e);
        }
        println!("Outcome: {:?}", report.outcome());
    }
    Ok(())
}
