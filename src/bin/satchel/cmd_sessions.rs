use anyhow::{Context, Result};
use std::path::PathBuf;

use Satchel::store::drop_session;
use Satchel::{list_sessions, Database, SatchelConfig};

pub fn exec_list(path: PathBuf, json: bool) -> Result<()> {
    let cfg = SatchelConfig::from_env();
    let db = Database::open(&path, &cfg).with_context(|| format!("open {}", path.display()))?;
    let sessions = list_sessions(&db)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for s in &sessions {
        println!(
            "{}  {:<7} {:<9} entries={} scope={}",
            s.id, s.kind, s.status, s.entries, s.scope
        );
    }
    Ok(())
}

pub fn exec_drop(path: PathBuf, id: String) -> Result<()> {
    let cfg = SatchelConfig::from_env();
    let db = Database::open(&path, &cfg).with_context(|| format!("open {}", path.display()))?;
    if drop_session(&db, &id)? {
        println!("Dropped session {}", id);
    } else {
        println!("Session {} not found", id);
    }
    Ok(())
}
