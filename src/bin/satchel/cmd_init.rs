use anyhow::{Context, Result};
use std::path::PathBuf;

use Satchel::lms::init_schema;
use Satchel::{Database, SatchelConfig};

pub fn exec(path: PathBuf) -> Result<()> {
    let cfg = SatchelConfig::from_env();
    let db = Database::open(&path, &cfg).with_context(|| format!("open {}", path.display()))?;
    init_schema(&db)?;
    println!("Initialized schema at {}", path.display());
    Ok(())
}
