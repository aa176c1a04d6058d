// tests/plugins_disabled.rs
//
// Запуск только этого файла:
//   cargo test --test plugins_disabled -- --nocapture
//
// Покрываем:
// 1) Выключенное семейство logstore не вносит поддерево в поток (и в manifest.plugins).
// 2) Рестор такого архива с включёнными плагинами проходит без ошибок.
// 3) Архив с логами при выключенном на ресторе плагине: пути не сопоставлены, но это не ошибка.
// 4) Disguise-плагин переносит псевдонимы с пересчётом userid/courseid.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use Satchel::lms::init_schema;
use Satchel::plugins::{FAMILY_DISGUISE, FAMILY_LOGSTORE};
use Satchel::{backup_to_dir, restore_from_dir, Database, Outcome, PluginRegistry, SatchelConfig, Scope};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("satchel-plugins-{prefix}-{pid}-{t}-{id}"))
}

fn seed(db: &Database) -> Result<()> {
    init_schema(db)?;
    db.execute_batch(
        r#"
        INSERT INTO users (id, username) VALUES (4, 'alice'), (8, 'bob');
        INSERT INTO course (id, shortname, fullname) VALUES (3, 'HIST', 'History');
        INSERT INTO context (id, contextlevel, instanceid) VALUES (15, 50, 3);
        INSERT INTO logstore_standard_log
            (eventname, component, action, target, contextid, contextlevel, contextinstanceid, userid, courseid, timecreated)
            VALUES ('\core\event\course_viewed', 'core', 'viewed', 'course', 15, 50, 3, 4, 3, 100),
                   ('\core\event\course_viewed', 'core', 'viewed', 'course', 15, 50, 3, 8, 3, 200);
        INSERT INTO log (time, userid, course, module, action) VALUES (50, 8, 3, 'course', 'view');
        INSERT INTO disguise_pseudonym (courseid, userid, pseudonym) VALUES (3, 4, 'Owl'), (3, 8, 'Fox');
        "#,
    )?;
    Ok(())
}

#[test]
fn disabled_logstore_contributes_nothing() -> Result<()> {
    let root = unique_root("nologs");
    fs::create_dir_all(&root)?;
    let registry = PluginRegistry::with_defaults()?;

    let backup_cfg = SatchelConfig::default().with_enabled_plugins::<&str>(FAMILY_LOGSTORE, &[]);
    let src = Database::open(&root.join("source.sqlite"), &backup_cfg)?;
    seed(&src)?;
    let out = root.join("archive");
    let report = backup_to_dir(&src, &backup_cfg, &registry, Scope::Course { course_id: 3 }, &out)?;
    assert_eq!(report.outcome(), Outcome::Succeeded);

    let course = fs::read_to_string(out.join("course.jsonl"))?;
    assert!(!course.contains("plugin_logstore"));
    assert!(course.contains("plugin_disguise_pseudonym"));
    let manifest = fs::read_to_string(out.join("manifest.json"))?;
    let manifest: serde_json::Value = serde_json::from_str(&manifest)?;
    assert!(manifest["plugins"].get(FAMILY_LOGSTORE).is_none());

    // рестор со всеми включёнными плагинами
    let dst = Database::open_in_memory(&SatchelConfig::default())?;
    init_schema(&dst)?;
    let report = restore_from_dir(&dst, &SatchelConfig::default(), &registry, &out)?;
    assert!(report.record_errors.is_empty(), "errors: {:?}", report.record_errors);
    assert_eq!(report.outcome(), Outcome::Succeeded);
    assert_eq!(dst.count_rows("logstore_standard_log")?, 0);
    assert_eq!(dst.count_rows("log")?, 0);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn restore_with_disabled_plugin_leaves_paths_unmatched() -> Result<()> {
    let root = unique_root("unmatched");
    fs::create_dir_all(&root)?;
    let registry = PluginRegistry::with_defaults()?;
    let cfg = SatchelConfig::default();

    let src = Database::open(&root.join("source.sqlite"), &cfg)?;
    seed(&src)?;
    let out = root.join("archive");
    backup_to_dir(&src, &cfg, &registry, Scope::Course { course_id: 3 }, &out)?;
    let course = fs::read_to_string(out.join("course.jsonl"))?;
    assert!(course.contains("plugin_logstore_standard"));
    assert!(course.contains("plugin_logstore_legacy"));

    let restore_cfg = SatchelConfig::default().with_enabled_plugins(FAMILY_LOGSTORE, &["legacy"]);
    let dst = Database::open_in_memory(&restore_cfg)?;
    init_schema(&dst)?;
    let report = restore_from_dir(&dst, &restore_cfg, &registry, &out)?;

    assert!(report.record_errors.is_empty(), "errors: {:?}", report.record_errors);
    assert_eq!(report.unmatched, 2);
    assert!(report
        .unmatched_paths
        .contains(&"/course/logs/plugin_logstore_standard/log".to_string()));
    assert_eq!(dst.count_rows("logstore_standard_log")?, 0);
    assert_eq!(dst.count_rows("log")?, 1);
    assert_eq!(
        dst.conn()
            .query_row("SELECT course FROM log", [], |r| r.get::<_, i64>(0))?,
        report.new_course_id
    );

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn pseudonyms_follow_restored_users() -> Result<()> {
    let root = unique_root("disguise");
    fs::create_dir_all(&root)?;
    let registry = PluginRegistry::with_defaults()?;
    let cfg = SatchelConfig::default().with_enabled_plugins(FAMILY_DISGUISE, &["pseudonym"]);

    let src = Database::open(&root.join("source.sqlite"), &cfg)?;
    seed(&src)?;
    let out = root.join("archive");
    backup_to_dir(&src, &cfg, &registry, Scope::Course { course_id: 3 }, &out)?;

    let dst = Database::open_in_memory(&cfg)?;
    init_schema(&dst)?;
    dst.execute_batch("INSERT INTO users (username) VALUES ('root'), ('x'), ('bob');")?;
    let report = restore_from_dir(&dst, &cfg, &registry, &out)?;
    assert!(report.record_errors.is_empty(), "errors: {:?}", report.record_errors);

    let bob: i64 = dst
        .conn()
        .query_row("SELECT id FROM users WHERE username = 'bob'", [], |r| r.get(0))?;
    let (course, user): (i64, i64) = dst.conn().query_row(
        "SELECT courseid, userid FROM disguise_pseudonym WHERE pseudonym = 'Fox'",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!(course, report.new_course_id);
    assert_eq!(user, bob);
    assert_eq!(dst.count_rows("disguise_pseudonym")?, 2);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}
