// tests/logstore.rs
//
// Запуск только этого файла:
//   cargo test --test logstore -- --nocapture
//
// Покрываем:
// 1) standard: write/read/record_count, фильтры и сортировка, offset/limit.
// 2) legacy: запись/чтение через LogRecord, фильтр по отсутствующему полю ничего не находит.
// 3) database: внешний SQLite файл (ATTACH), бэкап курса и рестор логов в другой внешний файл.
// 4) translate_log_record: неизвестный тип события, несопоставимый objectid -> NULL.
// 5) ContextRemap: уровни модуля (70), пользователя (30), системы (10).

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use Satchel::lms::init_schema;
use Satchel::plugins::logstore::database::DatabaseLogStore;
use Satchel::plugins::logstore::legacy::{LegacyLogStore, LEGACY_EVENT};
use Satchel::plugins::logstore::standard::StandardLogStore;
use Satchel::plugins::logstore::{translate_log_record, LogFilter, LogRecord, LogSort, LogStore};
use Satchel::plugins::FAMILY_LOGSTORE;
use Satchel::record::Record;
use Satchel::restore::{ContextRemap, EventResolverRegistry, RestoreContext};
use Satchel::{
    backup_to_dir, restore_from_dir, Database, PluginRegistry, RecordError, SatchelConfig, Scope,
    Session, SessionKind,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("satchel-logstore-{prefix}-{pid}-{t}-{id}"))
}

fn event(userid: i64, courseid: i64, time: i64) -> LogRecord {
    LogRecord {
        eventname: "\\core\\event\\course_viewed".to_string(),
        component: "core".to_string(),
        action: "viewed".to_string(),
        target: "course".to_string(),
        crud: "r".to_string(),
        contextid: 20 + courseid,
        contextlevel: 50,
        contextinstanceid: courseid,
        userid,
        courseid: Some(courseid),
        timecreated: time,
        ..Default::default()
    }
}

#[test]
fn standard_store_filters_and_pages() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    init_schema(&db)?;
    let store = StandardLogStore;

    let written = store.write(
        &db,
        &[event(3, 5, 300), event(4, 5, 100), event(3, 6, 200), event(3, 5, 400)],
    )?;
    assert_eq!(written, 4);

    let all = LogFilter::default();
    assert_eq!(store.record_count(&db, &all)?, 4);

    let course5 = LogFilter {
        courseid: Some(5),
        ..Default::default()
    };
    assert_eq!(store.record_count(&db, &course5)?, 3);
    let times: Vec<i64> = store
        .read(&db, &course5, LogSort::TimeAsc, 0, 10)?
        .iter()
        .map(|l| l.timecreated)
        .collect();
    assert_eq!(times, vec![100, 300, 400]);

    let user3_window = LogFilter {
        userid: Some(3),
        since: Some(200),
        until: Some(400),
        ..Default::default()
    };
    let hits = store.read(&db, &user3_window, LogSort::TimeDesc, 0, 10)?;
    assert_eq!(hits.iter().map(|l| l.timecreated).collect::<Vec<_>>(), vec![300, 200]);

    let page = store.read(&db, &all, LogSort::TimeAsc, 1, 2)?;
    assert_eq!(page.iter().map(|l| l.timecreated).collect::<Vec<_>>(), vec![200, 300]);
    assert!(page.iter().all(|l| l.id.is_some()));
    Ok(())
}

#[test]
fn legacy_store_maps_through_log_record() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    init_schema(&db)?;
    let store = LegacyLogStore;

    let mut in_module = event(8, 5, 50);
    in_module.contextlevel = 70;
    in_module.contextinstanceid = 7;
    store.write(&db, &[event(3, 5, 10), in_module])?;

    let rows = store.read(&db, &LogFilter::default(), LogSort::TimeAsc, 0, 10)?;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|l| l.eventname == LEGACY_EVENT));
    assert_eq!((rows[1].contextlevel, rows[1].contextinstanceid), (70, 7));
    assert_eq!((rows[0].contextlevel, rows[0].contextinstanceid), (50, 5));

    assert_eq!(
        store.record_count(&db, &LogFilter { userid: Some(8), ..Default::default() })?,
        1
    );
    // в таблице log нет contextid: такой фильтр ничего не находит
    assert_eq!(
        store.record_count(&db, &LogFilter { contextid: Some(25), ..Default::default() })?,
        0
    );
    Ok(())
}

#[test]
fn database_store_needs_configuration() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let store = DatabaseLogStore::from_config(&cfg);
    assert!(!store.attach(&db)?);
    assert!(store.record_count(&db, &LogFilter::default()).is_err());
    Ok(())
}

#[test]
fn database_store_backup_and_restore() -> Result<()> {
    let root = unique_root("external");
    fs::create_dir_all(&root)?;
    let registry = PluginRegistry::with_defaults()?;

    let src_cfg = SatchelConfig::default()
        .with_enabled_plugins(FAMILY_LOGSTORE, &["database"])
        .with_external_log_db(Some(root.join("src-logs.sqlite").to_string_lossy()));
    let src = Database::open(&root.join("source.sqlite"), &src_cfg)?;
    init_schema(&src)?;
    src.execute_batch(
        "INSERT INTO users (id, username) VALUES (3, 'carol');
         INSERT INTO course (id, shortname) VALUES (5, 'CHEM');
         INSERT INTO context (id, contextlevel, instanceid) VALUES (25, 50, 5);",
    )?;
    let ext = DatabaseLogStore::from_config(&src_cfg);
    ext.ensure_schema(&src)?;
    ext.write(&src, &[event(3, 5, 10), event(3, 5, 20), event(3, 9, 30)])?;
    assert_eq!(ext.record_count(&src, &LogFilter::default())?, 3);

    let out = root.join("archive");
    backup_to_dir(&src, &src_cfg, &registry, Scope::Course { course_id: 5 }, &out)?;
    let course = fs::read_to_string(out.join("course.jsonl"))?;
    assert!(course.contains("plugin_logstore_database"));

    let dst_cfg = SatchelConfig::default()
        .with_enabled_plugins(FAMILY_LOGSTORE, &["database"])
        .with_external_log_db(Some(root.join("dst-logs.sqlite").to_string_lossy()));
    let dst = Database::open(&root.join("target.sqlite"), &dst_cfg)?;
    init_schema(&dst)?;
    let dst_ext = DatabaseLogStore::from_config(&dst_cfg);
    dst_ext.ensure_schema(&dst)?;

    let report = restore_from_dir(&dst, &dst_cfg, &registry, &out)?;
    assert!(report.record_errors.is_empty(), "errors: {:?}", report.record_errors);

    let restored = dst_ext.read(&dst, &LogFilter::default(), LogSort::TimeAsc, 0, 10)?;
    assert_eq!(restored.len(), 2);
    assert!(restored
        .iter()
        .all(|l| l.courseid == Some(report.new_course_id) && l.contextinstanceid == report.new_course_id));
    assert_eq!(dst.count_rows("logstore_standard_log")?, 0);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

/// Restore-сессия с отображёнными контекстом курса 20 -> 120 и пользователем 3 -> 13.
fn restore_session(db: &Database) -> Result<Session<'_>> {
    let s = Session::create(db, SessionKind::Restore, Scope::Course { course_id: 50 })?;
    s.set_mapping("context", 20 + 5, 120)?;
    s.set_mapping("user", 3, 13)?;
    Ok(s)
}

#[test]
fn log_translation_object_ids() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let session = restore_session(&db)?;
    session.set_mapping("question", 100, 400)?;
    let resolvers = EventResolverRegistry::with_defaults();
    let ctx = RestoreContext::new(&session, &cfg, &resolvers, 50, 120, false);

    let mut created = event(3, 5, 10);
    created.eventname = "\\core\\event\\question_created".to_string();
    created.objectid = Some(100);
    let mut rec = created.to_record()?;
    translate_log_record(&mut rec, &ctx)?;
    assert_eq!(rec.get_i64("objectid"), Some(400));
    assert_eq!(rec.get_i64("contextid"), Some(120));
    assert_eq!(rec.get_i64("contextinstanceid"), Some(50));
    assert_eq!(rec.get_i64("courseid"), Some(50));
    assert_eq!(rec.get_i64("userid"), Some(13));

    // вопрос 101 не восстанавливался: objectid обнуляется, запись остаётся
    created.objectid = Some(101);
    let mut rec = created.to_record()?;
    translate_log_record(&mut rec, &ctx)?;
    assert_eq!(rec.get_i64("objectid"), None);

    // тип события без регистрации: запись отбрасывается
    let mut unknown = event(3, 5, 10);
    unknown.eventname = "\\mod_unknown\\event\\thing_done".to_string();
    unknown.objectid = Some(9);
    let mut rec = unknown.to_record()?;
    let err = translate_log_record(&mut rec, &ctx).unwrap_err();
    assert!(matches!(
        err,
        RecordError::MissingTypeResolver { ref type_name, old_id: 9, .. }
            if type_name == "\\mod_unknown\\event\\thing_done"
    ));

    // без objectid регистрация не нужна
    unknown.objectid = None;
    let mut rec = unknown.to_record()?;
    assert!(translate_log_record(&mut rec, &ctx).is_ok());
    Ok(())
}

fn at_level(level: i64, instance: i64) -> Record {
    Record::from_pairs([
        ("contextlevel", serde_json::json!(level)),
        ("contextinstanceid", serde_json::json!(instance)),
    ])
}

#[test]
fn context_remap_by_level() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let session = restore_session(&db)?;
    session.set_mapping("course_module", 7, 70)?;
    let resolvers = EventResolverRegistry::with_defaults();
    let ctx = RestoreContext::new(&session, &cfg, &resolvers, 50, 120, false);
    let remap = ContextRemap::new("contextlevel", "contextinstanceid");

    let mut module = at_level(70, 7);
    remap.apply(&mut module, &ctx)?;
    assert_eq!(module.get_i64("contextinstanceid"), Some(70));

    let mut user = at_level(30, 3);
    remap.apply(&mut user, &ctx)?;
    assert_eq!(user.get_i64("contextinstanceid"), Some(13));

    let mut system = at_level(10, 99);
    remap.apply(&mut system, &ctx)?;
    assert_eq!(system.get_i64("contextinstanceid"), Some(0));

    let mut course = at_level(50, 5);
    remap.apply(&mut course, &ctx)?;
    assert_eq!(course.get_i64("contextinstanceid"), Some(50));

    // модуль 8 и пользователь 4 не сопоставлены: обязательные ссылки
    let err = remap.apply(&mut at_level(70, 8), &ctx).unwrap_err();
    assert!(matches!(
        err,
        RecordError::UnmappedRequired { ref entity_type, old_id: 8, .. } if entity_type == "course_module"
    ));
    let err = remap.apply(&mut at_level(30, 4), &ctx).unwrap_err();
    assert!(matches!(
        err,
        RecordError::UnmappedRequired { ref entity_type, old_id: 4, .. } if entity_type == "user"
    ));

    let err = remap.apply(&mut at_level(999, 1), &ctx).unwrap_err();
    assert!(matches!(err, RecordError::InvalidField { .. }));
    Ok(())
}
