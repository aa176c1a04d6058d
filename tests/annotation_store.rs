// tests/annotation_store.rs
//
// Запуск только этого файла:
//   cargo test --test annotation_store -- --nocapture
//
// Покрываем:
// 1) annotate идемпотентен: повторная аннотация == однократной.
// 2) promote_to_final монотонен; purge после promote чистит только provisional.
// 3) Scale-ссылки хранятся отрицательными и не пересекаются с обычными id; id <= 0 отбрасываются.
// 4) Сессия в отдельном store-файле переживает закрытие соединения (resume по id).

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use Satchel::store::{drop_session, MappingWrite};
use Satchel::{
    list_sessions, AnnotatedId, Database, SatchelConfig, Scope, Session, SessionKind,
    StructuralError,
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
    base.join(format!("satchel-store-{prefix}-{pid}-{t}-{id}"))
}

fn ids(it: impl Iterator<Item = Result<i64, StructuralError>>) -> Result<Vec<i64>> {
    Ok(it.collect::<Result<Vec<_>, _>>()?)
}

#[test]
fn annotate_is_idempotent() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let s = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    s.annotate("user", [3i64, 5, 3])?;
    let once = ids(s.enumerate("user"))?;
    s.annotate("user", [5i64, 3])?;
    let twice = ids(s.enumerate("user"))?;

    assert_eq!(once, vec![3, 5]);
    assert_eq!(once, twice);
    assert_eq!(s.count("user")?, 2);
    assert!(s.exists("user")?);
    assert!(!s.exists("question")?);
    Ok(())
}

#[test]
fn promote_to_final_is_monotonic() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let s = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    s.annotate("user", [1i64, 2])?;
    s.promote_to_final("user")?;
    assert_eq!(ids(s.enumerate("user"))?, Vec::<i64>::new());
    assert_eq!(ids(s.enumerate_final("user"))?, vec![1, 2]);

    // повторный promote без новых аннотаций ничего не меняет
    s.promote_to_final("user")?;
    assert_eq!(ids(s.enumerate_final("user"))?, vec![1, 2]);

    // новые provisional entries добавляются к final, старые остаются
    s.annotate("user", [2i64, 9])?;
    s.promote_to_final("user")?;
    assert_eq!(ids(s.enumerate_final("user"))?, vec![1, 2, 9]);

    // purge бьёт только provisional namespace
    s.annotate("user", [40i64])?;
    s.purge("user")?;
    assert_eq!(ids(s.enumerate("user"))?, Vec::<i64>::new());
    assert_eq!(ids(s.enumerate_final("user"))?, vec![1, 2, 9]);

    s.purge_final("user")?;
    assert_eq!(s.entries()?, 0);
    Ok(())
}

#[test]
fn scale_ids_are_negated_and_non_positive_ids_dropped() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let s = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    s.annotate("grade_item", [AnnotatedId::Item(7), AnnotatedId::Scale(7)])?;
    s.annotate("grade_item", [AnnotatedId::Item(0), AnnotatedId::Item(-3), AnnotatedId::Scale(0)])?;

    assert_eq!(ids(s.enumerate("grade_item"))?, vec![-7, 7]);
    assert_eq!(s.count("grade_item")?, 2);
    Ok(())
}

#[test]
fn mappings_are_written_once() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let s = Session::create(&db, SessionKind::Restore, Scope::Course { course_id: 2 })?;

    assert_eq!(s.set_mapping("question", 100, 501)?, MappingWrite::Written);
    assert_eq!(s.set_mapping("question", 100, 501)?, MappingWrite::Unchanged);
    assert_eq!(
        s.set_mapping("question", 100, 777)?,
        MappingWrite::Conflict { existing: 501 }
    );
    assert_eq!(s.get_new_id("question", 100)?, Some(501));
    assert_eq!(s.get_new_id("question", 101)?, None);
    assert_eq!(s.get_new_id("quiz", 100)?, None);
    Ok(())
}

#[test]
fn sessions_are_isolated_and_cleaned_on_finish() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let a = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;
    let b = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 3 })?;

    a.annotate("user", [1i64, 2])?;
    b.annotate("user", [3i64])?;
    assert_eq!(ids(a.enumerate("user"))?, vec![1, 2]);
    assert_eq!(ids(b.enumerate("user"))?, vec![3]);

    let a_id = a.id().to_string();
    a.finish()?;
    assert_eq!(ids(b.enumerate("user"))?, vec![3]);

    let infos = list_sessions(&db)?;
    let a_info = infos.iter().find(|i| i.id == a_id).expect("session row kept");
    assert_eq!(a_info.entries, 0);
    Ok(())
}

#[test]
fn durable_store_survives_reopen() -> Result<()> {
    let root = unique_root("durable");
    fs::create_dir_all(&root)?;
    let store = root.join("sessions.sqlite");
    let cfg = SatchelConfig::default().with_session_store(Some(store.to_string_lossy()));

    let id = {
        let db = Database::open(&root.join("main.sqlite"), &cfg)?;
        let s = Session::create(&db, SessionKind::Restore, Scope::Activity { course_id: 4, cmid: 9 })?;
        s.set_mapping("quiz", 11, 21)?;
        s.annotate("user", [5i64])?;
        s.id().to_string()
        // соединение закрывается без finish(): имитация прерванного job'а
    };

    let db = Database::open(&root.join("main.sqlite"), &cfg)?;
    let s = Session::resume(&db, &id)?;
    assert_eq!(s.kind(), SessionKind::Restore);
    assert_eq!(s.scope(), Scope::Activity { course_id: 4, cmid: 9 });
    assert_eq!(s.get_new_id("quiz", 11)?, Some(21));
    assert_eq!(ids(s.enumerate("user"))?, vec![5]);

    assert!(matches!(
        Session::resume(&db, "no-such-session"),
        Err(StructuralError::UnknownSession(_))
    ));

    drop(s);
    assert!(drop_session(&db, &id)?);
    assert!(list_sessions(&db)?.iter().all(|i| i.id != id));

    let _ = fs::remove_dir_all(&root);
    Ok(())
}
