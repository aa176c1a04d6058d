// tests/source_resolver.rs
//
// Запуск только этого файла:
//   cargo test --test source_resolver -- --nocapture
//
// Покрываем:
// 1) Порядок событий: open/data/children/close, wrapper без source итерируется один раз.
// 2) ParentId пропускает wrappers; Ancestor читает поле ближайшего предка.
// 3) Структурные ошибки (нет ProcessorVar, не выставлен pending value, битый source) несут путь узла.
// 4) Запись с нечисловой ссылкой пропускается (RecordError), остальные идут дальше.
// 5) После прерванного прохода не остаётся открытых row streams.

use anyhow::Result;

use Satchel::record::Record;
use Satchel::stream::{MemorySink, StreamEvent};
use Satchel::{
    BackupDriver, Database, Element, IdKind, Param, ProcessorVar, RecordError, SatchelConfig,
    Scope, Session, SessionKind, Source, StructuralError,
};

fn rec(pairs: &[(&str, serde_json::Value)]) -> Record {
    Record::from_pairs(pairs.iter().map(|(k, v)| (*k, v.clone())))
}

fn setup(db: &Database) -> Result<()> {
    db.execute_batch(
        "CREATE TABLE forum (id INTEGER PRIMARY KEY, course INTEGER, name TEXT);
         CREATE TABLE forum_post (id INTEGER PRIMARY KEY, forum INTEGER, author INTEGER, subject TEXT);
         INSERT INTO forum VALUES (1, 2, 'News'), (2, 2, 'Q&A'), (3, 9, 'Other course');
         INSERT INTO forum_post VALUES (10, 1, 5, 'hello'), (11, 1, 6, 'again'), (12, 2, 5, 'help');",
    )?;
    Ok(())
}

fn forum_tree() -> Result<Element> {
    let post = Element::new("post")
        .with_finals(["id", "forum", "author", "subject"])
        .with_source(Source::table("forum_post").filter("forum", Param::ParentId).sort("id"))?
        .annotate_field("author", "user", IdKind::Plain);
    let forum = Element::new("forum")
        .with_finals(["id", "name"])
        .with_source(
            Source::table("forum")
                .filter("course", Param::Var(ProcessorVar::CourseId))
                .sort("id"),
        )?
        .annotate_self("forum")
        .with_child(Element::new("posts").with_child(post)?)?;
    Ok(Element::new("forums").with_child(forum)?)
}

fn opens(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Open { name } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn wrappers_iterate_once_and_parent_id_skips_them() -> Result<()> {
    let cfg = SatchelConfig::default().with_fetch_rows(1);
    let db = Database::open_in_memory(&cfg)?;
    setup(&db)?;
    let session = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    let mut sink = MemorySink::default();
    let mut driver = BackupDriver::new(&session);
    driver.run(&forum_tree()?, &mut sink)?;

    assert_eq!(
        opens(&sink.events),
        vec!["forums", "forum", "posts", "post", "post", "forum", "posts", "post"]
    );
    // wrapper не пишет data
    assert!(matches!(sink.events[1], StreamEvent::Open { .. }));
    assert_eq!(driver.emitted(), 5);
    assert!(driver.errors().is_empty());

    let posts: Vec<i64> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Data { fields } if fields.contains("subject") => fields.id(),
            _ => None,
        })
        .collect();
    assert_eq!(posts, vec![10, 11, 12]);

    let forums = session.enumerate("forum").collect::<Result<Vec<_>, _>>()?;
    assert_eq!(forums, vec![1, 2]);
    let users = session.enumerate("user").collect::<Result<Vec<_>, _>>()?;
    assert_eq!(users, vec![5, 6]);
    assert_eq!(db.open_streams(), 0);
    Ok(())
}

#[test]
fn literal_source_and_ancestor_values() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    setup(&db)?;
    let session = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    let post = Element::new("post")
        .with_finals(["id", "subject"])
        .with_source(Source::query(
            "SELECT * FROM forum_post WHERE author = ? ORDER BY id",
            vec![Param::ancestor("who", "userid")],
        ))?;
    let who = Element::new("who")
        .with_finals(["userid"])
        .with_source(Source::Literal(vec![
            rec(&[("userid", serde_json::json!(6))]),
            rec(&[("userid", serde_json::json!(5))]),
        ]))?
        .with_child(post)?;

    let mut sink = MemorySink::default();
    BackupDriver::new(&session).run(&who, &mut sink)?;

    let ids: Vec<i64> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Data { fields } => fields.id(),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![11, 10, 12]);
    Ok(())
}

#[test]
fn missing_activity_id_is_structural_with_path() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    setup(&db)?;
    let session = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    let tree = Element::new("forums").with_child(
        Element::new("forum")
            .with_finals(["id"])
            .with_source(Source::table("forum").filter("id", Param::Var(ProcessorVar::ActivityId)))?,
    )?;

    let mut sink = MemorySink::default();
    let err = BackupDriver::new(&session)
        .run(&tree, &mut sink)
        .expect_err("ACTIVITY_ID is not available in a course session");
    match err {
        StructuralError::MissingVariable { path, var } => {
            assert_eq!(path, "/forums/forum");
            assert_eq!(var, "ACTIVITY_ID");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn unset_pending_value_is_structural() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    setup(&db)?;
    let session = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    let tree = Element::new("post")
        .with_finals(["id"])
        .with_source(Source::query(
            "SELECT * FROM forum_post WHERE forum = ?",
            vec![Param::ancestor("forum", "id")],
        ))?;
    let mut sink = MemorySink::default();
    let err = BackupDriver::new(&session).run(&tree, &mut sink).unwrap_err();
    assert!(matches!(
        err,
        StructuralError::UnsetPendingValue { ref path, ref node, .. } if path == "/post" && node == "forum"
    ));

    // число плейсхолдеров не совпадает с параметрами
    let bad = Element::new("post")
        .with_finals(["id"])
        .with_source(Source::query("SELECT * FROM forum_post WHERE forum = ? AND author = ?", vec![Param::literal(1)]))?;
    let err = BackupDriver::new(&session).run(&bad, &mut sink).unwrap_err();
    assert!(matches!(err, StructuralError::MalformedSource { ref path, .. } if path == "/post"));
    Ok(())
}

#[test]
fn tree_construction_rules() -> Result<()> {
    let mut forum = Element::new("forum").with_finals(["id", "name"]);
    forum.set_source(Source::table("forum"))?;
    assert!(matches!(
        forum.set_source(Source::table("forum")),
        Err(StructuralError::SourceAlreadySet { .. })
    ));
    forum.add_child(Element::new("posts"))?;
    assert!(matches!(
        forum.add_child(Element::new("posts")),
        Err(StructuralError::DuplicateChild { .. })
    ));
    assert!(matches!(
        forum.add_child(Element::new("name")),
        Err(StructuralError::ChildShadowsFinal { .. })
    ));
    assert_eq!(forum.paths(), vec!["/forum".to_string(), "/forum/posts".to_string()]);
    assert!(!forum.is_wrapper());
    assert!(Element::new("posts").is_wrapper());
    Ok(())
}

#[test]
fn bad_reference_skips_one_record_only() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    let session = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    let post = Element::new("post")
        .with_finals(["id", "author"])
        .with_source(Source::Literal(vec![
            rec(&[("id", serde_json::json!(1)), ("author", serde_json::json!(5))]),
            rec(&[("id", serde_json::json!(2)), ("author", serde_json::json!("nobody"))]),
            rec(&[("id", serde_json::json!(3)), ("author", serde_json::json!(7))]),
        ]))?
        .annotate_field("author", "user", IdKind::Plain);

    let mut sink = MemorySink::default();
    let mut driver = BackupDriver::new(&session);
    driver.run(&post, &mut sink)?;

    assert_eq!(driver.emitted(), 2);
    assert_eq!(driver.errors().len(), 1);
    assert!(matches!(
        &driver.errors()[0],
        RecordError::InvalidField { path, field, .. } if path == "/post" && field == "author"
    ));
    let users = session.enumerate("user").collect::<Result<Vec<_>, _>>()?;
    assert_eq!(users, vec![5, 7]);
    Ok(())
}

#[test]
fn aborted_run_releases_row_streams() -> Result<()> {
    let cfg = SatchelConfig::default().with_fetch_rows(1);
    let db = Database::open_in_memory(&cfg)?;
    setup(&db)?;
    let session = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 2 })?;

    // второй уровень читает из несуществующей таблицы: проход падает,
    // пока внешний stream по forum ещё не исчерпан
    let broken = Element::new("attachment")
        .with_finals(["id"])
        .with_source(Source::table("forum_attachment").filter("post", Param::ParentId))?;
    let post = Element::new("post")
        .with_finals(["id"])
        .with_source(Source::table("forum_post").filter("forum", Param::ParentId))?
        .with_child(broken)?;
    let forum = Element::new("forum")
        .with_finals(["id"])
        .with_source(Source::table("forum").filter("course", Param::Var(ProcessorVar::CourseId)))?
        .with_child(post)?;

    let mut sink = MemorySink::default();
    let err = BackupDriver::new(&session).run(&forum, &mut sink).unwrap_err();
    assert!(matches!(
        err,
        StructuralError::Source { ref path, .. } if path == "/forum/post/attachment"
    ));
    assert_eq!(db.open_streams(), 0);
    Ok(())
}
