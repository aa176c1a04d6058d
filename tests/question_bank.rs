// tests/question_bank.rs
//
// Запуск только этого файла:
//   cargo test --test question_bank -- --nocapture
//
// Покрываем:
// 1) Фаза 1: все категории целевого контекста, даже без используемых вопросов.
// 2) Фаза 2: категории чужих контекстов, в которых лежат уже аннотированные вопросы.
// 3) Контексты категорий аннотируются под "context"; повторный вызов ничего не добавляет.

use anyhow::Result;

use Satchel::store::question_bank::{CONTEXT, QUESTION, QUESTION_CATEGORY};
use Satchel::store::{annotate_question_categories, QuestionBankSchema, QuestionBankStats};
use Satchel::{Database, SatchelConfig, Scope, Session, SessionKind};

fn seed(db: &Database) -> Result<()> {
    db.execute_batch(
        "CREATE TABLE question_categories (id INTEGER PRIMARY KEY, name TEXT, contextid INTEGER, parent INTEGER);
         CREATE TABLE question (id INTEGER PRIMARY KEY, category INTEGER, name TEXT);
         -- 20: контекст курса, 1: системный банк, 77: чужой курс
         INSERT INTO question_categories VALUES
            (40, 'Course default', 20, 0),
            (41, 'Course extra', 20, 40),
            (50, 'System shared', 1, 0),
            (51, 'System unused', 1, 0),
            (60, 'Other course', 77, 0);
         INSERT INTO question VALUES
            (100, 40, 'local'),
            (200, 50, 'shared used'),
            (201, 50, 'shared sibling'),
            (300, 51, 'never used'),
            (400, 60, 'foreign');",
    )?;
    Ok(())
}

fn collect(s: &Session<'_>, t: &str) -> Result<Vec<i64>> {
    Ok(s.enumerate(t).collect::<Result<Vec<_>, _>>()?)
}

#[test]
fn direct_and_shared_categories() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    seed(&db)?;
    let s = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 5 })?;

    // slots ссылаются на локальный и на общий вопрос
    s.annotate(QUESTION, [100i64, 200])?;
    let stats = annotate_question_categories(&s, &QuestionBankSchema::default(), 20)?;

    assert_eq!(stats, QuestionBankStats { direct: 2, foreign: 1 });
    assert_eq!(collect(&s, QUESTION_CATEGORY)?, vec![40, 41, 50]);
    assert_eq!(collect(&s, CONTEXT)?, vec![1, 20]);

    let again = annotate_question_categories(&s, &QuestionBankSchema::default(), 20)?;
    assert_eq!(again, QuestionBankStats { direct: 0, foreign: 0 });
    assert_eq!(collect(&s, QUESTION_CATEGORY)?, vec![40, 41, 50]);
    Ok(())
}

#[test]
fn final_question_entries_count_too() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    seed(&db)?;
    let s = Session::create(&db, SessionKind::Backup, Scope::Activity { course_id: 5, cmid: 9 })?;

    s.annotate(QUESTION, [400i64])?;
    s.promote_to_final(QUESTION)?;
    // модульный контекст 90 пуст: только фаза 2
    let stats = annotate_question_categories(&s, &QuestionBankSchema::default(), 90)?;
    assert_eq!(stats, QuestionBankStats { direct: 0, foreign: 1 });
    assert_eq!(collect(&s, QUESTION_CATEGORY)?, vec![60]);
    Ok(())
}

#[test]
fn custom_schema_names_are_checked() -> Result<()> {
    let cfg = SatchelConfig::default();
    let db = Database::open_in_memory(&cfg)?;
    seed(&db)?;
    let s = Session::create(&db, SessionKind::Backup, Scope::Course { course_id: 5 })?;

    let schema = QuestionBankSchema {
        question_table: "question; DROP TABLE question".to_string(),
        ..QuestionBankSchema::default()
    };
    assert!(annotate_question_categories(&s, &schema, 20).is_err());
    assert_eq!(db.count_rows("question")?, 5);
    Ok(())
}
