//! lms/schema — tables read by backup and written by restore.

use log::info;

use crate::db::Database;
use crate::error::StructuralError;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS context (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contextlevel INTEGER NOT NULL,
    instanceid INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_context_instance ON context (contextlevel, instanceid);

CREATE TABLE IF NOT EXISTS course (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    shortname TEXT NOT NULL DEFAULT '',
    fullname TEXT NOT NULL DEFAULT '',
    format TEXT NOT NULL DEFAULT 'topics',
    startdate INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS course_modules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    course INTEGER NOT NULL,
    modname TEXT NOT NULL,
    instance INTEGER,
    section INTEGER NOT NULL DEFAULT 0,
    visible INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS quiz (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    course INTEGER NOT NULL,
    name TEXT NOT NULL,
    intro TEXT,
    grade REAL NOT NULL DEFAULT 10,
    timeopen INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS quiz_slots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    quizid INTEGER NOT NULL,
    slot INTEGER NOT NULL,
    questionid INTEGER NOT NULL,
    maxmark REAL NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    firstname TEXT NOT NULL DEFAULT '',
    lastname TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS scale (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    courseid INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL,
    scale TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS grade_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    courseid INTEGER NOT NULL,
    itemtype TEXT NOT NULL,
    itemmodule TEXT,
    iteminstance INTEGER,
    itemname TEXT,
    scaleid INTEGER,
    grademax REAL NOT NULL DEFAULT 100
);

CREATE TABLE IF NOT EXISTS grading_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gradeitem INTEGER NOT NULL,
    plugin TEXT NOT NULL,
    pluginid INTEGER
);

CREATE TABLE IF NOT EXISTS gradingrule_penalty (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ruleid INTEGER NOT NULL,
    penalty REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS question_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    contextid INTEGER NOT NULL,
    parent INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS question (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category INTEGER NOT NULL,
    name TEXT NOT NULL,
    questiontext TEXT NOT NULL DEFAULT '',
    qtype TEXT NOT NULL,
    createdby INTEGER
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contenthash TEXT NOT NULL,
    contextid INTEGER NOT NULL,
    component TEXT NOT NULL,
    filearea TEXT NOT NULL,
    itemid INTEGER NOT NULL DEFAULT 0,
    filepath TEXT NOT NULL DEFAULT '/',
    filename TEXT NOT NULL,
    userid INTEGER,
    filesize INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS logstore_standard_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    eventname TEXT NOT NULL,
    component TEXT NOT NULL,
    action TEXT NOT NULL,
    target TEXT NOT NULL,
    objecttable TEXT,
    objectid INTEGER,
    crud TEXT NOT NULL DEFAULT 'r',
    edulevel INTEGER NOT NULL DEFAULT 0,
    contextid INTEGER NOT NULL,
    contextlevel INTEGER NOT NULL,
    contextinstanceid INTEGER NOT NULL,
    userid INTEGER NOT NULL,
    courseid INTEGER,
    relateduserid INTEGER,
    anonymous INTEGER NOT NULL DEFAULT 0,
    other TEXT,
    timecreated INTEGER NOT NULL,
    origin TEXT,
    ip TEXT,
    realuserid INTEGER
);

CREATE TABLE IF NOT EXISTS log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    time INTEGER NOT NULL DEFAULT 0,
    userid INTEGER NOT NULL DEFAULT 0,
    ip TEXT NOT NULL DEFAULT '',
    course INTEGER NOT NULL DEFAULT 0,
    module TEXT NOT NULL DEFAULT '',
    cmid INTEGER NOT NULL DEFAULT 0,
    action TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL DEFAULT '',
    info TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS disguise_pseudonym (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    courseid INTEGER NOT NULL,
    userid INTEGER NOT NULL,
    pseudonym TEXT NOT NULL
);
";

/// Create every table of the data model (idempotent).
pub fn init_schema(db: &Database) -> Result<(), StructuralError> {
    db.execute_batch(SCHEMA)?;
    db.invalidate_columns();
    info!("schema: initialized");
    Ok(())
}
