//! restore/plan — `restore_from_dir` / `restore_into`.
//!
//! 1) open the archive (manifest + per-stream crc check);
//! 2) target course: a fresh shell (NewCourse) or an existing course;
//!    course and course context mappings are recorded before any stream;
//! 3) handlers: core paths + enabled plugins per restore task;
//! 4) streams in dependency order: users, scales, main, questions, files;
//! 5) late pass over the main stream: the log subtrees, whose object ids may
//!    point at anything restored in 4);
//! 6) deferred references, then the session is finished.
//!
//! Absent streams and absent paths are "nothing to do".

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use std::path::Path;

use crate::archive::{ArchiveManifest, ArchiveReader};
use crate::config::SatchelConfig;
use crate::db::Database;
use crate::error::{Outcome, RecordError};
use crate::lms::restore::{activity_path, core_handlers, main_root};
use crate::lms::{self, CONTEXT_COURSE, COURSE_TABLE};
use crate::plugins::{
    plugin_handlers, PluginRegistry, FAMILY_DISGUISE, FAMILY_GRADINGRULE, FAMILY_LOGSTORE,
};
use crate::store::{MappingWrite, Scope, Session, SessionKind};
use crate::stream::PathEvents;

use super::{
    resolve_deferred, DeferredStats, DispatchStats, Dispatcher, Pass, RestoreContext, RestoreTask,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTarget {
    /// Create a course shell and restore into it.
    NewCourse,
    /// Restore into an existing course (required for activity archives).
    ExistingCourse(i64),
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub session_id: String,
    pub new_course_id: i64,
    pub persisted: u64,
    pub skipped: u64,
    pub unmatched: u64,
    pub unmatched_paths: Vec<String>,
    pub record_errors: Vec<RecordError>,
    pub deferred_resolved: u64,
    pub deferred_nulled: u64,
}

impl RestoreReport {
    pub fn outcome(&self) -> Outcome {
        Outcome::from_warnings(self.record_errors.len())
    }
}

/// Streams in restore order for an archive of `scope`.
pub fn restore_order(scope: Scope) -> [&'static str; 5] {
    let main = match scope {
        Scope::Course { .. } => "course",
        Scope::Activity { .. } => "activity",
    };
    ["users", "scales", main, "questions", "files"]
}

/// Restore an archive into a new course.
pub fn restore_from_dir(
    db: &Database,
    cfg: &SatchelConfig,
    registry: &PluginRegistry,
    backup_dir: &Path,
) -> Result<RestoreReport> {
    restore_into(db, cfg, registry, backup_dir, RestoreTarget::NewCourse)
}

/// Restore an archive into `target`.
///
/// Records are committed one by one. A structural failure part-way (corrupt
/// stream, broken store) aborts the session but keeps what was committed
/// before it: the target course is then partially restored. The error names
/// that course id so the caller can delete or inspect it.
pub fn restore_into(
    db: &Database,
    cfg: &SatchelConfig,
    registry: &PluginRegistry,
    backup_dir: &Path,
    target: RestoreTarget,
) -> Result<RestoreReport> {
    let archive = ArchiveReader::open(backup_dir)?;
    let manifest = archive.manifest().clone();
    info!(
        "restore: start, archive={} (session {}, {:?}), target={:?}",
        backup_dir.display(),
        manifest.session_id,
        manifest.scope,
        target
    );

    let (course_id, course_ctx, new_course) = match (target, manifest.scope) {
        (RestoreTarget::NewCourse, Scope::Activity { .. }) => {
            bail!("an activity archive can only be restored into an existing course")
        }
        (RestoreTarget::NewCourse, Scope::Course { .. }) => {
            let (c, x) = lms::create_course_shell(db).context("create course shell")?;
            (c, x, true)
        }
        (RestoreTarget::ExistingCourse(id), _) => {
            if db.get_row(COURSE_TABLE, id)?.is_none() {
                bail!("target course {} does not exist", id);
            }
            (id, lms::ensure_context(db, CONTEXT_COURSE, id)?, false)
        }
    };

    let scope = match manifest.scope {
        Scope::Course { .. } => Scope::Course { course_id },
        Scope::Activity { cmid, .. } => Scope::Activity { course_id, cmid },
    };
    let mut session = Session::create(db, SessionKind::Restore, scope)?;
    session.set_keep(cfg.keep_sessions);

    let result = session
        .set_context_id(course_ctx)
        .map_err(anyhow::Error::from)
        .and_then(|_| {
            run_restore(
                &session, cfg, registry, &archive, &manifest, course_id, course_ctx, new_course,
            )
        });

    match result {
        Ok(report) => {
            session.finish()?;
            info!(
                "restore: done, course={}, persisted={}, skipped={}, unmatched={}",
                report.new_course_id, report.persisted, report.skipped, report.unmatched
            );
            Ok(report)
        }
        Err(e) => {
            if let Err(ae) = session.abort() {
                warn!("restore: abort failed: {}", ae);
            }
            warn!(
                "restore: aborted, course {} keeps the records committed so far",
                course_id
            );
            Err(e.context(format!(
                "restore into course {} aborted (new course: {}); records committed before the failure are kept",
                course_id, new_course
            )))
        }
    }
}

/// Handlers for the streams of `manifest`: core paths + enabled plugins.
fn build_dispatcher(
    cfg: &SatchelConfig,
    registry: &PluginRegistry,
    scope: Scope,
) -> Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_all(core_handlers(scope))?;

    let root = main_root(scope);
    let logs = format!("{root}/logs");
    dispatcher.defer_subtree(logs.clone());
    let mut tasks = vec![
        (RestoreTask::new(logs), FAMILY_LOGSTORE),
        (
            RestoreTask::new(format!(
                "{}/grade_items/grade_item/grading_rules/grading_rule",
                activity_path(scope)
            )),
            FAMILY_GRADINGRULE,
        ),
    ];
    if let Scope::Course { .. } = scope {
        tasks.push((RestoreTask::new(root), FAMILY_DISGUISE));
    }
    for (task, family) in &tasks {
        dispatcher.register_all(plugin_handlers(registry, family, cfg, task))?;
    }
    Ok(dispatcher)
}

fn premap(session: &Session<'_>, entity_type: &str, old: i64, new: i64) -> Result<()> {
    if old <= 0 {
        return Ok(());
    }
    match session.set_mapping(entity_type, old, new)? {
        MappingWrite::Conflict { existing } => Err(anyhow!(
            "{} {} already mapped to {}, refusing {}",
            entity_type,
            old,
            existing,
            new
        )),
        _ => Ok(()),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_restore(
    session: &Session<'_>,
    cfg: &SatchelConfig,
    registry: &PluginRegistry,
    archive: &ArchiveReader,
    manifest: &ArchiveManifest,
    course_id: i64,
    course_ctx: i64,
    new_course: bool,
) -> Result<RestoreReport> {
    let db = session.db();
    premap(session, "course", manifest.scope.course_id(), course_id)?;
    premap(session, "context", manifest.course_context_id, course_ctx)?;

    let dispatcher = build_dispatcher(cfg, registry, manifest.scope)?;
    debug!("restore: {} handler path(s)", dispatcher.paths().len());

    // ATTACH and similar setup must run outside the per-record transactions
    for family in registry.families() {
        for plugin in registry.enabled(family, cfg) {
            if let Some(r) = plugin.as_restore() {
                r.before_restore(db)
                    .with_context(|| format!("prepare plugin {}/{}", family, plugin.name()))?;
            }
        }
    }

    let mut ctx = RestoreContext::new(
        session,
        cfg,
        registry.event_resolvers(),
        course_id,
        course_ctx,
        new_course,
    );
    let mut stats = DispatchStats::default();

    let order = restore_order(manifest.scope);
    for name in order {
        let Some(reader) = archive.open_stream(name)? else {
            debug!("restore: stream '{}' not in archive", name);
            continue;
        };
        let s = dispatcher
            .run(PathEvents::new(reader), &mut ctx)
            .with_context(|| format!("restore stream '{}'", name))?;
        debug!(
            "restore: stream '{}': {} persisted, {} skipped, {} unmatched",
            name, s.persisted, s.skipped, s.unmatched
        );
        stats.merge(s);
    }

    let main = order[2];
    if dispatcher.has_late() {
        if let Some(reader) = archive.open_stream(main)? {
            let s = dispatcher
                .run_pass(PathEvents::new(reader), &mut ctx, Pass::Late)
                .with_context(|| format!("restore late records of stream '{}'", main))?;
            debug!(
                "restore: late pass over '{}': {} persisted, {} skipped, {} unmatched",
                main, s.persisted, s.skipped, s.unmatched
            );
            stats.merge(s);
        }
    }

    let DeferredStats {
        resolved,
        nulled,
        dropped,
        errors,
    } = resolve_deferred(&ctx).context("resolve deferred references")?;
    // a dropped row was counted as persisted when its record was dispatched
    stats.persisted = stats.persisted.saturating_sub(dropped);
    stats.skipped += dropped;
    stats.errors.extend(errors);

    Ok(RestoreReport {
        session_id: session.id().to_string(),
        new_course_id: course_id,
        persisted: stats.persisted,
        skipped: stats.skipped,
        unmatched: stats.unmatched,
        unmatched_paths: stats.unmatched_paths.into_iter().collect(),
        record_errors: stats.errors,
        deferred_resolved: resolved,
        deferred_nulled: nulled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_stream_sits_between_scales_and_questions() {
        assert_eq!(
            restore_order(Scope::Course { course_id: 1 }),
            ["users", "scales", "course", "questions", "files"]
        );
        assert_eq!(restore_order(Scope::Activity { course_id: 1, cmid: 2 })[2], "activity");
    }

    #[test]
    fn log_subtree_waits_for_the_late_pass() {
        let registry = PluginRegistry::with_defaults().unwrap();
        let d = build_dispatcher(&SatchelConfig::default(), &registry, Scope::Course { course_id: 1 })
            .unwrap();
        assert!(d.has_late());
        assert!(d.is_late("/course/logs/plugin_logstore_standard/log"));
        assert!(!d.is_late("/course/logsx/log"));
        assert!(!d.is_late("/course/activities/activity"));
        assert!(d.has_handler("/course/logs/plugin_logstore_standard/log"));
    }
}
