//! backup/plan — ordered steps of one backup and `backup_to_dir`.
//!
//! Порядок шагов:
//!   main (course | activity) -> questions -> scales -> files -> users
//! main annotates everything the auxiliary steps need; each auxiliary step
//! promotes its entity type to final and reads it back through an
//! annotation-backed source. Users go last because every earlier step may
//! annotate users (log authors, question creators, file owners).

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::path::Path;

use crate::archive::{ArchiveManifest, ArchiveWriter};
use crate::config::SatchelConfig;
use crate::db::Database;
use crate::error::{Outcome, RecordError};
use crate::lms::backup::{file_tree, question_tree, scale_tree, user_tree, TreeBuilder};
use crate::lms::{self, CONTEXT_COURSE, CONTEXT_MODULE};
use crate::plugins::PluginRegistry;
use crate::store::question_bank::QUESTION_CATEGORY;
use crate::store::{annotate_question_categories, QuestionBankSchema, Scope, Session, SessionKind};
use crate::structure::Element;

use super::{BackupDriver, FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStep {
    Main,
    Questions,
    Scales,
    Files,
    Users,
}

impl BackupStep {
    /// Stream (file stem) the step writes.
    pub fn stream_name(&self, scope: Scope) -> &'static str {
        match self {
            BackupStep::Main => match scope {
                Scope::Course { .. } => "course",
                Scope::Activity { .. } => "activity",
            },
            BackupStep::Questions => "questions",
            BackupStep::Scales => "scales",
            BackupStep::Files => "files",
            BackupStep::Users => "users",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub scope: Scope,
    pub steps: Vec<BackupStep>,
}

impl BackupPlan {
    pub fn for_scope(scope: Scope) -> Self {
        Self {
            scope,
            steps: vec![
                BackupStep::Main,
                BackupStep::Questions,
                BackupStep::Scales,
                BackupStep::Files,
                BackupStep::Users,
            ],
        }
    }

    /// Drop the steps switched off in `cfg` (include_files / include_users).
    pub fn configured(mut self, cfg: &SatchelConfig) -> Self {
        self.steps.retain(|s| match s {
            BackupStep::Files => cfg.include_files,
            BackupStep::Users => cfg.include_users,
            _ => true,
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct BackupReport {
    pub session_id: String,
    /// (stream, records) in write order
    pub streams: Vec<(String, u64)>,
    pub record_errors: Vec<RecordError>,
    /// Store entries of the session at the end of the run.
    pub annotations: i64,
}

impl BackupReport {
    pub fn outcome(&self) -> Outcome {
        Outcome::from_warnings(self.record_errors.len())
    }

    pub fn records(&self) -> u64 {
        self.streams.iter().map(|(_, n)| n).sum()
    }
}

/// (root context, course context) of `scope`.
fn scope_contexts(db: &Database, scope: Scope) -> Result<(i64, i64)> {
    let course_ctx = lms::context_id(db, CONTEXT_COURSE, scope.course_id())?
        .ok_or_else(|| anyhow!("course {} has no context", scope.course_id()))?;
    match scope {
        Scope::Course { .. } => Ok((course_ctx, course_ctx)),
        Scope::Activity { cmid, .. } => {
            let module_ctx = lms::context_id(db, CONTEXT_MODULE, cmid)?
                .ok_or_else(|| anyhow!("course module {} has no context", cmid))?;
            Ok((module_ctx, course_ctx))
        }
    }
}

/// Back up `scope` into `out_dir` (created if needed).
///
/// Structural failures abort the session and come back as `Err`;
/// record-level problems are collected in the report.
pub fn backup_to_dir(
    db: &Database,
    cfg: &SatchelConfig,
    registry: &PluginRegistry,
    scope: Scope,
    out_dir: &Path,
) -> Result<BackupReport> {
    info!("backup: start, scope={:?}, out={}", scope, out_dir.display());
    let (context_id, course_context_id) = scope_contexts(db, scope)?;

    let mut session = Session::create(db, SessionKind::Backup, scope)?;
    session.set_keep(cfg.keep_sessions);

    let result = session
        .set_context_id(context_id)
        .map_err(anyhow::Error::from)
        .and_then(|_| {
            let plan = BackupPlan::for_scope(scope).configured(cfg);
            run_plan(&session, cfg, registry, &plan, course_context_id, out_dir)
        });

    match result {
        Ok(report) => {
            session.finish()?;
            info!(
                "backup: done, session={}, records={}, warnings={}",
                report.session_id,
                report.records(),
                report.record_errors.len()
            );
            Ok(report)
        }
        Err(e) => {
            if let Err(ae) = session.abort() {
                warn!("backup: abort failed: {}", ae);
            }
            Err(e)
        }
    }
}

fn run_plan(
    session: &Session<'_>,
    cfg: &SatchelConfig,
    registry: &PluginRegistry,
    plan: &BackupPlan,
    course_context_id: i64,
    out_dir: &Path,
) -> Result<BackupReport> {
    let db = session.db();
    let scope = plan.scope;
    let context_id = session
        .context_id()
        .ok_or_else(|| anyhow!("backup session {} has no context", session.id()))?;

    let mut builder = TreeBuilder::new(db, cfg, registry, scope);
    let main = builder.main_tree().context("build main structure")?;

    let mut manifest = ArchiveManifest::new(session.id(), scope, context_id, course_context_id);
    manifest.plugins = builder.into_contributions();
    let mut archive = ArchiveWriter::create(out_dir, manifest, cfg.compress_streams)?;

    let mut driver = BackupDriver::new(session);
    let mut streams = Vec::with_capacity(plan.steps.len());

    for step in &plan.steps {
        let name = step.stream_name(scope);
        let aux: Element;
        let tree = match step {
            BackupStep::Main => &main,
            BackupStep::Questions => {
                let stats =
                    annotate_question_categories(session, &QuestionBankSchema::default(), context_id)?;
                info!(
                    "backup: question categories: {} direct, {} shared",
                    stats.direct, stats.foreign
                );
                session.promote_to_final(QUESTION_CATEGORY)?;
                aux = question_tree()?;
                &aux
            }
            BackupStep::Scales => {
                session.promote_to_final("grade_item")?;
                aux = scale_tree()?;
                &aux
            }
            BackupStep::Files => {
                session.promote_to_final(FILE)?;
                aux = file_tree()?;
                &aux
            }
            BackupStep::Users => {
                session.promote_to_final("user")?;
                aux = user_tree()?;
                &aux
            }
        };

        let mut w = archive.open_stream(name)?;
        driver
            .run(tree, &mut w)
            .with_context(|| format!("backup step '{}'", name))?;
        let entry = archive.finish_stream(name, w)?;
        streams.push((name.to_string(), entry.records));
    }

    let record_errors = driver.into_errors();
    archive.manifest_mut().record_errors = record_errors.len();
    let annotations = session.entries()?;
    archive.finish()?;

    Ok(BackupReport {
        session_id: session.id().to_string(),
        streams,
        record_errors,
        annotations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_plan_drops_switched_off_steps() {
        let scope = Scope::Course { course_id: 2 };
        let cfg = SatchelConfig::default().with_include_users(false);
        let plan = BackupPlan::for_scope(scope).configured(&cfg);
        assert_eq!(
            plan.steps,
            vec![BackupStep::Main, BackupStep::Questions, BackupStep::Scales, BackupStep::Files]
        );
        assert_eq!(BackupStep::Main.stream_name(scope), "course");
        assert_eq!(
            BackupStep::Main.stream_name(Scope::Activity { course_id: 2, cmid: 3 }),
            "activity"
        );
    }
}
