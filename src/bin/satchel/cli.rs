use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI для Satchel: backup/restore курсов в каталог-архив
#[derive(Parser, Debug)]
#[command(name = "satchel", version, about = "Satchel backup/restore CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create the course data model tables (idempotent)
    InitSchema {
        #[arg(long)]
        db: PathBuf,
    },
    /// Back up a course (or one activity with --cmid) into a directory
    Backup {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        course: i64,
        /// Course module id: activity-scope backup
        #[arg(long)]
        cmid: Option<i64>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        no_users: bool,
        #[arg(long)]
        no_logs: bool,
        #[arg(long)]
        no_files: bool,
        /// gzip the streams
        #[arg(long)]
        compress: bool,
        #[arg(long)]
        json: bool,
    },
    /// Restore an archive directory (new course unless --into-course)
    Restore {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        from: PathBuf,
        /// Existing target course id
        #[arg(long)]
        into_course: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Inspect / drop persisted sessions
    Sessions {
        #[command(subcommand)]
        cmd: SessionsCmd,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionsCmd {
    List {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Drop {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        id: String,
    },
}
