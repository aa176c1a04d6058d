use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod cmd_backup;
mod cmd_init;
mod cmd_restore;
mod cmd_sessions;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug satchel backup ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::InitSchema { db } => cmd_init::exec(db),

        cli::Cmd::Backup {
            db,
            course,
            cmid,
            out,
            no_users,
            no_logs,
            no_files,
            compress,
            json,
        } => cmd_backup::exec(cmd_backup::BackupArgs {
            db,
            course,
            cmid,
            out,
            include_users: !no_users,
            include_logs: !no_logs,
            include_files: !no_files,
            compress,
            json,
        }),

        cli::Cmd::Restore {
            db,
            from,
            into_course,
            json,
        } => cmd_restore::exec(db, from, into_course, json),

        cli::Cmd::Sessions { cmd } => match cmd {
            cli::SessionsCmd::List { db, json } => cmd_sessions::exec_list(db, json),
            cli::SessionsCmd::Drop { db, id } => cmd_sessions::exec_drop(db, id),
        },
    }
}
