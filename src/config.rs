//! Centralized configuration and builder for Satchel.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - SatchelConfig::from_env() reads SATCHEL_* variables over the defaults.
//! - Fluent with_* setters for programmatic overrides (tests, embedding).
//!
//! Plugin enablement:
//! - SATCHEL_ENABLED_<FAMILY>="a,b" restricts family <family> (lowercased)
//!   to the listed plugin names. An empty value disables the whole family.
//! - A family without such a variable has every registered plugin enabled.

use std::collections::BTreeMap;
use std::fmt;

/// Top-level configuration for backup and restore runs.
#[derive(Clone, Debug)]
pub struct SatchelConfig {
    /// Rows fetched per page by streaming sources.
    /// Env: SATCHEL_FETCH_ROWS (default 500, min 1)
    pub fetch_rows: usize,

    /// Durable session store file, attached to every connection.
    /// None keeps the store tables inline in the main database.
    /// Env: SATCHEL_SESSION_STORE = "/path/to/sessions.sqlite"
    pub session_store: Option<String>,

    /// Keep annotation/mapping entries after a session completes (debugging).
    /// Env: SATCHEL_KEEP_SESSIONS = 0|1 (default 0)
    pub keep_sessions: bool,

    /// Backup settings.
    /// Env: SATCHEL_INCLUDE_USERS / SATCHEL_INCLUDE_LOGS / SATCHEL_INCLUDE_FILES (default 1)
    pub include_users: bool,
    pub include_logs: bool,
    pub include_files: bool,

    /// gzip the .jsonl streams in the archive.
    /// Env: SATCHEL_COMPRESS = 0|1 (default 0)
    pub compress_streams: bool,

    /// family -> enabled plugin names. Families absent here are fully enabled.
    pub enabled_plugins: BTreeMap<String, Vec<String>>,

    /// External log database (logstore "database").
    /// Env: SATCHEL_EXTERNAL_LOG_DB, SATCHEL_EXTERNAL_LOG_TABLE (default "log_events")
    pub external_log_db: Option<String>,
    pub external_log_table: String,
}

impl Default for SatchelConfig {
    fn default() -> Self {
        Self {
            fetch_rows: 500,
            session_store: None,
            keep_sessions: false,
            include_users: true,
            include_logs: true,
            include_files: true,
            compress_streams: false,
            enabled_plugins: BTreeMap::new(),
            external_log_db: None,
            external_log_table: "log_events".to_string(),
        }
    }
}

fn parse_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "on" || s == "yes"
}

fn parse_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl SatchelConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SATCHEL_FETCH_ROWS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.fetch_rows = n.max(1);
            }
        }

        if let Ok(v) = std::env::var("SATCHEL_SESSION_STORE") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.session_store = Some(s.to_string());
            }
        }

        if let Ok(v) = std::env::var("SATCHEL_KEEP_SESSIONS") {
            cfg.keep_sessions = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("SATCHEL_INCLUDE_USERS") {
            cfg.include_users = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("SATCHEL_INCLUDE_LOGS") {
            cfg.include_logs = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("SATCHEL_INCLUDE_FILES") {
            cfg.include_files = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("SATCHEL_COMPRESS") {
            cfg.compress_streams = parse_flag(&v);
        }

        for (k, v) in std::env::vars() {
            if let Some(family) = k.strip_prefix("SATCHEL_ENABLED_") {
                if !family.is_empty() {
                    cfg.enabled_plugins
                        .insert(family.to_ascii_lowercase(), parse_list(&v));
                }
            }
        }

        if let Ok(v) = std::env::var("SATCHEL_EXTERNAL_LOG_DB") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.external_log_db = Some(s.to_string());
            }
        }
        if let Ok(v) = std::env::var("SATCHEL_EXTERNAL_LOG_TABLE") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.external_log_table = s.to_string();
            }
        }

        cfg
    }

    /// Is plugin `name` of `family` enabled under this configuration?
    pub fn is_plugin_enabled(&self, family: &str, name: &str) -> bool {
        match self.enabled_plugins.get(family) {
            Some(list) => list.iter().any(|n| n == name),
            None => true,
        }
    }

    pub fn with_fetch_rows(mut self, rows: usize) -> Self {
        self.fetch_rows = rows.max(1);
        self
    }

    pub fn with_session_store<S: Into<String>>(mut self, path: Option<S>) -> Self {
        self.session_store = path.map(Into::into);
        self
    }

    pub fn with_keep_sessions(mut self, on: bool) -> Self {
        self.keep_sessions = on;
        self
    }

    pub fn with_include_users(mut self, on: bool) -> Self {
        self.include_users = on;
        self
    }

    pub fn with_include_logs(mut self, on: bool) -> Self {
        self.include_logs = on;
        self
    }

    pub fn with_include_files(mut self, on: bool) -> Self {
        self.include_files = on;
        self
    }

    pub fn with_compress_streams(mut self, on: bool) -> Self {
        self.compress_streams = on;
        self
    }

    /// Restrict `family` to the given plugin names (empty slice disables the family).
    pub fn with_enabled_plugins<S: AsRef<str>>(mut self, family: &str, names: &[S]) -> Self {
        self.enabled_plugins.insert(
            family.to_string(),
            names.iter().map(|s| s.as_ref().to_string()).collect(),
        );
        self
    }

    /// Drop any restriction for `family` (all registered plugins enabled).
    pub fn with_all_plugins(mut self, family: &str) -> Self {
        self.enabled_plugins.remove(family);
        self
    }

    pub fn with_external_log_db<S: Into<String>>(mut self, path: Option<S>) -> Self {
        self.external_log_db = path.map(Into::into);
        self
    }

    pub fn with_external_log_table<S: Into<String>>(mut self, table: S) -> Self {
        self.external_log_table = table.into();
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> Self {
        self
    }
}

impl fmt::Display for SatchelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins = if self.enabled_plugins.is_empty() {
            "all".to_string()
        } else {
            self.enabled_plugins
                .iter()
                .map(|(fam, names)| format!("{}=[{}]", fam, names.join(",")))
                .collect::<Vec<_>>()
                .join(" ")
        };
        write!(
            f,
            "SatchelConfig {{ \
             fetch_rows: {}, \
             session_store: {}, \
             keep_sessions: {}, \
             include_users: {}, \
             include_logs: {}, \
             include_files: {}, \
             compress_streams: {}, \
             enabled_plugins: {}, \
             external_log_db: {}, \
             external_log_table: {} \
             }}",
            self.fetch_rows,
            self.session_store
                .as_deref()
                .unwrap_or("inline"),
            self.keep_sessions,
            self.include_users,
            self.include_logs,
            self.include_files,
            self.compress_streams,
            plugins,
            self.external_log_db.as_deref().unwrap_or("none"),
            self.external_log_table,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_trims_and_skips_empty() {
        assert_eq!(parse_list(" a, b ,,c"), vec!["a", "b", "c"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn plugin_enablement_defaults_to_all() {
        let cfg = SatchelConfig::default().with_enabled_plugins("logstore", &["standard"]);
        assert!(cfg.is_plugin_enabled("logstore", "standard"));
        assert!(!cfg.is_plugin_enabled("logstore", "legacy"));
        assert!(cfg.is_plugin_enabled("gradingrule", "penalty"));

        let cfg = cfg.with_enabled_plugins::<&str>("disguise", &[]);
        assert!(!cfg.is_plugin_enabled("disguise", "pseudonym"));
    }
}
