// Bastion — Append-Only Audit Log
//
// Newline-delimited JSON, one entry per line. The file is only ever
// appended to; the single exception is the retention sweep, which rewrites
// the log through a temp file + rename. Readers sort at query time —
// concurrent writers may interleave append order against timestamp order
// and that is tolerated. Malformed lines are skipped with a warning.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Duration, NaiveDate, Utc};

use super::entry::{AuditEntry, AuditFilter};
use super::AuditError;

/// Aggregate statistics over a trailing window.
#[derive(Debug, Clone)]
pub struct AuditStats {
    pub total_events: u64,
    pub success_rate: f64,
    /// Top actors by event count, descending, at most 5.
    pub top_actors: Vec<(String, u64)>,
    /// Top action kinds by event count, descending, at most 5.
    pub top_actions: Vec<(String, u64)>,
    /// Zero-filled per-day counts, oldest day first, one per window day.
    pub events_per_day: Vec<(NaiveDate, u64)>,
}

/// Append-only audit log backed by an NDJSON file.
///
/// Appends are internally synchronized, so one instance may be shared
/// across tasks behind an `Arc`.
pub struct AuditLog {
    path: PathBuf,
    // Guards the append/sweep critical sections against each other.
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. This is the durability-critical write path:
    /// the line is flushed and synced before returning.
    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = serde_json::to_string(entry)?;

        let _guard = self.write_lock.lock().expect("audit write lock poisoned");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;

        Ok(())
    }

    /// Query entries matching the filter, newest first, paginated by
    /// the filter's offset/limit.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries: Vec<AuditEntry> = self
            .read_entries()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let iter = entries.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        })
    }

    /// Statistics over the trailing `window_days` days.
    pub fn stats(&self, window_days: u32) -> Result<AuditStats, AuditError> {
        let now = Utc::now();
        let horizon = now - Duration::days(i64::from(window_days));

        let entries: Vec<AuditEntry> = self
            .read_entries()?
            .into_iter()
            .filter(|e| e.timestamp >= horizon)
            .collect();

        let total = entries.len() as u64;
        let successes = entries.iter().filter(|e| e.success).count() as u64;
        let success_rate = if total == 0 {
            0.0
        } else {
            successes as f64 / total as f64
        };

        let mut by_actor: HashMap<String, u64> = HashMap::new();
        let mut by_action: HashMap<String, u64> = HashMap::new();
        let mut by_day: HashMap<NaiveDate, u64> = HashMap::new();
        for entry in &entries {
            *by_actor.entry(entry.actor.clone()).or_default() += 1;
            *by_action.entry(entry.action.clone()).or_default() += 1;
            *by_day.entry(entry.timestamp.date_naive()).or_default() += 1;
        }

        // Zero-filled series: one bucket per day, oldest first.
        let today = now.date_naive();
        let mut events_per_day = Vec::with_capacity(window_days as usize);
        for offset in (0..window_days).rev() {
            let day = today - Duration::days(i64::from(offset));
            events_per_day.push((day, by_day.get(&day).copied().unwrap_or(0)));
        }

        Ok(AuditStats {
            total_events: total,
            success_rate,
            top_actors: top_n(by_actor, 5),
            top_actions: top_n(by_action, 5),
            events_per_day,
        })
    }

    /// Export filtered entries as CSV. Secret names and values never
    /// appear: the trailing segment of `…:secret:<name>` resources is
    /// masked and metadata is not exported at all.
    pub fn export(&self, path: &Path, filter: &AuditFilter) -> Result<u64, AuditError> {
        let entries = self.query(filter)?;

        let mut out = File::create(path)?;
        writeln!(out, "timestamp,actor,action,resource,success,ip_address")?;
        for entry in &entries {
            writeln!(
                out,
                "{},{},{},{},{},{}",
                csv_field(&entry.timestamp.to_rfc3339()),
                csv_field(&entry.actor),
                csv_field(&entry.action),
                csv_field(&redact_resource(&entry.resource)),
                entry.success,
                csv_field(entry.ip_address.as_deref().unwrap_or("")),
            )?;
        }
        out.flush()?;

        Ok(entries.len() as u64)
    }

    /// Drop entries older than `retention_days`, rewriting the log through
    /// a temp file + rename. Returns how many entries were dropped.
    pub fn retention_sweep(&self, retention_days: u32) -> Result<u64, AuditError> {
        let horizon = Utc::now() - Duration::days(i64::from(retention_days));

        let _guard = self.write_lock.lock().expect("audit write lock poisoned");

        let entries = self.read_entries()?;
        let before = entries.len();
        let kept: Vec<&AuditEntry> = entries.iter().filter(|e| e.timestamp >= horizon).collect();
        let dropped = (before - kept.len()) as u64;

        let tmp_path = self.path.with_extension("sweep.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for entry in &kept {
                let line = serde_json::to_string(entry)?;
                tmp.write_all(line.as_bytes())?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        tracing::info!(dropped, retained = kept.len(), "Audit retention sweep completed");
        Ok(dropped)
    }

    /// Read every parseable entry. Malformed lines are logged and skipped;
    /// a partial log never aborts the whole read.
    fn read_entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(line = lineno + 1, error = %e, "Skipping malformed audit line");
                }
            }
        }
        Ok(entries)
    }
}

/// Mask the secret name in resources shaped like `vault:secret:<name>`.
fn redact_resource(resource: &str) -> String {
    match resource.rsplit_once(':') {
        Some((prefix, _)) if prefix.ends_with("secret") => format!("{}:[REDACTED]", prefix),
        _ => resource.to_string(),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn top_n(counts: HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut pairs: Vec<(String, u64)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.truncate(n);
    pairs
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::SEVERITY_WARNING;

    fn setup() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(&dir.path().join("audit.log"));
        (dir, log)
    }

    #[test]
    fn test_append_then_query_returns_all() {
        let (_dir, log) = setup();
        for i in 0..25 {
            log.append(&AuditEntry::new(&format!("actor-{}", i % 3), "secret_read", "vault", true))
                .unwrap();
        }

        let all = log.query(&AuditFilter::default()).unwrap();
        assert_eq!(all.len(), 25, "query({{}}) must return exactly N entries after N appends");
    }

    #[test]
    fn test_query_newest_first() {
        let (_dir, log) = setup();
        let mut old = AuditEntry::new("a", "x", "r", true);
        old.timestamp = Utc::now() - Duration::hours(5);
        let recent = AuditEntry::new("a", "y", "r", true);

        // Append out of timestamp order; reader must sort.
        log.append(&recent).unwrap();
        log.append(&old).unwrap();

        let results = log.query(&AuditFilter::default()).unwrap();
        assert_eq!(results[0].action, "y");
        assert_eq!(results[1].action, "x");
    }

    #[test]
    fn test_query_pagination() {
        let (_dir, log) = setup();
        for i in 0..10 {
            let mut e = AuditEntry::new("a", &format!("act-{}", i), "r", true);
            e.timestamp = Utc::now() - Duration::minutes(10 - i as i64);
            log.append(&e).unwrap();
        }

        let page = log
            .query(&AuditFilter {
                offset: 2,
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 3);
        // Newest is act-9; offset 2 starts at act-7.
        assert_eq!(page[0].action, "act-7");
        assert_eq!(page[2].action, "act-5");
    }

    #[test]
    fn test_query_filters_by_action_kind() {
        let (_dir, log) = setup();
        log.append(&AuditEntry::new("a", "auth_attempt", "gateway", false)).unwrap();
        log.append(&AuditEntry::new("a", "secret_read", "vault:secret:k", true)).unwrap();

        let auth_only = log
            .query(&AuditFilter {
                action: Some("auth_attempt".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(auth_only.len(), 1);
        assert!(!auth_only[0].success);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (_dir, log) = setup();
        log.append(&AuditEntry::new("a", "x", "r", true)).unwrap();

        // Corrupt the log with a half-written line, then append more.
        {
            let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
            f.write_all(b"{\"timestamp\": \"not json\n").unwrap();
        }
        log.append(&AuditEntry::new("a", "y", "r", true)).unwrap();

        let all = log.query(&AuditFilter::default()).unwrap();
        assert_eq!(all.len(), 2, "Malformed line must be skipped, not abort the read");
    }

    #[test]
    fn test_query_on_missing_file_is_empty() {
        let (_dir, log) = setup();
        assert!(log.query(&AuditFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_stats_window_and_series() {
        let (_dir, log) = setup();

        let mut outside = AuditEntry::new("old", "x", "r", true);
        outside.timestamp = Utc::now() - Duration::days(40);
        log.append(&outside).unwrap();

        for _ in 0..4 {
            log.append(&AuditEntry::new("alice", "secret_read", "vault", true)).unwrap();
        }
        log.append(&AuditEntry::new("bob", "auth_attempt", "gateway", false)).unwrap();

        let stats = log.stats(30).unwrap();
        assert_eq!(stats.total_events, 5, "Entries outside the window are excluded");
        assert!((stats.success_rate - 0.8).abs() < f64::EPSILON);
        assert_eq!(stats.top_actors[0], ("alice".to_string(), 4));
        assert_eq!(stats.top_actions[0], ("secret_read".to_string(), 4));

        assert_eq!(stats.events_per_day.len(), 30, "Series must be zero-filled per day");
        let today = stats.events_per_day.last().unwrap();
        assert_eq!(today.1, 5);
        assert!(stats.events_per_day.iter().take(29).all(|(_, n)| *n == 0));
    }

    #[test]
    fn test_stats_empty_log() {
        let (_dir, log) = setup();
        let stats = log.stats(7).unwrap();
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.events_per_day.len(), 7);
    }

    #[test]
    fn test_retention_sweep_drops_old_entries() {
        let (_dir, log) = setup();

        let mut ancient = AuditEntry::new("a", "x", "r", true);
        ancient.timestamp = Utc::now() - Duration::days(100);
        log.append(&ancient).unwrap();
        log.append(&AuditEntry::new("a", "y", "r", true)).unwrap();

        let dropped = log.retention_sweep(90).unwrap();
        assert_eq!(dropped, 1);

        let remaining = log.query(&AuditFilter::default()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action, "y");
    }

    #[test]
    fn test_export_redacts_secret_names() {
        let (_dir, log) = setup();
        let entry = AuditEntry::new("alice", "secret_read", "vault:secret:PROD_DB_PASSWORD", true)
            .with_severity(SEVERITY_WARNING)
            .with_metadata("value_len", serde_json::json!(32));
        log.append(&entry).unwrap();

        let out = log.path().parent().unwrap().join("export.csv");
        let written = log.export(&out, &AuditFilter::default()).unwrap();
        assert_eq!(written, 1);

        let csv = std::fs::read_to_string(&out).unwrap();
        assert!(csv.starts_with("timestamp,actor,action,resource,success,ip_address"));
        assert!(csv.contains("vault:secret:[REDACTED]"));
        assert!(!csv.contains("PROD_DB_PASSWORD"), "Secret names must never be exported");
        assert!(!csv.contains("value_len"), "Metadata must never be exported");
    }

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_redact_resource_shapes() {
        assert_eq!(redact_resource("vault:secret:API_KEY"), "vault:secret:[REDACTED]");
        assert_eq!(redact_resource("gateway"), "gateway");
        assert_eq!(redact_resource("tool:scan_secrets"), "tool:scan_secrets");
    }

    #[test]
    fn test_concurrent_appends_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(AuditLog::new(&dir.path().join("audit.log")));

        let mut handles = Vec::new();
        for t in 0..8 {
            let log = log.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..20 {
                    log.append(&AuditEntry::new(
                        &format!("thread-{}", t),
                        &format!("op-{}", i),
                        "r",
                        true,
                    ))
                    .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let all = log.query(&AuditFilter::default()).unwrap();
        assert_eq!(all.len(), 160, "Interleaved appends must never lose or corrupt lines");
    }
}
