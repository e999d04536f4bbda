//! Append-only record of each exchange with a caller, with read-back for
//! per-caller history, aggregate analytics and retention pruning.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    TextProblem,
    ImageProblem,
    Command,
}

impl EntryKind {
    pub fn is_problem(self) -> bool {
        !matches!(self, Self::Command)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub timestamp: DateTime<Utc>,
    pub caller_id: String,
    pub kind: EntryKind,
    pub content: String,
    /// Serialized solution, or the reply text for commands.
    pub response: Option<serde_json::Value>,
    pub processing_time_ms: u64,
    pub error: Option<String>,
}

/// Aggregate view over the entries recorded since `since`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConversationAnalytics {
    pub since: Option<DateTime<Utc>>,
    pub total_interactions: usize,
    pub unique_callers: usize,
    pub by_kind: BTreeMap<EntryKind, usize>,
    pub errors: usize,
    pub error_rate: f64,
    /// Mean over problem entries; commands are answered without a solve.
    pub mean_processing_time_ms: f64,
}

impl ConversationAnalytics {
    pub fn from_entries<'a>(
        since: DateTime<Utc>,
        entries: impl IntoIterator<Item = &'a ConversationEntry>,
    ) -> Self {
        let mut analytics = Self { since: Some(since), ..Self::default() };
        let mut callers = HashSet::new();
        let mut problem_count = 0_u64;
        let mut problem_millis = 0_u64;

        for entry in entries.into_iter().filter(|entry| entry.timestamp >= since) {
            analytics.total_interactions += 1;
            callers.insert(entry.caller_id.as_str());
            *analytics.by_kind.entry(entry.kind).or_default() += 1;
            if entry.error.is_some() {
                analytics.errors += 1;
            }
            if entry.kind.is_problem() {
                problem_count += 1;
                problem_millis = problem_millis.saturating_add(entry.processing_time_ms);
            }
        }

        analytics.unique_callers = callers.len();
        if analytics.total_interactions > 0 {
            analytics.error_rate = analytics.errors as f64 / analytics.total_interactions as f64;
        }
        if problem_count > 0 {
            analytics.mean_processing_time_ms = problem_millis as f64 / problem_count as f64;
        }
        analytics
    }
}

/// Oldest timestamp kept under a retention of `days`; `None` keeps everything.
pub fn retention_cutoff(now: DateTime<Utc>, days: u64) -> Option<DateTime<Utc>> {
    if days == 0 {
        return None;
    }
    let window = i64::try_from(days).ok().and_then(TimeDelta::try_days);
    Some(window.and_then(|window| now.checked_sub_signed(window)).unwrap_or(DateTime::<Utc>::MIN_UTC))
}

#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn record(&self, entry: ConversationEntry) -> Result<()>;

    /// Up to `limit` entries for one caller, newest first.
    async fn history(&self, _caller_id: &str, _limit: usize) -> Result<Vec<ConversationEntry>> {
        Ok(Vec::new())
    }

    async fn analytics(&self, since: DateTime<Utc>) -> Result<ConversationAnalytics> {
        Ok(ConversationAnalytics::from_entries(since, std::iter::empty()))
    }

    /// Drops entries recorded before `cutoff`; returns how many were removed.
    async fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopConversationLog;

#[async_trait]
impl ConversationLog for NoopConversationLog {
    async fn record(&self, _entry: ConversationEntry) -> Result<()> {
        Ok(())
    }
}

/// Writes one JSON object per line. Appends and rewrites are serialized so
/// concurrent exchanges never interleave within a line.
#[derive(Debug)]
pub struct JsonlConversationLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlConversationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_raw(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => {
                Err(error).with_context(|| format!("failed to read `{}`", self.path.display()))
            }
        }
    }

    async fn read_entries(&self) -> Result<Vec<ConversationEntry>> {
        let raw = {
            let _guard = self.write_lock.lock().await;
            self.read_raw().await?
        };
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };

        let mut malformed = 0_usize;
        let entries = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<ConversationEntry>(line) {
                Ok(entry) => Some(entry),
                Err(_) => {
                    malformed += 1;
                    None
                }
            })
            .collect();

        if malformed > 0 {
            warn!(
                event_name = "agent.conversation_log.malformed_lines",
                path = %self.path.display(),
                malformed,
                "skipped unreadable conversation log lines"
            );
        }
        Ok(entries)
    }
}

#[async_trait]
impl ConversationLog for JsonlConversationLog {
    async fn record(&self, entry: ConversationEntry) -> Result<()> {
        let mut line = serde_json::to_string(&entry).context("failed to serialize conversation entry")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create `{}`", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open `{}`", self.path.display()))?;
        file.write_all(line.as_bytes()).await.context("failed to append conversation entry")?;
        file.flush().await.context("failed to flush conversation log")?;
        Ok(())
    }

    async fn history(&self, caller_id: &str, limit: usize) -> Result<Vec<ConversationEntry>> {
        let mut entries: Vec<ConversationEntry> = self
            .read_entries()
            .await?
            .into_iter()
            .filter(|entry| entry.caller_id == caller_id)
            .collect();
        entries.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn analytics(&self, since: DateTime<Utc>) -> Result<ConversationAnalytics> {
        let entries = self.read_entries().await?;
        Ok(ConversationAnalytics::from_entries(since, &entries))
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let Some(raw) = self.read_raw().await? else {
            return Ok(0);
        };

        let mut kept = String::with_capacity(raw.len());
        let mut removed = 0_usize;
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            // Lines that do not parse carry no timestamp and are kept as is.
            let expired = serde_json::from_str::<ConversationEntry>(line)
                .is_ok_and(|entry| entry.timestamp < cutoff);
            if expired {
                removed += 1;
            } else {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        if removed == 0 {
            return Ok(0);
        }

        let staging = self.path.with_extension("jsonl.tmp");
        fs::write(&staging, kept)
            .await
            .with_context(|| format!("failed to write `{}`", staging.display()))?;
        fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("failed to replace `{}`", self.path.display()))?;

        info!(
            event_name = "agent.conversation_log.pruned",
            path = %self.path.display(),
            removed,
            cutoff = %cutoff,
            "old conversation entries pruned"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    use super::{
        retention_cutoff, ConversationAnalytics, ConversationEntry, ConversationLog, EntryKind,
        JsonlConversationLog, NoopConversationLog,
    };

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap_or_default() + Duration::days(offset)
    }

    fn entry(content: &str) -> ConversationEntry {
        ConversationEntry {
            timestamp: Utc::now(),
            caller_id: "42".to_string(),
            kind: EntryKind::TextProblem,
            content: content.to_string(),
            response: Some(serde_json::json!({"solution_text": "x = 5"})),
            processing_time_ms: 12,
            error: None,
        }
    }

    fn dated(caller: &str, kind: EntryKind, offset: i64, millis: u64, error: Option<&str>) -> ConversationEntry {
        ConversationEntry {
            timestamp: day(offset),
            caller_id: caller.to_string(),
            kind,
            content: format!("entry on day {offset}"),
            response: None,
            processing_time_ms: millis,
            error: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn entries_are_appended_as_json_lines() {
        let dir = TempDir::new().expect("temp dir");
        let log = JsonlConversationLog::new(dir.path().join("nested/conversations.jsonl"));

        log.record(entry("2x + 5 = 15")).await.expect("first append");
        log.record(entry("3 + 4")).await.expect("second append");

        let written = tokio::fs::read_to_string(log.path()).await.expect("log readable");
        let lines: Vec<ConversationEntry> = written
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is an entry"))
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].content, "2x + 5 = 15");
        assert_eq!(lines[1].kind, EntryKind::TextProblem);
        assert!(written.contains(r#""kind":"text_problem""#));
    }

    #[tokio::test]
    async fn history_is_per_caller_newest_first_and_limited() {
        let dir = TempDir::new().expect("temp dir");
        let log = JsonlConversationLog::new(dir.path().join("conversations.jsonl"));
        for (caller, offset) in [("7", 0), ("8", 1), ("7", 2), ("7", 3)] {
            log.record(dated(caller, EntryKind::TextProblem, offset, 10, None)).await.expect("append");
        }
        let mut raw = tokio::fs::read_to_string(log.path()).await.expect("read");
        raw.push_str("not json\n");
        tokio::fs::write(log.path(), raw).await.expect("write malformed line");

        let history = log.history("7", 2).await.expect("history");

        let days: Vec<DateTime<Utc>> = history.iter().map(|entry| entry.timestamp).collect();
        assert_eq!(days, [day(3), day(2)]);
        assert!(history.iter().all(|entry| entry.caller_id == "7"));
    }

    #[tokio::test]
    async fn missing_log_file_reads_as_empty() {
        let dir = TempDir::new().expect("temp dir");
        let log = JsonlConversationLog::new(dir.path().join("absent.jsonl"));

        assert!(log.history("7", 10).await.expect("history").is_empty());
        assert_eq!(log.analytics(day(0)).await.expect("analytics").total_interactions, 0);
        assert_eq!(log.prune_before(day(0)).await.expect("prune"), 0);
    }

    #[test]
    fn analytics_count_kinds_errors_and_mean_solve_time() {
        let entries = [
            dated("1", EntryKind::TextProblem, 0, 100, None),
            dated("1", EntryKind::ImageProblem, 1, 300, Some("ocr failed")),
            dated("2", EntryKind::Command, 1, 0, None),
            dated("3", EntryKind::TextProblem, 2, 200, None),
            dated("4", EntryKind::TextProblem, -5, 9_000, Some("too old")),
        ];

        let analytics = ConversationAnalytics::from_entries(day(0), &entries);

        assert_eq!(analytics.total_interactions, 4);
        assert_eq!(analytics.unique_callers, 3);
        assert_eq!(analytics.by_kind.get(&EntryKind::TextProblem), Some(&2));
        assert_eq!(analytics.by_kind.get(&EntryKind::ImageProblem), Some(&1));
        assert_eq!(analytics.by_kind.get(&EntryKind::Command), Some(&1));
        assert_eq!(analytics.errors, 1);
        assert!((analytics.error_rate - 0.25).abs() < f64::EPSILON);
        assert!((analytics.mean_processing_time_ms - 200.0).abs() < f64::EPSILON);

        let json = serde_json::to_value(&analytics).expect("serializable");
        assert_eq!(json["by_kind"]["image_problem"], 1);
    }

    #[tokio::test]
    async fn prune_drops_only_entries_before_the_cutoff() {
        let dir = TempDir::new().expect("temp dir");
        let log = JsonlConversationLog::new(dir.path().join("conversations.jsonl"));
        for offset in [0, 1, 5, 9] {
            log.record(dated("7", EntryKind::TextProblem, offset, 10, None)).await.expect("append");
        }

        let removed = log.prune_before(day(5)).await.expect("prune");

        assert_eq!(removed, 2);
        let remaining: Vec<DateTime<Utc>> =
            log.history("7", 10).await.expect("history").iter().map(|entry| entry.timestamp).collect();
        assert_eq!(remaining, [day(9), day(5)]);

        log.record(dated("7", EntryKind::Command, 10, 0, None)).await.expect("append after prune");
        assert_eq!(log.analytics(day(0)).await.expect("analytics").total_interactions, 3);
    }

    #[tokio::test]
    async fn noop_log_reports_nothing() {
        let log = NoopConversationLog;

        assert!(log.history("7", 5).await.expect("history").is_empty());
        let analytics = log.analytics(day(0)).await.expect("analytics");
        assert_eq!(analytics.since, Some(day(0)));
        assert_eq!(analytics.total_interactions, 0);
        assert_eq!(log.prune_before(day(0)).await.expect("prune"), 0);
    }

    #[test]
    fn retention_cutoff_counts_back_whole_days() {
        assert_eq!(retention_cutoff(day(90), 90), Some(day(0)));
        assert_eq!(retention_cutoff(day(90), 0), None);
        assert_eq!(retention_cutoff(day(0), u64::MAX), Some(DateTime::<Utc>::MIN_UTC));
    }
}
