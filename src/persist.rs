use std::io;
use std::path::Path;

use tokio::sync::{mpsc, oneshot};

use crate::model::{InAppNotification, Reminder};
use crate::settings::NotificationSettings;
use crate::wal::{Record, Wal};

/// The three persisted records, as recovered from the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub notifications: Vec<InAppNotification>,
    pub settings: Option<NotificationSettings>,
    pub reminders: Vec<Reminder>,
}

impl PersistedState {
    /// Fold replayed records: the newest of each kind wins.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut state = Self::default();
        for record in records {
            state.apply(record);
        }
        state
    }

    fn apply(&mut self, record: Record) {
        match record {
            Record::Notifications(n) => self.notifications = n,
            Record::Settings(s) => self.settings = Some(s),
            Record::Reminders(r) => self.reminders = r,
        }
    }

    /// Minimal record set that recreates this state.
    pub fn to_records(&self) -> Vec<Record> {
        let mut records = vec![
            Record::Notifications(self.notifications.clone()),
            Record::Reminders(self.reminders.clone()),
        ];
        if let Some(settings) = &self.settings {
            records.push(Record::Settings(settings.clone()));
        }
        records
    }
}

// ── Group-commit writer ──────────────────────────────────

struct SaveRequest {
    record: Record,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the log and batches saves.
/// 1. Block until the first save arrives.
/// 2. Drain all immediately available saves (the batch window).
/// 3. Append them and fsync once for the whole batch.
/// 4. Respond to all senders.
/// 5. Compact once enough appends have piled up.
async fn writer_loop(
    mut wal: Wal,
    mut rx: mpsc::Receiver<SaveRequest>,
    mut latest: PersistedState,
    compact_threshold: u64,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::PERSIST_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::PERSIST_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for req in batch {
            if result.is_ok() {
                latest.apply(req.record);
            }
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = req.response.send(r);
        }

        if compact_threshold > 0 && wal.appends_since_compact() >= compact_threshold {
            match wal.compact(&latest.to_records()) {
                Ok(()) => tracing::info!(path = %wal.path().display(), "compacted state log"),
                Err(e) => tracing::warn!("state log compaction failed: {e}"),
            }
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[SaveRequest]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for req in batch {
        if let Err(e) = wal.append_buffered(&req.record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

/// Handle to the persistence writer. Cheap to clone.
///
/// Failures are logged and swallowed: in-memory state stays authoritative
/// for the running process.
#[derive(Clone)]
pub struct Persister {
    tx: Option<mpsc::Sender<SaveRequest>>,
}

impl Persister {
    /// Replay the log at `path` and start the writer task. Must run inside a Tokio runtime.
    pub fn open(path: &Path, compact_threshold: u64) -> io::Result<(Self, PersistedState)> {
        let state = PersistedState::from_records(Wal::replay(path)?);
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(writer_loop(wal, rx, state.clone(), compact_threshold));
        tracing::debug!(
            path = %path.display(),
            notifications = state.notifications.len(),
            reminders = state.reminders.len(),
            "state log replayed"
        );
        Ok((Self { tx: Some(tx) }, state))
    }

    /// A persister that drops every save. For in-memory sessions.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn save(&self, record: Record) {
        let Some(tx) = &self.tx else { return };
        let label = record.label();
        let (response, rx) = oneshot::channel();
        let outcome = match tx.send(SaveRequest { record, response }).await {
            Ok(()) => match rx.await {
                Ok(result) => result,
                Err(_) => Err(io::Error::other("state writer dropped response")),
            },
            Err(_) => Err(io::Error::other("state writer shut down")),
        };
        if let Err(e) = outcome {
            metrics::counter!(crate::observability::PERSIST_FAILURES_TOTAL, "record" => label)
                .increment(1);
            tracing::warn!(record = label, "failed to persist state: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NotificationKind;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_log_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("famsched_test_persist");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn note(title: &str) -> InAppNotification {
        let ts = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        InAppNotification::new(NotificationKind::System, title, "", ts)
    }

    #[test]
    fn newest_record_of_each_kind_wins() {
        let mut quiet = NotificationSettings::default();
        quiet.quiet_hours.enabled = true;
        let state = PersistedState::from_records(vec![
            Record::Notifications(vec![note("old")]),
            Record::Settings(NotificationSettings::default()),
            Record::Notifications(vec![note("new"), note("newer")]),
            Record::Settings(quiet.clone()),
        ]);
        assert_eq!(state.notifications.len(), 2);
        assert_eq!(state.notifications[0].title, "new");
        assert_eq!(state.settings, Some(quiet));
        assert!(state.reminders.is_empty());
    }

    #[tokio::test]
    async fn saves_survive_reopen() {
        let path = test_log_path("reopen.wal");
        {
            let (persister, state) = Persister::open(&path, 0).unwrap();
            assert_eq!(state, PersistedState::default());
            persister.save(Record::Notifications(vec![note("first")])).await;
            persister.save(Record::Notifications(vec![note("second")])).await;
        }
        let (_persister, state) = Persister::open(&path, 0).unwrap();
        assert_eq!(state.notifications.len(), 1);
        assert_eq!(state.notifications[0].title, "second");
    }

    #[tokio::test]
    async fn compaction_keeps_latest_state() {
        let path = test_log_path("compaction.wal");
        {
            let (persister, _) = Persister::open(&path, 3).unwrap();
            persister.save(Record::Settings(NotificationSettings::default())).await;
            for i in 0..10 {
                persister
                    .save(Record::Notifications(vec![note(&format!("n{i}"))]))
                    .await;
            }
        }
        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.len() < 11, "log should have been compacted, got {}", replayed.len());
        let state = PersistedState::from_records(replayed);
        assert_eq!(state.notifications[0].title, "n9");
        assert_eq!(state.settings, Some(NotificationSettings::default()));
    }

    #[tokio::test]
    async fn disabled_persister_is_noop() {
        Persister::disabled().save(Record::Reminders(Vec::new())).await;
    }
}
