// Coalescer timing tests: bursts collapse, duplicates drop, the file's
// state at settle time wins, and transient failures are retried a bounded
// number of times. Uses short real timers against temp files.

#[cfg(test)]
mod coalescer_tests {
    use crate::error::{Result, VaultError};
    use crate::index::NoteIndex;
    use crate::note::NoteId;
    use crate::watcher::coalescer::{CoalescerConfig, CoalescerHandle, IndexTarget, SettleTarget};
    use crate::watcher::{FileEvent, FileEventKind, FileStat};
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        upserts: Mutex<Vec<PathBuf>>,
        removes: Mutex<Vec<PathBuf>>,
        failures_left: AtomicU32,
        delay: Option<Duration>,
    }

    impl Recorder {
        fn failing(times: u32) -> Self {
            let recorder = Self::default();
            recorder.failures_left.store(times, Ordering::SeqCst);
            recorder
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        fn upsert_count(&self) -> usize {
            self.upserts.lock().unwrap().len()
        }

        fn remove_count(&self) -> usize {
            self.removes.lock().unwrap().len()
        }
    }

    impl SettleTarget for Recorder {
        fn apply_upsert(&self, path: &Path) -> Result<()> {
            self.upserts.lock().unwrap().push(path.to_path_buf());
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(VaultError::io(
                    path,
                    io::Error::new(io::ErrorKind::Other, "file busy"),
                ));
            }
            Ok(())
        }

        fn apply_remove(&self, path: &Path) {
            self.removes.lock().unwrap().push(path.to_path_buf());
        }
    }

    fn fast_config() -> CoalescerConfig {
        CoalescerConfig {
            debounce: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(50),
            max_retries: 3,
            dedup_window: Duration::from_secs(10),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    fn observed(path: &Path, kind: FileEventKind) -> FileEvent {
        let event = FileEvent::new(path, kind);
        match FileStat::of(path) {
            Some(stat) => event.with_stat(stat),
            None => event,
        }
    }

    #[tokio::test]
    async fn test_burst_collapses_into_one_upsert() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "v1").unwrap();

        let recorder = Arc::new(Recorder::default());
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));

        for i in 0..5 {
            fs::write(&path, format!("version {}", i)).unwrap();
            assert!(handle.send(observed(&path, FileEventKind::Change)));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // Still inside the debounce window of the last event
        assert_eq!(recorder.upsert_count(), 0);

        settle().await;
        assert_eq!(*recorder.upserts.lock().unwrap(), vec![path.clone()]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_separate_paths_settle_independently() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.md");
        let b = tmp.path().join("b.md");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let recorder = Arc::new(Recorder::default());
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));
        handle.send(observed(&a, FileEventKind::Add));
        handle.send(observed(&b, FileEventKind::Add));

        settle().await;
        let mut upserts = recorder.upserts.lock().unwrap().clone();
        upserts.sort();
        assert_eq!(upserts, vec![a, b]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeat_of_applied_state_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "content").unwrap();

        let recorder = Arc::new(Recorder::default());
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));

        handle.send(observed(&path, FileEventKind::Add));
        settle().await;
        assert_eq!(recorder.upsert_count(), 1);

        // Same file state reported again
        handle.send(observed(&path, FileEventKind::Change));
        settle().await;
        assert_eq!(recorder.upsert_count(), 1);

        // A real edit is not a duplicate
        fs::write(&path, "content that is longer now").unwrap();
        handle.send(observed(&path, FileEventKind::Change));
        settle().await;
        assert_eq!(recorder.upsert_count(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unlink_of_missing_file_removes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gone.md");

        let recorder = Arc::new(Recorder::default());
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));
        handle.send(FileEvent::new(&path, FileEventKind::Unlink));

        settle().await;
        assert_eq!(*recorder.removes.lock().unwrap(), vec![path.clone()]);
        assert_eq!(recorder.upsert_count(), 0);

        // Second unlink for the same path repeats the applied outcome
        handle.send(FileEvent::new(&path, FileEventKind::Unlink));
        settle().await;
        assert_eq!(recorder.remove_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_existing_file_wins_over_unlink_intent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");

        let recorder = Arc::new(Recorder::default());
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));

        // Editor-style save: delete, then recreate before the timer fires
        handle.send(FileEvent::new(&path, FileEventKind::Unlink));
        fs::write(&path, "recreated").unwrap();

        settle().await;
        assert_eq!(recorder.upsert_count(), 1);
        assert_eq!(recorder.remove_count(), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_for_vanished_file_removes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "short lived").unwrap();

        let recorder = Arc::new(Recorder::default());
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));
        handle.send(observed(&path, FileEventKind::Add));
        fs::remove_file(&path).unwrap();

        settle().await;
        assert_eq!(recorder.upsert_count(), 0);
        assert_eq!(recorder.remove_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_until_success() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "busy").unwrap();

        let recorder = Arc::new(Recorder::failing(2));
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));
        handle.send(observed(&path, FileEventKind::Change));

        tokio::time::sleep(Duration::from_millis(600)).await;
        // first attempt + two retries, the last one succeeds
        assert_eq!(recorder.upsert_count(), 3);
        assert_eq!(recorder.failures_left.load(Ordering::SeqCst), 0);

        // The success is recorded, so the same state is now a duplicate
        handle.send(observed(&path, FileEventKind::Change));
        settle().await;
        assert_eq!(recorder.upsert_count(), 3);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "never readable").unwrap();

        let recorder = Arc::new(Recorder::failing(3));
        let config = CoalescerConfig {
            max_retries: 2,
            ..fast_config()
        };
        let handle = CoalescerHandle::spawn(config, Arc::clone(&recorder));
        handle.send(observed(&path, FileEventKind::Change));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(recorder.upsert_count(), 3);
        assert_eq!(recorder.failures_left.load(Ordering::SeqCst), 0);

        // Dropped, not stuck: a later event is processed again
        handle.send(observed(&path, FileEventKind::Change));
        settle().await;
        assert_eq!(recorder.upsert_count(), 4);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_event_during_processing_runs_again() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "first").unwrap();

        let recorder = Arc::new(Recorder::slow(Duration::from_millis(200)));
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));
        handle.send(observed(&path, FileEventKind::Change));

        // Debounce has fired; the slow upsert is in flight
        tokio::time::sleep(Duration::from_millis(180)).await;
        assert_eq!(recorder.upsert_count(), 1);

        fs::write(&path, "second, and longer").unwrap();
        handle.send(observed(&path, FileEventKind::Change));

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(recorder.upsert_count(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_discards_pending_timers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "pending").unwrap();

        let recorder = Arc::new(Recorder::default());
        let handle = CoalescerHandle::spawn(fast_config(), Arc::clone(&recorder));
        let sender = handle.sender();
        sender.send(observed(&path, FileEventKind::Add)).unwrap();

        handle.shutdown().await;
        settle().await;

        assert_eq!(recorder.upsert_count(), 0);
        assert!(sender.send(observed(&path, FileEventKind::Change)).is_err());
    }

    #[tokio::test]
    async fn test_index_target_excludes_oversized_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.md");
        fs::write(&path, "# Big\nsmall for now").unwrap();

        let index = Arc::new(NoteIndex::new());
        let target = Arc::new(IndexTarget::new(Arc::clone(&index), 64));
        let handle = CoalescerHandle::spawn(fast_config(), target);

        handle.send(observed(&path, FileEventKind::Add));
        settle().await;
        let id = NoteId::from_path(&path);
        assert_eq!(index.get(&id).unwrap().title, "Big");

        fs::write(&path, "x".repeat(200)).unwrap();
        handle.send(observed(&path, FileEventKind::Change));
        settle().await;
        assert!(index.get(&id).is_none());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_index_target_upserts_and_removes() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("A.md");
        let b = tmp.path().join("B.md");
        fs::write(&b, "target").unwrap();

        let index = Arc::new(NoteIndex::new());
        let target = Arc::new(IndexTarget::new(Arc::clone(&index), 1024));
        let handle = CoalescerHandle::spawn(fast_config(), target);

        handle.send(observed(&b, FileEventKind::Add));
        fs::write(&a, "See [[B]]").unwrap();
        handle.send(observed(&a, FileEventKind::Add));
        settle().await;

        let b_note = index.get(&NoteId::from_path(&b)).unwrap();
        assert_eq!(b_note.backlinks.len(), 1);
        assert_eq!(b_note.backlinks[0].from_note_title, "A");

        fs::remove_file(&a).unwrap();
        handle.send(FileEvent::new(&a, FileEventKind::Unlink));
        settle().await;

        assert!(index.get(&NoteId::from_path(&a)).is_none());
        assert!(index.get(&NoteId::from_path(&b)).unwrap().backlinks.is_empty());
        handle.shutdown().await;
    }
}
