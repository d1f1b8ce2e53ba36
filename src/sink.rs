//! The [`Sink`] trait and its file-backed implementation.
//!
//! Grounded on `profiler/sink/file.go` in original_source: a background
//! worker goroutine draining a channel, with a ready/drain rendezvous on a
//! second signal channel. The Rust translation keeps the same two-channel
//! shape using `std::sync::mpsc` and a plain `std::thread`, matching the
//! teacher's own preference for bare `std::sync` primitives over an async
//! runtime (`reqray`'s `FinishedCallTreeStore` test helper uses
//! `Arc<Mutex<_>>` + plain threads, not tokio, even though tokio is a
//! dev-dependency used only for exercising instrumented async code).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use crate::error::{PrismError, Result};
use crate::tree::Profile;

/// Consumes finalized profile trees asynchronously, persisting or
/// forwarding each one.
pub trait Sink: Send + Sync {
    /// Prepare resources and block until the background consumer is ready.
    fn open(&mut self, buffer_size: usize) -> Result<()>;

    /// A handle for enqueueing sealed [`Profile`] values. Enqueueing is
    /// non-blocking: if the queue is full the profile is dropped and
    /// logged, never blocking the profiled thread.
    fn input(&self) -> SinkInput;

    /// Signal the consumer to drain remaining items and block until it has
    /// fully stopped.
    fn close(&mut self) -> Result<()>;
}

/// A cheaply cloneable handle producers use to submit completed profiles.
#[derive(Clone)]
pub struct SinkInput {
    sender: SyncSender<Profile>,
}

impl SinkInput {
    pub(crate) fn new(sender: SyncSender<Profile>) -> Self {
        SinkInput { sender }
    }

    /// Enqueue a profile. Non-blocking by contract: a full queue drops the
    /// profile (logged by the caller), matching SPEC_FULL.md §5
    /// ("enqueue is non-blocking by contract").
    pub fn try_send(&self, profile: Profile) -> std::result::Result<(), TrySendError<Profile>> {
        self.sender.try_send(profile)
    }
}

/// Writes one serialized [`Profile`] per invocation under `output_dir`, at
/// `profile-<sanitized-fn-name>-<created-at-nanos>-<id>.json`.
pub struct FileSink {
    output_dir: PathBuf,
    sender: Option<SyncSender<Profile>>,
    ready_rx: Option<Receiver<()>>,
    drain_tx: Option<mpsc::Sender<()>>,
    drain_rx: Option<Receiver<()>>,
    worker: Option<JoinHandle<()>>,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        FileSink {
            output_dir: output_dir.into(),
            sender: None,
            ready_rx: None,
            drain_tx: None,
            drain_rx: None,
            worker: None,
        }
    }
}

impl Sink for FileSink {
    fn open(&mut self, buffer_size: usize) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        tracing::info!(dir = %self.output_dir.display(), "profiler: saving profiles");

        let (profile_tx, profile_rx) = mpsc::sync_channel::<Profile>(buffer_size);
        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let (drain_signal_tx, drain_signal_rx) = mpsc::channel::<()>();
        let (drain_done_tx, drain_done_rx) = mpsc::channel::<()>();

        let output_dir = self.output_dir.clone();
        let worker = thread::Builder::new()
            .name("prism-file-sink".into())
            .spawn(move || {
                let _ = ready_tx.send(());
                for profile in profile_rx.iter() {
                    if let Err(err) = write_profile(&output_dir, &profile) {
                        tracing::error!(error = %err, "profiler: dropping profile after sink I/O failure");
                    }
                }
                let _ = drain_signal_rx.recv();
                let _ = drain_done_tx.send(());
            })
            .expect("failed to spawn sink worker thread");

        // Wait for the worker to signal readiness before returning, per
        // the Sink::open contract.
        let _ = ready_rx.recv();

        self.sender = Some(profile_tx);
        self.ready_rx = None;
        self.drain_tx = Some(drain_signal_tx);
        self.drain_rx = Some(drain_done_rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn input(&self) -> SinkInput {
        SinkInput::new(
            self.sender
                .clone()
                .expect("Sink::input called before Sink::open"),
        )
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the sender closes the channel so the worker's `for`
        // loop over profile_rx.iter() terminates.
        self.sender = None;
        if let Some(drain_tx) = self.drain_tx.take() {
            let _ = drain_tx.send(());
        }
        if let Some(drain_rx) = self.drain_rx.take() {
            let _ = drain_rx.recv();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }
}

fn write_profile(output_dir: &Path, profile: &Profile) -> Result<()> {
    let path = output_path(output_dir, profile);
    let data = serde_json::to_vec(profile)
        .map_err(|e| PrismError::SinkIoFailure(format!("marshalling profile: {e}")))?;
    fs::write(&path, data)
        .map_err(|e| PrismError::SinkIoFailure(format!("could not create output file {path:?}: {e}")))?;
    Ok(())
}

fn sanitize(fn_name: &str) -> String {
    fn_name
        .chars()
        .map(|c| if matches!(c, '.' | '/' | '\\') { '_' } else { c })
        .collect()
}

fn output_path(output_dir: &Path, profile: &Profile) -> PathBuf {
    output_dir.join(format!(
        "profile-{}-{}-{}.json",
        sanitize(&profile.target.fn_name),
        profile.created_at,
        profile.id
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stats::Accumulator;
    use crate::tree::CallMetrics;
    use std::time::Duration;

    fn sample_profile(id: u64) -> Profile {
        let mut acc = Accumulator::new();
        acc.record(Duration::from_millis(1));
        let target = CallMetrics::from_sealed("pkg.f".to_string(), acc.seal(), vec![]);
        Profile::new(id, None, target)
    }

    #[test]
    fn writes_one_file_per_profile_and_sanitizes_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path());
        sink.open(8).unwrap();

        let input = sink.input();
        input.try_send(sample_profile(1)).unwrap();
        sink.close().unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(name.starts_with("profile-pkg_f-"));
        assert!(name.ends_with("-1.json"));
    }

    #[test]
    fn sanitize_replaces_dots_and_slashes() {
        assert_eq!(sanitize("pkg.sub/f\\x"), "pkg_sub_f_x");
    }
}
