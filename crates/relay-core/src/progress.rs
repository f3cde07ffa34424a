//! Transfer progress: sampling, rendering, and reflection into a status message.
//!
//! The transport calls a [`ProgressSink`] with byte counts; the monitor turns
//! those into status text and publishes it on an in-process channel keyed by
//! [`StatusKey`]. A reflector task per status message edits the message from
//! the latest published text at a bounded rate.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{CorrelationId, MessageRef},
    formatting::format_size,
    messaging::port::MessagingPort,
    ports::ProgressSink,
};

const BAR_SEGMENTS: u64 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Download,
    Upload,
}

impl Phase {
    fn headline(self) -> &'static str {
        match self {
            Phase::Download => "📥 Downloading",
            Phase::Upload => "📤 Uploading",
        }
    }
}

/// Identifies one status channel: one phase of one item of one batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatusKey {
    pub correlation: CorrelationId,
    pub item: i32,
    pub phase: Phase,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-process publish/subscribe for status text.
#[derive(Default)]
pub struct ProgressHub {
    channels: Mutex<HashMap<StatusKey, watch::Sender<String>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) the channel for `key` and subscribe to it.
    pub fn open(&self, key: &StatusKey) -> watch::Receiver<String> {
        let mut channels = lock(&self.channels);
        if let Some(tx) = channels.get(key) {
            return tx.subscribe();
        }
        let (tx, rx) = watch::channel(String::new());
        channels.insert(key.clone(), tx);
        rx
    }

    /// Replace the latest text for `key`. No-op when the channel is closed.
    pub fn publish(&self, key: &StatusKey, text: String) -> bool {
        match lock(&self.channels).get(key) {
            Some(tx) => {
                tx.send_replace(text);
                true
            }
            None => false,
        }
    }

    /// Drop the sender; subscribers observe the channel closing.
    pub fn close(&self, key: &StatusKey) {
        lock(&self.channels).remove(key);
    }

    pub fn is_open(&self, key: &StatusKey) -> bool {
        lock(&self.channels).contains_key(key)
    }
}

#[derive(Clone, Copy, Debug)]
struct ProgressRecord {
    started: Instant,
    last_bytes: u64,
    last_sample: Instant,
    speed: f64,
}

/// Turns raw byte counts into rendered status text.
pub struct ProgressMonitor {
    hub: Arc<ProgressHub>,
    sample_every: Duration,
    records: Mutex<HashMap<StatusKey, ProgressRecord>>,
}

impl ProgressMonitor {
    pub fn new(hub: Arc<ProgressHub>, sample_every: Duration) -> Self {
        Self {
            hub,
            sample_every,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    pub fn report(&self, key: &StatusKey, current: u64, total: u64) {
        self.report_at(key, current, total, Instant::now());
    }

    fn report_at(&self, key: &StatusKey, current: u64, total: u64, now: Instant) {
        let speed = {
            let mut records = lock(&self.records);
            let rec = records.entry(key.clone()).or_insert(ProgressRecord {
                started: now,
                last_bytes: 0,
                last_sample: now,
                speed: 0.0,
            });

            let elapsed = now.saturating_duration_since(rec.last_sample);
            if elapsed >= self.sample_every && !elapsed.is_zero() {
                rec.speed = current.saturating_sub(rec.last_bytes) as f64 / elapsed.as_secs_f64();
                rec.last_bytes = current;
                rec.last_sample = now;
            }
            rec.speed
        };

        self.hub
            .publish(key, render_status(key.phase, current, total, speed));

        if current >= total {
            if let Some(rec) = lock(&self.records).remove(key) {
                tracing::debug!(
                    item = key.item,
                    phase = ?key.phase,
                    took_ms = now.saturating_duration_since(rec.started).as_millis() as u64,
                    "transfer phase finished"
                );
            }
            self.hub.close(key);
        }
    }

    /// Callback handed to the transport for one status key.
    pub fn sink(self: &Arc<Self>, key: StatusKey) -> ProgressSink {
        let monitor = Arc::clone(self);
        Arc::new(move |current, total| monitor.report(&key, current, total))
    }

    /// Drop any record and channel left behind by an interrupted transfer.
    pub fn discard(&self, key: &StatusKey) {
        lock(&self.records).remove(key);
        self.hub.close(key);
    }

    #[cfg(test)]
    fn tracked(&self, key: &StatusKey) -> bool {
        lock(&self.records).contains_key(key)
    }
}

/// Filled segments of the 20-segment bar.
pub fn filled_segments(current: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (BAR_SEGMENTS * current.min(total)) / total
}

pub fn render_status(phase: Phase, current: u64, total: u64, speed: f64) -> String {
    let pct = if total > 0 {
        current as f64 * 100.0 / total as f64
    } else {
        0.0
    };
    let filled = filled_segments(current, total) as usize;
    let bar = format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(BAR_SEGMENTS as usize - filled)
    );
    let speed_text = if speed > 0.0 {
        format!("{}/s", format_size(speed))
    } else {
        "Calculating...".to_string()
    };

    format!(
        "{} in Progress\n\n[{bar}] {pct:.1}%\n\n📦 Processed: {} out of {}\n⚡ Speed: {speed_text}\n\nHit /cancel to cancel the process",
        phase.headline(),
        format_size(current as f64),
        format_size(total as f64),
    )
}

/// Timing for status-message reflection.
#[derive(Clone, Copy, Debug)]
pub struct ReflectTiming {
    pub refresh: Duration,
    pub retry: Duration,
}

/// Running reflector task; stop it before deleting the status message.
pub struct Reflector {
    done: CancellationToken,
    task: JoinHandle<()>,
}

impl Reflector {
    pub async fn stop(self) {
        self.done.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "status reflector task failed");
        }
    }
}

/// Mirror the latest text published for `key` into `status`.
///
/// Exits when the channel closes or [`Reflector::stop`] is called.
pub fn spawn_reflector(
    hub: &ProgressHub,
    key: &StatusKey,
    messenger: Arc<dyn MessagingPort>,
    status: MessageRef,
    timing: ReflectTiming,
) -> Reflector {
    let mut rx = hub.open(key);
    let done = CancellationToken::new();
    let stop = done.clone();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let text = rx.borrow_and_update().clone();
            if text.is_empty() {
                continue;
            }

            let pause = match messenger.edit_html(status, &text).await {
                Ok(()) => timing.refresh,
                Err(e) => {
                    tracing::debug!(error = %e, "status edit failed");
                    timing.retry
                }
            };

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    });

    Reflector { done, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId};
    use crate::testing::FakeMessenger;

    fn key(phase: Phase) -> StatusKey {
        StatusKey {
            correlation: CorrelationId("1:1".into()),
            item: 7,
            phase,
        }
    }

    #[test]
    fn quarter_progress_renders_five_segments() {
        assert_eq!(filled_segments(50, 200), 5);
        let text = render_status(Phase::Download, 50, 200, 0.0);
        assert!(text.contains("25.0%"), "{text}");
        assert!(text.contains(&format!("[{}{}]", "█".repeat(5), "░".repeat(15))));
        assert!(text.contains("Calculating..."));
        assert!(text.contains("📥 Downloading"));
        assert!(text.contains("Hit /cancel"));
    }

    #[test]
    fn zero_total_renders_empty_bar() {
        assert_eq!(filled_segments(10, 0), 0);
        assert!(render_status(Phase::Upload, 10, 0, 0.0).contains("0.0%"));
    }

    #[test]
    fn speed_is_sampled_at_most_once_per_window() {
        let hub = Arc::new(ProgressHub::new());
        let monitor = ProgressMonitor::new(hub.clone(), Duration::from_secs(1));
        let k = key(Phase::Download);
        let mut rx = hub.open(&k);

        let t0 = Instant::now();
        monitor.report_at(&k, 0, 10_000, t0);
        monitor.report_at(&k, 500, 10_000, t0 + Duration::from_millis(200));
        assert!(rx.borrow_and_update().contains("Calculating..."));

        monitor.report_at(&k, 2048, 10_000, t0 + Duration::from_secs(2));
        let text = rx.borrow_and_update().clone();
        assert!(text.contains("1.00KB/s"), "{text}");
    }

    #[test]
    fn completion_tears_down_record_and_channel() {
        let hub = Arc::new(ProgressHub::new());
        let monitor = ProgressMonitor::new(hub.clone(), Duration::from_secs(1));
        let k = key(Phase::Upload);
        let rx = hub.open(&k);

        monitor.report(&k, 10, 100);
        assert!(monitor.tracked(&k));
        monitor.report(&k, 100, 100);
        assert!(!monitor.tracked(&k));
        assert!(!hub.is_open(&k));
        assert!(rx.borrow().contains("100.0%"));
    }

    #[tokio::test]
    async fn reflector_edits_status_and_exits_on_close() {
        let hub = Arc::new(ProgressHub::new());
        let messenger = Arc::new(FakeMessenger::default());
        let k = key(Phase::Download);
        let status = MessageRef {
            chat_id: ChatId(1),
            message_id: MessageId(99),
        };

        let reflector = spawn_reflector(
            &hub,
            &k,
            messenger.clone(),
            status,
            ReflectTiming {
                refresh: Duration::from_millis(10),
                retry: Duration::from_millis(10),
            },
        );

        hub.publish(&k, "half way".into());
        for _ in 0..50 {
            if !messenger.edits().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        hub.close(&k);
        reflector.stop().await;

        assert_eq!(messenger.edits(), vec![(status, "half way".to_string())]);
    }
}
