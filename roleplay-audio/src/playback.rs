//! Gapless playback scheduling with barge-in cancellation
//!
//! Inbound fragments are placed back-to-back on the output device's timeline
//! using a single "next start" cursor. The cursor never runs behind the device
//! clock when a fragment is scheduled, so a late fragment starts "now" instead
//! of in the past, and consecutive fragments never overlap.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::device::{OutputDevice, PlaybackBuffer, PlaybackHandle, SourceId};
use crate::error::{AudioError, Result};

/// Where a fragment landed on the device timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Device time (seconds) the fragment starts at
    pub start: f64,
    /// Fragment length in seconds
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Sequential playback on one output device
pub struct PlaybackScheduler {
    device: Option<Box<dyn OutputDevice>>,
    /// Next start time. Only moves forward, except on interrupt.
    cursor: f64,
    /// Scheduled-but-not-finished sources
    active: BTreeMap<SourceId, Box<dyn PlaybackHandle>>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        debug!("Playback scheduler on a {} Hz output", device.sample_rate());
        Self {
            device: Some(device),
            cursor: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Schedule `buffer` at `max(cursor, now)` and advance the cursor by its
    /// duration. Never blocks.
    pub fn enqueue(&mut self, buffer: &PlaybackBuffer) -> Result<ScheduledSource> {
        let device = self.device.as_mut().ok_or(AudioError::OutputClosed)?;

        let now = device.current_time();
        if self.cursor < now {
            self.cursor = now;
        }

        let id = SourceId(self.next_id);
        self.next_id += 1;

        let start = self.cursor;
        let duration = buffer.duration();
        let handle = device.start(id, buffer, start)?;

        self.active.insert(id, handle);
        self.cursor += duration;

        debug!(
            "Scheduled {} at {:.3}s for {:.3}s ({} active)",
            id,
            start,
            duration,
            self.active.len()
        );

        Ok(ScheduledSource {
            id,
            start,
            duration,
        })
    }

    /// Natural completion of a source. Returns false for ids that were
    /// already stopped or never existed.
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Barge-in: stop every active source, clear the set and reset the
    /// cursor so the next fragment starts at the device's current time.
    pub fn interrupt(&mut self) {
        let stopped = self.active.len();
        for (_, mut handle) in std::mem::take(&mut self.active) {
            handle.stop();
        }
        self.cursor = 0.0;

        if stopped > 0 {
            info!("Playback interrupted, {} queued source(s) stopped", stopped);
        }
    }

    /// Interrupt and release the output device. Idempotent.
    pub fn shutdown(&mut self) {
        self.interrupt();
        if let Some(mut device) = self.device.take() {
            device.close();
            info!("Playback output closed");
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Current device time, or None once shut down
    pub fn device_time(&self) -> Option<f64> {
        self.device.as_ref().map(|d| d.current_time())
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if self.device.is_some() || !self.active.is_empty() {
            warn!("Playback scheduler dropped without shutdown, releasing output");
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Monitor {
        now: Mutex<f64>,
        live_sources: AtomicUsize,
        closed: AtomicBool,
    }

    struct ManualOutput {
        monitor: Arc<Monitor>,
    }

    struct ManualHandle {
        id: SourceId,
        monitor: Arc<Monitor>,
        stopped: bool,
    }

    impl PlaybackHandle for ManualHandle {
        fn id(&self) -> SourceId {
            self.id
        }

        fn stop(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.monitor.live_sources.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl OutputDevice for ManualOutput {
        fn sample_rate(&self) -> u32 {
            24000
        }

        fn current_time(&self) -> f64 {
            *self.monitor.now.lock()
        }

        fn start(
            &mut self,
            id: SourceId,
            _buffer: &PlaybackBuffer,
            _at: f64,
        ) -> Result<Box<dyn PlaybackHandle>> {
            self.monitor.live_sources.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ManualHandle {
                id,
                monitor: Arc::clone(&self.monitor),
                stopped: false,
            }))
        }

        fn close(&mut self) {
            self.monitor.closed.store(true, Ordering::SeqCst);
        }
    }

    fn scheduler() -> (PlaybackScheduler, Arc<Monitor>) {
        let monitor = Arc::new(Monitor::default());
        let output = ManualOutput {
            monitor: Arc::clone(&monitor),
        };
        (PlaybackScheduler::new(Box::new(output)), monitor)
    }

    fn fragment(seconds: f64) -> PlaybackBuffer {
        PlaybackBuffer::new(vec![0.0; (seconds * 24000.0) as usize], 24000)
    }

    #[test]
    fn test_gapless_non_overlapping_schedule() {
        let (mut scheduler, monitor) = scheduler();

        let a = scheduler.enqueue(&fragment(0.5)).unwrap();
        *monitor.now.lock() = 0.1;
        let b = scheduler.enqueue(&fragment(0.25)).unwrap();
        *monitor.now.lock() = 0.3;
        let c = scheduler.enqueue(&fragment(1.0)).unwrap();

        assert_relative_eq!(a.start, 0.0);
        assert_relative_eq!(b.start, a.end());
        assert_relative_eq!(c.start, b.end());

        for (prev, next, now) in [(a, b, 0.1), (b, c, 0.3)] {
            assert!(next.start >= prev.end() - 1e-9);
            assert!(next.start <= prev.end().max(now) + 1e-9);
        }
    }

    #[test]
    fn test_lagging_cursor_snaps_to_device_time() {
        let (mut scheduler, monitor) = scheduler();

        let a = scheduler.enqueue(&fragment(0.5)).unwrap();
        *monitor.now.lock() = 2.0;
        let b = scheduler.enqueue(&fragment(0.5)).unwrap();

        assert!(b.start >= a.end());
        assert_relative_eq!(b.start, 2.0);
        assert_relative_eq!(scheduler.cursor(), 2.5);
    }

    #[test]
    fn test_ended_sources_leave_active_set() {
        let (mut scheduler, _monitor) = scheduler();

        let a = scheduler.enqueue(&fragment(0.1)).unwrap();
        let b = scheduler.enqueue(&fragment(0.1)).unwrap();
        assert_eq!(scheduler.active_count(), 2);

        assert!(scheduler.source_ended(a.id));
        assert!(!scheduler.source_ended(a.id));
        assert_eq!(scheduler.active_count(), 1);

        assert!(scheduler.source_ended(b.id));
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_interrupt_clears_pending_audio() {
        let (mut scheduler, monitor) = scheduler();

        scheduler.enqueue(&fragment(0.5)).unwrap();
        scheduler.enqueue(&fragment(0.5)).unwrap();
        let c = scheduler.enqueue(&fragment(0.5)).unwrap();
        *monitor.now.lock() = 0.2;

        scheduler.interrupt();
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(monitor.live_sources.load(Ordering::SeqCst), 0);

        let d = scheduler.enqueue(&fragment(0.5)).unwrap();
        assert_relative_eq!(d.start, 0.2);
        assert!(d.start < c.end());
    }

    #[test]
    fn test_stale_end_after_interrupt_is_ignored() {
        let (mut scheduler, _monitor) = scheduler();

        let a = scheduler.enqueue(&fragment(0.5)).unwrap();
        scheduler.interrupt();
        let b = scheduler.enqueue(&fragment(0.5)).unwrap();

        assert!(!scheduler.source_ended(a.id));
        assert_eq!(scheduler.active_count(), 1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (mut scheduler, monitor) = scheduler();
        scheduler.shutdown();
        scheduler.shutdown();
        assert!(monitor.closed.load(Ordering::SeqCst));
        assert!(!scheduler.is_open());

        let (mut scheduler, monitor) = self::scheduler();
        scheduler.enqueue(&fragment(0.5)).unwrap();
        scheduler.shutdown();
        scheduler.shutdown();
        assert_eq!(monitor.live_sources.load(Ordering::SeqCst), 0);
        assert!(matches!(
            scheduler.enqueue(&fragment(0.5)),
            Err(AudioError::OutputClosed)
        ));
    }
}
