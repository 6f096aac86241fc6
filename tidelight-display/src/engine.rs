//! The display engine task.
//!
//! One thread owns all mutable display state. Collaborators post messages
//! through [`DisplayHandle`]; the engine waits with `recv_timeout` until
//! the nearest of its deadlines — the next render frame, the next bubble
//! tick while a sweep is active, and the pending status-flash expiry —
//! then services whatever came due. Nothing else can touch the state, so
//! no locking is involved.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, warn};
use tidelight_render_lib::{DisplayState, PixelWrite, StripGeometry, FULL_SCALE};

use crate::config::Config;
use crate::sink::PixelSink;

/// Bubble sweep advance period, independent of the render frame period.
const BUBBLE_INTERVAL: Duration = Duration::from_millis(25);
/// How long a status flash stays lit.
const STATUS_DWELL: Duration = Duration::from_millis(500);

enum DisplayMessage {
    HeightUpdate {
        height: f64,
        next_height: f64,
        rising: bool,
    },
    Bubble,
    ShowStatus {
        success: bool,
        done: oneshot::Sender<()>,
    },
}

/// Cloneable control-plane handle to the engine task.
///
/// Dropping every handle disconnects the channel and ends the task.
#[derive(Clone)]
pub struct DisplayHandle {
    tx: Sender<DisplayMessage>,
}

impl DisplayHandle {
    /// Push a new tide reading: current height, the next predicted height
    /// (both in inches), and whether the tide is rising.
    pub fn height_update(&self, height: f64, next_height: f64, rising: bool) {
        let _ = self.tx.send(DisplayMessage::HeightUpdate {
            height,
            next_height,
            rising,
        });
    }

    /// Request a bubble sweep in the direction of the last reading.
    pub fn bubble(&self) {
        let _ = self.tx.send(DisplayMessage::Bubble);
    }

    /// Flash the status pixel green (success) or red (failure).
    ///
    /// Blocks the calling thread until the flash has been cleared (the
    /// 500ms dwell) — rendering continues underneath. Returns immediately
    /// if the engine is gone or a later flash supersedes this one.
    pub fn show_status(&self, success: bool) {
        let (done, done_rx) = oneshot::channel();
        if self
            .tx
            .send(DisplayMessage::ShowStatus { success, done })
            .is_err()
        {
            return;
        }
        let _ = done_rx.recv();
    }
}

struct StatusFlash {
    clear_at: Instant,
    done: oneshot::Sender<()>,
}

struct Engine<S> {
    state: DisplayState,
    sink: S,
    frame_interval: Duration,
    next_frame: Instant,
    next_bubble: Option<Instant>,
    status: Option<StatusFlash>,
}

impl<S: PixelSink> Engine<S> {
    fn new(config: &Config, sink: S, now: Instant) -> Self {
        let geometry = StripGeometry::new(config.num_pixels, config.physical_height_inches);
        let frame_interval = Duration::from_millis(config.frame_interval_ms);
        Self {
            state: DisplayState::new(geometry),
            sink,
            frame_interval,
            next_frame: now + frame_interval,
            next_bubble: None,
            status: None,
        }
    }

    fn apply_writes(&mut self, writes: &[PixelWrite]) {
        for write in writes {
            if write.scale == FULL_SCALE {
                self.sink.set_pixel(write.index, write.color);
            } else {
                self.sink.set_pixel_dimmed(write.index, write.color, write.scale);
            }
        }
    }

    fn handle_message(&mut self, message: DisplayMessage, now: Instant) {
        match message {
            DisplayMessage::HeightUpdate {
                height,
                next_height,
                rising,
            } => {
                debug!("height update: {height}in, next {next_height}in, rising={rising}");
                let writes = self.state.height_update(height, next_height, rising);
                self.apply_writes(&writes);
            }
            DisplayMessage::Bubble => {
                if self.state.trigger_bubble() {
                    debug!("bubble sweep started");
                    self.next_bubble = Some(now + BUBBLE_INTERVAL);
                }
            }
            DisplayMessage::ShowStatus { success, done } => {
                debug!("status flash: success={success}");
                // A newer flash supersedes a pending one; dropping the old
                // ack sender unblocks its caller.
                self.state.begin_status(success);
                self.status = Some(StatusFlash {
                    clear_at: now + STATUS_DWELL,
                    done,
                });
            }
        }
    }

    /// The nearest instant at which something needs servicing.
    fn next_deadline(&self) -> Instant {
        let mut deadline = self.next_frame;
        if let Some(bubble) = self.next_bubble {
            deadline = deadline.min(bubble);
        }
        if let Some(status) = &self.status {
            deadline = deadline.min(status.clear_at);
        }
        deadline
    }

    /// Service every deadline that has come due.
    fn service(&mut self, now: Instant) {
        if self.next_bubble.is_some_and(|at| at <= now) {
            match self.state.advance_bubble() {
                Some(writes) => {
                    self.apply_writes(&writes);
                    self.next_bubble = if self.state.bubble().is_active() {
                        Some(now + BUBBLE_INTERVAL)
                    } else {
                        debug!("bubble sweep finished");
                        None
                    };
                }
                None => self.next_bubble = None,
            }
        }

        if self.status.as_ref().is_some_and(|s| s.clear_at <= now) {
            let flash = self.status.take().unwrap();
            let write = self.state.end_status();
            self.apply_writes(&[write]);
            let _ = flash.done.send(());
        }

        if self.next_frame <= now {
            let writes = self.state.render_frame();
            self.apply_writes(&writes);
            if let Err(e) = self.sink.flush() {
                // Best effort: the sink owns its own failure handling.
                warn!("pixel sink flush failed: {e}");
            }
            // Skip any frames missed during a stall rather than bursting
            // to catch up.
            while self.next_frame <= now {
                self.next_frame += self.frame_interval;
            }
        }
    }

    fn run(mut self, rx: &Receiver<DisplayMessage>) {
        info!(
            "display engine started: {} pixels over {:.1}in",
            self.state.geometry().num_pixels(),
            self.state.geometry().physical_height()
        );
        loop {
            let now = Instant::now();
            let timeout = self.next_deadline().saturating_duration_since(now);
            match rx.recv_timeout(timeout) {
                Ok(message) => self.handle_message(message, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("display channel disconnected, exiting task");
                    break;
                }
            }
            self.service(Instant::now());
        }
    }
}

/// Start the display engine on its own thread.
///
/// Call exactly once, after the sink's hardware is initialized. Returns
/// the control handle and the engine thread's join handle.
pub fn start_display_task<S>(config: &Config, sink: S) -> Result<(DisplayHandle, JoinHandle<()>)>
where
    S: PixelSink + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let engine = Engine::new(config, sink, Instant::now());
    let join = thread::Builder::new()
        .name("display".into())
        .spawn(move || engine.run(&rx))?;
    Ok((DisplayHandle { tx }, join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelight_render_lib::{DIVIDER_COLOR, RGB8, STATUS_OK};

    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<(usize, RGB8, u8)>,
        flushes: usize,
    }

    impl PixelSink for RecordingSink {
        fn set_pixel(&mut self, index: usize, color: RGB8) {
            self.writes.push((index, color, FULL_SCALE));
        }

        fn set_pixel_dimmed(&mut self, index: usize, color: RGB8, scale: u8) {
            self.writes.push((index, color, scale));
        }

        fn flush(&mut self) -> Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn test_engine() -> (Engine<RecordingSink>, Instant) {
        let now = Instant::now();
        let engine = Engine::new(&Config::default(), RecordingSink::default(), now);
        (engine, now)
    }

    #[test]
    fn height_update_applies_immediate_erases() {
        let (mut engine, now) = test_engine();
        engine.handle_message(
            DisplayMessage::HeightUpdate {
                height: 10.0,
                next_height: 12.0,
                rising: true,
            },
            now,
        );
        // 40 pixels in use, below both dividers: both get erased now, not
        // at the next frame.
        let off = RGB8::new(0, 0, 0);
        assert_eq!(
            engine.sink.writes,
            vec![(60, off, FULL_SCALE), (80, off, FULL_SCALE)]
        );
        assert_eq!(engine.sink.flushes, 0);
    }

    #[test]
    fn frame_deadline_renders_and_flushes() {
        let (mut engine, now) = test_engine();
        engine.handle_message(
            DisplayMessage::HeightUpdate {
                height: 22.0,
                next_height: 21.0,
                rising: true,
            },
            now,
        );
        engine.sink.writes.clear();

        let frame_at = engine.next_frame;
        engine.service(frame_at);
        assert_eq!(engine.sink.flushes, 1);
        // First frame breathes at intensity 0: markers render as-is.
        assert!(engine
            .sink
            .writes
            .contains(&(60, DIVIDER_COLOR, tidelight_render_lib::INDICATOR_SCALE)));
        assert!(engine.next_frame > frame_at);
    }

    #[test]
    fn bubble_message_schedules_ticks_until_done() {
        let (mut engine, now) = test_engine();
        engine.handle_message(
            DisplayMessage::HeightUpdate {
                height: 10.0,
                next_height: 12.0,
                rising: true,
            },
            now,
        );
        engine.handle_message(DisplayMessage::Bubble, now);
        let first_tick = engine.next_bubble.expect("bubble must be scheduled");
        assert_eq!(first_tick, now + BUBBLE_INTERVAL);

        // A second trigger while active changes nothing.
        engine.handle_message(DisplayMessage::Bubble, now + Duration::from_millis(5));
        assert_eq!(engine.next_bubble, Some(first_tick));

        // Drive ticks to completion: 42 advances for pixels_in_use=40.
        let mut at = first_tick;
        let mut ticks = 0;
        while let Some(deadline) = engine.next_bubble {
            at = at.max(deadline);
            engine.service(at);
            ticks += 1;
            assert!(ticks <= 42);
        }
        assert_eq!(ticks, 42);
        assert!(!engine.state.bubble().is_active());
    }

    #[test]
    fn status_flash_is_a_timed_transition() {
        let (mut engine, now) = test_engine();
        let (done, done_rx) = oneshot::channel();
        engine.handle_message(DisplayMessage::ShowStatus { success: true, done }, now);
        assert_eq!(engine.state.indicators().get(99), Some(STATUS_OK));

        // Before the dwell expires nothing happens.
        engine.service(now + Duration::from_millis(1));
        assert!(engine.status.is_some());
        assert!(done_rx.try_recv().is_err());

        // At the dwell deadline the pixel clears and the caller is acked.
        engine.service(now + STATUS_DWELL);
        assert!(engine.status.is_none());
        assert_eq!(engine.state.indicators().get(99), None);
        assert!(done_rx.try_recv().is_ok());
        let off = RGB8::new(0, 0, 0);
        assert!(engine.sink.writes.contains(&(99, off, FULL_SCALE)));
    }

    #[test]
    fn next_deadline_picks_the_nearest() {
        let (mut engine, now) = test_engine();
        assert_eq!(engine.next_deadline(), engine.next_frame);

        engine.handle_message(DisplayMessage::Bubble, now);
        // No reading yet: pixels_in_use is 0, but the sweep still starts
        // from the bottom and exits quickly.
        let bubble_at = engine.next_bubble.unwrap();
        assert_eq!(engine.next_deadline(), engine.next_frame.min(bubble_at));
    }
}
