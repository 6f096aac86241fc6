//! End-to-end test of the display engine task.
//!
//! Exercises the real thread and clock: control calls go in through the
//! handle, pixel writes and flushes come out through a shared recording
//! sink, and assertions run on the collected output.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use rgb::RGB8;
use tidelight_display::sink::PixelSink;
use tidelight_display::{start_display_task, Config};
use tidelight_render_lib::INDICATOR_SCALE;

#[derive(Default)]
struct Recorder {
    writes: Vec<(usize, RGB8, u8)>,
    flushes: usize,
}

/// Sink that can be observed from the test thread while the engine owns
/// its clone.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Recorder>>);

impl PixelSink for SharedSink {
    fn set_pixel(&mut self, index: usize, color: RGB8) {
        self.0.lock().unwrap().writes.push((index, color, 255));
    }

    fn set_pixel_dimmed(&mut self, index: usize, color: RGB8, scale: u8) {
        self.0.lock().unwrap().writes.push((index, color, scale));
    }

    fn flush(&mut self) -> Result<()> {
        self.0.lock().unwrap().flushes += 1;
        Ok(())
    }
}

#[test]
fn engine_renders_updates_and_shuts_down() {
    let sink = SharedSink::default();
    let recorder = sink.clone();
    let config = Config::default();

    let (handle, join) = start_display_task(&config, sink).expect("engine must start");

    // A reading at 10in with a 12in prediction: waterline at pixel 40,
    // dividers (60/80) erased, prediction marker at 48.
    handle.height_update(10.0, 12.0, true);
    std::thread::sleep(Duration::from_millis(150));

    {
        let seen = recorder.0.lock().unwrap();
        assert!(seen.flushes >= 2, "expected periodic flushes, saw {}", seen.flushes);

        let off = RGB8::new(0, 0, 0);
        assert!(seen.writes.contains(&(60, off, 255)), "low divider must be erased");
        assert!(seen.writes.contains(&(80, off, 255)), "warn divider must be erased");
        assert!(
            seen.writes
                .iter()
                .any(|&(index, _, scale)| index == 48 && scale == INDICATOR_SCALE),
            "prediction marker at 48 must render each frame"
        );
        assert!(
            seen.writes.iter().all(|&(index, _, _)| index < 100),
            "no write may leave the strip"
        );
    }

    // A bubble sweep paints its window at bubble brightness levels.
    handle.bubble();
    std::thread::sleep(Duration::from_millis(150));
    {
        let seen = recorder.0.lock().unwrap();
        assert!(
            seen.writes
                .iter()
                .any(|&(index, _, scale)| index < 40 && scale == 191),
            "bubble window center must appear below the waterline"
        );
    }

    // The status flash blocks the caller for the dwell, then clears.
    let started = Instant::now();
    handle.show_status(true);
    let dwell = started.elapsed();
    assert!(dwell >= Duration::from_millis(400), "dwell was {dwell:?}");
    {
        let seen = recorder.0.lock().unwrap();
        let off = RGB8::new(0, 0, 0);
        assert!(seen.writes.contains(&(99, off, 255)), "status pixel must clear");
    }

    // Dropping the handle disconnects the channel and ends the task.
    drop(handle);
    join.join().expect("engine thread must exit cleanly");
}
