//! Tidelight simulator: runs the display engine against a terminal strip
//!
//! Usage: cargo run -p tidelight-sim
//! Generates a synthetic tide cycle and pushes readings into the engine,
//! rendering the strip as a row of colored cells redrawn in place.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use log::info;
use rgb::RGB8;
use tidelight_display::sink::{scale_color, PixelSink};
use tidelight_display::{start_display_task, Config};

#[derive(Parser)]
#[command(name = "tidelight-sim", about = "Run the tide display engine against a terminal strip")]
struct Args {
    /// Number of LEDs on the simulated strip
    #[arg(long, default_value_t = 60)]
    pixels: usize,
    /// Physical height the strip represents (inches)
    #[arg(long, default_value_t = 25.0)]
    height_inches: f64,
    /// Length of one synthetic tide cycle (seconds)
    #[arg(long, default_value_t = 60.0)]
    cycle_secs: f32,
    /// Seconds between tide samples pushed to the display
    #[arg(long, default_value_t = 2.0)]
    sample_secs: f32,
    /// Number of samples to push before exiting (0 = run forever)
    #[arg(long, default_value_t = 0)]
    samples: u32,
}

/// Renders the strip as one line of 24-bit-color cells.
struct TerminalSink {
    cells: Vec<RGB8>,
}

impl TerminalSink {
    fn new(num_pixels: usize) -> Self {
        Self {
            cells: vec![RGB8::default(); num_pixels],
        }
    }
}

impl PixelSink for TerminalSink {
    fn set_pixel(&mut self, index: usize, color: RGB8) {
        if let Some(cell) = self.cells.get_mut(index) {
            *cell = color;
        }
    }

    fn set_pixel_dimmed(&mut self, index: usize, color: RGB8, scale: u8) {
        self.set_pixel(index, scale_color(color, scale));
    }

    fn flush(&mut self) -> Result<()> {
        let mut line = String::with_capacity(self.cells.len() * 20 + 8);
        for cell in &self.cells {
            line.push_str(&format!("\x1b[48;2;{};{};{}m ", cell.r, cell.g, cell.b));
        }
        line.push_str("\x1b[0m\r");
        let mut stdout = io::stdout();
        stdout.write_all(line.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

/// Synthetic tide height: ramp up, hold high, ramp down, hold low.
fn tide_height(elapsed: f32, cycle_secs: f32, min_inches: f32, max_inches: f32) -> f32 {
    let ramp_time = cycle_secs * 0.35;
    let hold_time = cycle_secs * 0.15;
    let phase = elapsed % cycle_secs;

    if phase < ramp_time {
        min_inches + (max_inches - min_inches) * (phase / ramp_time)
    } else if phase < ramp_time + hold_time {
        max_inches
    } else if phase < 2.0 * ramp_time + hold_time {
        let ramp_phase = phase - ramp_time - hold_time;
        max_inches - (max_inches - min_inches) * (ramp_phase / ramp_time)
    } else {
        min_inches
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config {
        num_pixels: args.pixels,
        physical_height_inches: args.height_inches,
        ..Config::default()
    };

    // Config level by default; RUST_LOG still wins when set.
    env_logger::Builder::new()
        .filter_level(config.log_level.as_level_filter())
        .parse_default_env()
        .init();
    config.validate();

    #[allow(clippy::cast_possible_truncation)]
    let max_inches = (config.physical_height_inches * 0.9) as f32;
    let min_inches = 4.0;
    // The prediction marker looks ahead a tenth of a cycle.
    let lookahead = args.cycle_secs * 0.1;

    let sink = TerminalSink::new(config.num_pixels);
    let (display, _engine) = start_display_task(&config, sink)?;
    info!(
        "simulating a {:.0}s tide cycle on {} pixels",
        args.cycle_secs, config.num_pixels
    );

    let started = Instant::now();
    let mut sample = 0u32;
    loop {
        let elapsed = started.elapsed().as_secs_f32();
        let height = tide_height(elapsed, args.cycle_secs, min_inches, max_inches);
        let next = tide_height(elapsed + lookahead, args.cycle_secs, min_inches, max_inches);
        let rising = next >= height;

        display.height_update(f64::from(height), f64::from(next), rising);
        display.bubble();
        // Acknowledge the "read" the way the real feed does; this blocks
        // for the flash dwell while the engine keeps rendering.
        display.show_status(true);

        sample += 1;
        if args.samples != 0 && sample >= args.samples {
            break;
        }
        std::thread::sleep(Duration::from_secs_f32(args.sample_secs));
    }

    println!();
    Ok(())
}
