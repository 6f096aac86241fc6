//! Tide strip rendering logic for Tidelight
//!
//! This library provides the core logic for turning a measured water height
//! into per-pixel LED colors: unit conversion, the indicator overlay, the
//! breathing blend oscillator, and the bubble sweep state machine. It is
//! hardware-agnostic and can be tested without embedded hardware; the
//! display engine applies the [`PixelWrite`]s it produces to a pixel sink.

pub use rgb::RGB8;

use derive_more::{Display, Error};
use log::warn;
use smallvec::SmallVec;

/// Water height of the first section divider, in inches.
pub const LOW_DIVIDER_INCHES: f64 = 15.0;
/// Water height of the warning section divider, in inches.
pub const WARN_DIVIDER_INCHES: f64 = 20.0;

/// Base gradient color at the bottom of the active range.
pub const GRADIENT_LOW: RGB8 = RGB8 { r: 0, g: 64, b: 128 };
/// Base gradient color at the top of the active range.
pub const GRADIENT_HIGH: RGB8 = RGB8 { r: 154, g: 154, b: 154 };
/// Neutral color for the section divider markers.
pub const DIVIDER_COLOR: RGB8 = RGB8 { r: 192, g: 192, b: 192 };
/// Prediction marker color when the predicted level sits at the strip bottom.
pub const PREDICTION_LOW: RGB8 = RGB8 { r: 255, g: 0, b: 0 };
/// Prediction marker color once the predicted level reaches mid-strip.
pub const PREDICTION_HIGH: RGB8 = RGB8 { r: 0, g: 255, b: 0 };
/// Status flash color for a successful reading.
pub const STATUS_OK: RGB8 = RGB8 { r: 0, g: 255, b: 0 };
/// Status flash color for a failed reading.
pub const STATUS_FAIL: RGB8 = RGB8 { r: 255, g: 0, b: 0 };

/// Output scale applied to indicator pixels (75% of full).
pub const INDICATOR_SCALE: u8 = 191;
/// Full output scale: the sink applies no extra dimming.
pub const FULL_SCALE: u8 = 255;

const OFF: RGB8 = RGB8 { r: 0, g: 0, b: 0 };

/// Linear interpolation between two `u8` color channel values.
///
/// At `t=0.0` returns `a`, at `t=1.0` returns `b`. Rounds to the nearest
/// integer value.
#[inline]
fn lerp_u8(a: u8, b: u8, t: f32) -> u8 {
    debug_assert!(
        (0.0..=1.0).contains(&t),
        "lerp_u8: t={t} outside [0.0, 1.0]"
    );
    let a_f = f32::from(a);
    let b_f = f32::from(b);
    // a,b in [0,255] and t in [0.0,1.0] bound the result to [0.0, 255.0],
    // so the cast back cannot truncate or go negative.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let result = (a_f + (b_f - a_f) * t).round() as u8;
    result
}

/// Linear blend between two colors.
///
/// `progress` is clamped to `[0.0, 1.0]`; each channel is interpolated
/// independently. Total — never fails, for any input.
#[must_use]
pub fn blend(from: RGB8, to: RGB8, progress: f32) -> RGB8 {
    let t = progress.clamp(0.0, 1.0);
    RGB8::new(
        lerp_u8(from.r, to.r, t),
        lerp_u8(from.g, to.g, t),
        lerp_u8(from.b, to.b, t),
    )
}

/// Error returned when an indicator operation addresses a pixel that does
/// not exist on the strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[display("pixel index {index} out of range for a {num_pixels}-pixel strip")]
pub struct IndicatorOutOfRange {
    pub index: usize,
    pub num_pixels: usize,
}

/// Fixed geometry of the strip: pixel count, physical height, and the
/// derived unit conversion plus section divider indices.
///
/// Immutable once constructed; the divider indices are computed once from
/// the fixed inch thresholds and never move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StripGeometry {
    num_pixels: usize,
    physical_height: f64,
    pixels_per_inch: f64,
    low_divider: usize,
    warn_divider: usize,
}

impl StripGeometry {
    /// Build the geometry for a strip of `num_pixels` LEDs spanning
    /// `physical_height` inches of water.
    ///
    /// `physical_height` must exceed [`WARN_DIVIDER_INCHES`] so both
    /// divider indices land on the strip.
    #[must_use]
    pub fn new(num_pixels: usize, physical_height: f64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let pixels_per_inch = num_pixels as f64 / physical_height;
        let mut geometry = Self {
            num_pixels,
            physical_height,
            pixels_per_inch,
            low_divider: 0,
            warn_divider: 0,
        };
        geometry.low_divider = geometry.height_to_pixel(LOW_DIVIDER_INCHES);
        geometry.warn_divider = geometry.height_to_pixel(WARN_DIVIDER_INCHES);
        debug_assert!(
            geometry.low_divider < geometry.warn_divider
                && geometry.warn_divider < num_pixels,
            "divider indices must be strictly ordered within the strip"
        );
        geometry
    }

    /// Convert a water height in inches to a pixel index, truncating toward
    /// zero. Negative and non-finite heights clamp to 0.
    ///
    /// The result is not bounds-checked against the strip length; callers
    /// must guard against indices at or beyond [`Self::num_pixels`].
    #[must_use]
    pub fn height_to_pixel(&self, inches: f64) -> usize {
        if !inches.is_finite() || inches < 0.0 {
            warn!("height {inches} is not a valid water level, clamping to 0");
            return 0;
        }
        // The float-to-int cast truncates toward zero and saturates, so a
        // huge height cannot wrap into a small index.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pixel = (inches * self.pixels_per_inch) as usize;
        pixel
    }

    /// Convert a pixel index back to a water height in inches.
    ///
    /// Inverse of [`Self::height_to_pixel`] up to truncation: the round
    /// trip never overshoots the original height, but is not exact.
    #[must_use]
    pub fn pixel_to_height(&self, pixel: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let height = pixel as f64 / self.pixels_per_inch;
        height
    }

    #[must_use]
    pub fn num_pixels(&self) -> usize {
        self.num_pixels
    }

    #[must_use]
    pub fn pixels_per_inch(&self) -> f64 {
        self.pixels_per_inch
    }

    /// Physical height the strip spans, in inches.
    #[must_use]
    pub fn physical_height(&self) -> f64 {
        self.physical_height
    }

    /// Pixel index of the low section divider.
    #[must_use]
    pub fn low_divider(&self) -> usize {
        self.low_divider
    }

    /// Pixel index of the warning section divider.
    #[must_use]
    pub fn warn_divider(&self) -> usize {
        self.warn_divider
    }
}

/// Per-pixel marker overlay.
///
/// Each cell is `None` (no marker) or a marker color, so a legitimately
/// black marker stays distinguishable from an empty cell. Markers survive
/// across render frames until explicitly cleared or overwritten.
#[derive(Debug, Clone)]
pub struct IndicatorLayer {
    cells: Vec<Option<RGB8>>,
}

impl IndicatorLayer {
    fn new(num_pixels: usize) -> Self {
        Self {
            cells: vec![None; num_pixels],
        }
    }

    /// Place a marker color at `index`.
    pub fn set(&mut self, index: usize, color: RGB8) -> Result<(), IndicatorOutOfRange> {
        let cell = self.cell_mut(index)?;
        *cell = Some(color);
        Ok(())
    }

    /// Remove the marker at `index`, if any.
    pub fn clear(&mut self, index: usize) -> Result<(), IndicatorOutOfRange> {
        let cell = self.cell_mut(index)?;
        *cell = None;
        Ok(())
    }

    /// The marker at `index`, or `None` if the cell is empty or the index
    /// is off the strip.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<RGB8> {
        self.cells.get(index).copied().flatten()
    }

    /// Iterate over the occupied cells as `(index, color)` pairs.
    pub fn iter_set(&self) -> impl Iterator<Item = (usize, RGB8)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, cell)| cell.map(|color| (i, color)))
    }

    fn cell_mut(&mut self, index: usize) -> Result<&mut Option<RGB8>, IndicatorOutOfRange> {
        let num_pixels = self.cells.len();
        self.cells
            .get_mut(index)
            .ok_or(IndicatorOutOfRange { index, num_pixels })
    }

    // Internal writes for indices already guaranteed in range (divider and
    // status indices are invariants of the geometry).
    fn put(&mut self, index: usize, cell: Option<RGB8>) {
        self.cells[index] = cell;
    }
}

/// Number of steps in one breathing ramp; one full cycle is twice this.
const BREATH_STEPS: u16 = 50;

/// The breathing oscillator: a blend intensity walking between 0 and 1 in
/// fixed steps, reversing at the bounds.
///
/// Stored as an integer step counter so the bounds are hit exactly — a
/// fresh oscillator returns to intensity 0.0 after exactly 100 advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breathing {
    step: u16,
    rising: bool,
}

impl Default for Breathing {
    fn default() -> Self {
        Self {
            step: 0,
            rising: true,
        }
    }
}

impl Breathing {
    /// Current blend intensity in `[0.0, 1.0]`.
    #[must_use]
    pub fn intensity(&self) -> f32 {
        f32::from(self.step) / f32::from(BREATH_STEPS)
    }

    /// Whether the intensity is currently climbing.
    #[must_use]
    pub fn is_rising(&self) -> bool {
        self.rising
    }

    /// Advance one frame: step the intensity and reverse at the bounds.
    pub fn advance(&mut self) {
        if self.rising {
            self.step += 1;
            if self.step >= BREATH_STEPS {
                self.step = BREATH_STEPS;
                self.rising = false;
            }
        } else {
            self.step = self.step.saturating_sub(1);
            if self.step == 0 {
                self.rising = true;
            }
        }
    }
}

/// Brightness levels across the bubble window, trailing edge first.
const BUBBLE_WINDOW: [f32; 5] = [0.55, 0.60, 0.75, 0.60, 0.55];

/// The bubble sweep state machine.
///
/// At most one sweep runs at a time; triggering while active is a no-op.
/// The position may leave `[0, pixels_in_use]` by up to two pixels — that
/// overshoot lets the trailing edge of the window run off the strip before
/// the sweep ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BubbleSweep {
    #[default]
    Inactive,
    Active { position: i32, rising: bool },
}

/// One bubble tick: brightness levels to apply at the base gradient color,
/// and whether this tick ended the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleTick {
    /// `(pixel index, brightness)` pairs, already bounds-checked.
    pub window: SmallVec<[(usize, f32); 5]>,
    /// True when the sweep ran past the end of the range and went inactive.
    pub finished: bool,
}

impl BubbleSweep {
    /// Start a sweep from the bottom (rising) or from the waterline
    /// (falling). Ignored while a sweep is already running; returns whether
    /// a new sweep started.
    pub fn trigger(&mut self, rising: bool, pixels_in_use: usize) -> bool {
        if matches!(self, Self::Active { .. }) {
            return false;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let position = if rising { 0 } else { pixels_in_use as i32 };
        *self = Self::Active { position, rising };
        true
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Advance one tick: emit the 5-pixel window at the current position,
    /// step the position, and go inactive once it exits
    /// `[-2, pixels_in_use + 2)`.
    ///
    /// Returns `None` when the sweep is inactive — the bubble tick must not
    /// run at all in that state. Window entries outside `[0, num_pixels)`
    /// are skipped, never emitted.
    pub fn advance(&mut self, pixels_in_use: usize, num_pixels: usize) -> Option<BubbleTick> {
        let Self::Active { position, rising } = *self else {
            return None;
        };

        let mut window = SmallVec::new();
        for (i, &level) in BUBBLE_WINDOW.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let pixel = position + (i as i32 - 2);
            if pixel >= 0 && (pixel as usize) < num_pixels {
                window.push((pixel as usize, level));
            }
        }

        let next = if rising { position + 1 } else { position - 1 };
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let finished = next < -2 || next >= pixels_in_use as i32 + 2;
        *self = if finished {
            Self::Inactive
        } else {
            Self::Active {
                position: next,
                rising,
            }
        };

        Some(BubbleTick { window, finished })
    }
}

/// A single pixel write produced by the rendering core.
///
/// `scale` is the output dimming the sink applies on top of the color
/// (255 = none); it maps onto the sink's dimmed-write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWrite {
    pub index: usize,
    pub color: RGB8,
    pub scale: u8,
}

impl PixelWrite {
    fn off(index: usize) -> Self {
        Self {
            index,
            color: OFF,
            scale: FULL_SCALE,
        }
    }
}

/// All mutable display state: waterline, markers, and both animators.
///
/// Owned exclusively by the display engine task — every mutation happens
/// on that single thread, so none of this needs locking.
#[derive(Debug, Clone)]
pub struct DisplayState {
    geometry: StripGeometry,
    pixels_in_use: usize,
    last_prediction: Option<usize>,
    indicators: IndicatorLayer,
    breathing: Breathing,
    bubble: BubbleSweep,
    tide_rising: bool,
}

impl DisplayState {
    #[must_use]
    pub fn new(geometry: StripGeometry) -> Self {
        Self {
            geometry,
            pixels_in_use: 0,
            last_prediction: None,
            indicators: IndicatorLayer::new(geometry.num_pixels()),
            breathing: Breathing::default(),
            bubble: BubbleSweep::default(),
            tide_rising: true,
        }
    }

    #[must_use]
    pub fn geometry(&self) -> &StripGeometry {
        &self.geometry
    }

    /// Pixels currently representing the measured height.
    #[must_use]
    pub fn pixels_in_use(&self) -> usize {
        self.pixels_in_use
    }

    #[must_use]
    pub fn indicators(&self) -> &IndicatorLayer {
        &self.indicators
    }

    #[must_use]
    pub fn breathing(&self) -> &Breathing {
        &self.breathing
    }

    #[must_use]
    pub fn bubble(&self) -> &BubbleSweep {
        &self.bubble
    }

    #[must_use]
    pub fn last_prediction(&self) -> Option<usize> {
        self.last_prediction
    }

    /// Place a marker color at `index`.
    pub fn set_indicator(&mut self, index: usize, color: RGB8) -> Result<(), IndicatorOutOfRange> {
        self.indicators.set(index, color)
    }

    /// Remove the marker at `index`.
    pub fn clear_indicator(&mut self, index: usize) -> Result<(), IndicatorOutOfRange> {
        self.indicators.clear(index)
    }

    /// The base gradient color at `pixel`: off above the waterline, the
    /// low→high accent gradient below it.
    #[must_use]
    pub fn base_color(&self, pixel: usize) -> RGB8 {
        if pixel >= self.pixels_in_use {
            OFF
        } else {
            #[allow(clippy::cast_precision_loss)]
            let progress = pixel as f32 / self.geometry.num_pixels() as f32;
            blend(GRADIENT_LOW, GRADIENT_HIGH, progress)
        }
    }

    /// Apply a new tide reading: move the waterline, refresh the divider
    /// markers, and place the next-prediction marker.
    ///
    /// Returns the immediate pixel writes (black writes erasing dividers
    /// that fell above the new waterline). The render loop never repaints
    /// cells without markers, so those erases must go out right away.
    pub fn height_update(
        &mut self,
        height: f64,
        next_height: f64,
        rising: bool,
    ) -> SmallVec<[PixelWrite; 2]> {
        let num_pixels = self.geometry.num_pixels();
        let mut writes = SmallVec::new();

        // The previous prediction marker is stale the moment a new reading
        // arrives. Only the cell is cleared; the pixel itself keeps its
        // last rendered color until something repaints it.
        if let Some(previous) = self.last_prediction.take() {
            self.indicators.put(previous, None);
        }

        self.pixels_in_use = self.geometry.height_to_pixel(height).min(num_pixels);
        self.tide_rising = rising;

        // Divider indices are within the strip by geometry construction.
        for divider in [self.geometry.low_divider(), self.geometry.warn_divider()] {
            if self.pixels_in_use > divider {
                self.indicators.put(divider, Some(DIVIDER_COLOR));
            } else {
                self.indicators.put(divider, None);
                writes.push(PixelWrite::off(divider));
            }
        }

        let prediction = self.geometry.height_to_pixel(next_height);
        if prediction < num_pixels {
            #[allow(clippy::cast_precision_loss)]
            let progress = 2.0 * prediction as f32 / num_pixels as f32;
            let color = blend(PREDICTION_LOW, PREDICTION_HIGH, progress);
            self.indicators.put(prediction, Some(color));
            self.last_prediction = Some(prediction);
        }

        writes
    }

    /// Start a bubble sweep in the direction of the last tide reading.
    /// No-op while a sweep is already running; returns whether one started.
    pub fn trigger_bubble(&mut self) -> bool {
        self.bubble.trigger(self.tide_rising, self.pixels_in_use)
    }

    /// Advance the bubble sweep one tick, producing the window writes at
    /// the base gradient color. When the sweep finishes, every pixel above
    /// the waterline is explicitly turned off to erase its residue.
    ///
    /// `None` when no sweep is running.
    pub fn advance_bubble(&mut self) -> Option<Vec<PixelWrite>> {
        let num_pixels = self.geometry.num_pixels();
        let tick = self.bubble.advance(self.pixels_in_use, num_pixels)?;

        let mut writes: Vec<PixelWrite> = tick
            .window
            .iter()
            .map(|&(index, level)| {
                // level is one of the window constants in [0.55, 0.75].
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let scale = (level * 255.0) as u8;
                PixelWrite {
                    index,
                    color: self.base_color(index),
                    scale,
                }
            })
            .collect();

        if tick.finished {
            writes.extend((self.pixels_in_use..num_pixels).map(PixelWrite::off));
        }

        Some(writes)
    }

    /// Light the status pixel (the strip's last pixel) green or red.
    pub fn begin_status(&mut self, success: bool) {
        let status = self.geometry.num_pixels() - 1;
        let color = if success { STATUS_OK } else { STATUS_FAIL };
        self.indicators.put(status, Some(color));
    }

    /// Clear the status pixel; the returned write turns it off on the
    /// strip as well.
    pub fn end_status(&mut self) -> PixelWrite {
        let status = self.geometry.num_pixels() - 1;
        self.indicators.put(status, None);
        PixelWrite::off(status)
    }

    /// Render one frame: blend every marker toward its base gradient color
    /// at the current breathing intensity, then step the oscillator.
    ///
    /// Only pixels carrying markers are written — everything else keeps
    /// its previous output (partial-update discipline).
    pub fn render_frame(&mut self) -> Vec<PixelWrite> {
        let intensity = self.breathing.intensity();
        let writes = self
            .indicators
            .iter_set()
            .map(|(index, color)| PixelWrite {
                index,
                color: blend(color, self.base_color(index), intensity),
                scale: INDICATOR_SCALE,
            })
            .collect();
        self.breathing.advance();
        writes
    }
}
