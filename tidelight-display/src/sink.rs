//! The pixel sink boundary: the one surface the engine uses to reach
//! hardware, plus an adapter for `smart-leds` drivers.

use anyhow::Result;
use rgb::RGB8;
use smart_leds::{brightness, gamma, SmartLedsWrite};

/// Write-only pixel target for the display engine.
///
/// `set_pixel`/`set_pixel_dimmed` stage a color; nothing reaches the strip
/// until `flush`. Indices at or beyond the strip length are ignored — the
/// engine bounds-checks its own writes, so a dropped write here is a
/// sink-side length mismatch, not an engine bug.
pub trait PixelSink {
    fn set_pixel(&mut self, index: usize, color: RGB8);

    /// Stage a color scaled to `scale`/255 of full output.
    fn set_pixel_dimmed(&mut self, index: usize, color: RGB8, scale: u8);

    /// Push the staged buffer to the device in one call.
    fn flush(&mut self) -> Result<()>;
}

/// Scale a color to `scale`/255 of its intensity.
#[must_use]
pub fn scale_color(color: RGB8, scale: u8) -> RGB8 {
    let apply = |channel: u8| {
        #[allow(clippy::cast_possible_truncation)]
        let scaled = (u16::from(channel) * u16::from(scale) / 255) as u8;
        scaled
    };
    RGB8::new(apply(color.r), apply(color.g), apply(color.b))
}

/// [`PixelSink`] adapter over any `smart-leds` driver.
///
/// Buffers the whole strip and writes it on `flush` with gamma correction
/// first, then global brightness, as recommended by the smart-leds docs.
pub struct SmartLedsSink<D> {
    driver: D,
    buffer: Vec<RGB8>,
    brightness: u8,
}

impl<D, E> SmartLedsSink<D>
where
    D: SmartLedsWrite<Color = RGB8, Error = E>,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(driver: D, num_pixels: usize, brightness: u8) -> Self {
        Self {
            driver,
            buffer: vec![RGB8::default(); num_pixels],
            brightness,
        }
    }

    /// Set global brightness (0-255)
    pub fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness;
    }
}

impl<D, E> PixelSink for SmartLedsSink<D>
where
    D: SmartLedsWrite<Color = RGB8, Error = E>,
    E: std::error::Error + Send + Sync + 'static,
{
    fn set_pixel(&mut self, index: usize, color: RGB8) {
        if let Some(slot) = self.buffer.get_mut(index) {
            *slot = color;
        }
    }

    fn set_pixel_dimmed(&mut self, index: usize, color: RGB8, scale: u8) {
        self.set_pixel(index, scale_color(color, scale));
    }

    fn flush(&mut self) -> Result<()> {
        self.driver
            .write(brightness(gamma(self.buffer.iter().copied()), self.brightness))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn scale_color_endpoints() {
        let color = RGB8::new(200, 100, 50);
        assert_eq!(scale_color(color, 255), color);
        assert_eq!(scale_color(color, 0), RGB8::new(0, 0, 0));
    }

    #[test]
    fn scale_color_three_quarters() {
        // 191/255 is the indicator dimming level.
        assert_eq!(scale_color(RGB8::new(255, 0, 128), 191), RGB8::new(191, 0, 95));
    }

    /// Driver that records every frame written to it.
    #[derive(Default)]
    struct MockDriver {
        frames: Vec<Vec<RGB8>>,
    }

    impl SmartLedsWrite for MockDriver {
        type Error = Infallible;
        type Color = RGB8;

        fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
        where
            T: IntoIterator<Item = I>,
            I: Into<Self::Color>,
        {
            self.frames.push(iterator.into_iter().map(Into::into).collect());
            Ok(())
        }
    }

    #[test]
    fn smart_leds_sink_writes_whole_strip_on_flush() {
        let mut sink = SmartLedsSink::new(MockDriver::default(), 8, 255);
        sink.set_pixel(0, RGB8::new(255, 0, 0));
        sink.set_pixel(20, RGB8::new(0, 255, 0)); // off-strip: dropped
        sink.flush().unwrap();

        let frames = &sink.driver.frames;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 8);
        // Full red survives gamma and full brightness unchanged.
        assert_eq!(frames[0][0], RGB8::new(255, 0, 0));
        assert_eq!(frames[0][7], RGB8::new(0, 0, 0));
    }
}
