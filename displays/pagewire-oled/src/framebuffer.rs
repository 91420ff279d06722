//! Page-major framebuffer with dirty tracking
//!
//! One bit per pixel. Byte `x + (y / 8) * width` holds column `x` of page
//! `y / 8`, bit `y % 8` is the row inside the page. Every byte whose value
//! actually changes is remembered until the next synchronization drains it.

use std::collections::BTreeSet;

use crate::config::DisplayConfig;

/// Pixel color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Color {
    Off,
    On,
}

impl Color {
    /// The other color
    pub fn inverted(self) -> Self {
        match self {
            Color::Off => Color::On,
            Color::On => Color::Off,
        }
    }
}

impl From<bool> for Color {
    fn from(on: bool) -> Self {
        if on {
            Color::On
        } else {
            Color::Off
        }
    }
}

/// Pixel layout of a bitmap passed to [`Canvas::draw_bitmap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitmapFormat {
    /// One byte per pixel, row-major; lit when above `threshold`
    Gray8 { threshold: u8 },
    /// One bit per pixel, rows padded to whole bytes, MSB is leftmost
    Mono,
}

/// Framebuffer plus drawing state
#[derive(Debug, Clone)]
pub struct Canvas {
    pub(crate) buffer: Vec<u8>,
    pub(crate) dirty: BTreeSet<usize>,
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) cursor_x: i32,
    pub(crate) cursor_y: i32,
    pub(crate) line_spacing: i32,
    pub(crate) letter_spacing: i32,
}

impl Canvas {
    /// Blank canvas sized for `config`
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            buffer: vec![0; config.buffer_len()],
            dirty: BTreeSet::new(),
            width: config.width as i32,
            height: config.height as i32,
            cursor_x: 0,
            cursor_y: 0,
            line_spacing: config.line_spacing as i32,
            letter_spacing: config.letter_spacing as i32,
        }
    }

    /// Raw page-major bytes
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Offsets changed since the last synchronization, ascending
    pub fn dirty(&self) -> &BTreeSet<usize> {
        &self.dirty
    }

    /// Read one pixel back; out of bounds reads as off
    pub fn pixel(&self, x: i32, y: i32) -> bool {
        match self.index(x, y) {
            Some(index) => self.buffer[index] & (1 << (y % 8)) != 0,
            None => false,
        }
    }

    /// Text cursor
    pub fn cursor(&self) -> (i32, i32) {
        (self.cursor_x, self.cursor_y)
    }

    /// Move the text cursor
    pub fn set_cursor(&mut self, x: i32, y: i32) {
        self.cursor_x = x;
        self.cursor_y = y;
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return None;
        }
        let index = (x + (y / 8) * self.width) as usize;
        // A partial last page has no backing byte
        (index < self.buffer.len()).then_some(index)
    }

    /// Set or clear one pixel
    pub fn draw_pixel(&mut self, x: i32, y: i32, color: Color) {
        let Some(index) = self.index(x, y) else {
            return;
        };
        let bit = 1u8 << (y % 8);
        let before = self.buffer[index];
        let after = match color {
            Color::On => before | bit,
            Color::Off => before & !bit,
        };
        if after != before {
            self.buffer[index] = after;
            self.dirty.insert(index);
        }
    }

    /// Bresenham line, both endpoints included
    pub fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Color) {
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = (y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = (if dx > dy { dx } else { -dy }) / 2;
        let (mut x, mut y) = (x0, y0);

        loop {
            self.draw_pixel(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = err;
            if e2 > -dx {
                err -= dy;
                x += sx;
            }
            if e2 < dy {
                err += dx;
                y += sy;
            }
        }
    }

    /// Solid rectangle, drawn as one vertical line per column
    pub fn draw_filled_rectangle(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color) {
        if w <= 0 || h <= 0 {
            return;
        }
        for column in x..x + w {
            self.draw_line(column, y, column, y + h - 1, color);
        }
    }

    /// Blit a `w` x `h` bitmap with its top-left corner at (`x`, `y`)
    pub fn draw_bitmap(&mut self, x: i32, y: i32, data: &[u8], w: i32, h: i32, format: BitmapFormat) {
        if w <= 0 || h <= 0 {
            return;
        }
        match format {
            BitmapFormat::Gray8 { threshold } => {
                for (i, &value) in data.iter().take((w * h) as usize).enumerate() {
                    let i = i as i32;
                    self.draw_pixel(x + i % w, y + i / w, Color::from(value > threshold));
                }
            }
            BitmapFormat::Mono => {
                let stride = (w + 7) / 8;
                for row in 0..h {
                    for column in 0..w {
                        let Some(&byte) = data.get((row * stride + column / 8) as usize) else {
                            return;
                        };
                        let lit = byte & (0x80 >> (column % 8)) != 0;
                        self.draw_pixel(x + column, y + row, Color::from(lit));
                    }
                }
            }
        }
    }

    /// Zero the whole buffer; only bytes that were set become dirty
    pub fn clear(&mut self) {
        for (index, byte) in self.buffer.iter_mut().enumerate() {
            if *byte != 0 {
                *byte = 0;
                self.dirty.insert(index);
            }
        }
    }

    /// Take the dirty offsets with their current values, leaving the set empty
    pub(crate) fn drain_dirty(&mut self) -> Vec<(usize, u8)> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .map(|index| (index, self.buffer[index]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn canvas() -> Canvas {
        Canvas::new(&DisplayConfig {
            width: 128,
            height: 64,
            ..DisplayConfig::default()
        })
    }

    #[test]
    fn test_pixel_layout() {
        let mut c = canvas();
        c.draw_pixel(3, 10, Color::On);
        // page 1, bit 2
        assert_eq!(c.buffer()[3 + 128], 0b0000_0100);
        assert!(c.dirty().contains(&131));
        assert!(c.pixel(3, 10));
    }

    #[test]
    fn test_partial_page_is_out_of_bounds() {
        let mut c = Canvas::new(&DisplayConfig {
            width: 128,
            height: 30,
            ..DisplayConfig::default()
        });
        c.draw_pixel(127, 29, Color::On);
        assert!(!c.pixel(127, 29));
        assert!(c.dirty().is_empty());
        c.draw_pixel(127, 23, Color::On);
        assert!(c.pixel(127, 23));
    }

    #[test]
    fn test_horizontal_line() {
        let mut c = canvas();
        c.draw_line(0, 32, 127, 32, Color::On);
        for x in 0..128 {
            assert!(c.pixel(x, 32));
        }
        assert_eq!(c.dirty().len(), 128);
    }

    #[test]
    fn test_diagonal_line_endpoints() {
        let mut c = canvas();
        c.draw_line(10, 5, 2, 20, Color::On);
        assert!(c.pixel(10, 5));
        assert!(c.pixel(2, 20));
    }

    #[test]
    fn test_filled_rectangle() {
        let mut c = canvas();
        c.draw_filled_rectangle(4, 4, 3, 2, Color::On);
        let lit = (0..128)
            .flat_map(|x| (0..64).map(move |y| (x, y)))
            .filter(|&(x, y)| c.pixel(x, y))
            .count();
        assert_eq!(lit, 6);
        c.draw_filled_rectangle(0, 0, 0, 5, Color::On);
        c.draw_filled_rectangle(0, 0, 5, 0, Color::On);
        assert!(!c.pixel(0, 0));
    }

    #[test]
    fn test_mono_bitmap() {
        let mut c = canvas();
        // 10 wide, 2 rows: stride of 2 bytes
        let data = [0b1000_0000, 0b0100_0000, 0b0000_0001, 0b0000_0000];
        c.draw_bitmap(0, 0, &data, 10, 2, BitmapFormat::Mono);
        assert!(c.pixel(0, 0));
        assert!(c.pixel(9, 0));
        assert!(c.pixel(7, 1));
        assert!(!c.pixel(8, 1));
    }

    #[test]
    fn test_gray_bitmap() {
        let mut c = canvas();
        let data = [0, 200, 100, 0, 255, 10];
        c.draw_bitmap(5, 5, &data, 3, 2, BitmapFormat::Gray8 { threshold: 127 });
        assert!(!c.pixel(5, 5));
        assert!(c.pixel(6, 5));
        assert!(!c.pixel(7, 5));
        assert!(c.pixel(6, 6));
    }

    #[test]
    fn test_clear_marks_only_changed_bytes() {
        let mut c = canvas();
        c.draw_pixel(0, 0, Color::On);
        c.draw_pixel(100, 60, Color::On);
        let _ = c.drain_dirty();

        c.clear();
        assert!(c.buffer().iter().all(|&b| b == 0));
        assert_eq!(c.dirty().iter().copied().collect::<Vec<_>>(), [0, 100 + 7 * 128]);
    }

    proptest! {
        #[test]
        fn prop_pixel_is_idempotent(x in 0i32..128, y in 0i32..64, on in any::<bool>()) {
            let mut c = canvas();
            c.draw_pixel(x, y, Color::from(on));
            let snapshot = c.buffer().to_vec();
            let _ = c.drain_dirty();

            c.draw_pixel(x, y, Color::from(on));
            prop_assert_eq!(c.buffer(), snapshot.as_slice());
            prop_assert!(c.dirty().is_empty());
        }

        #[test]
        fn prop_out_of_bounds_is_noop(x in -500i32..500, y in -500i32..500) {
            prop_assume!(!(0..128).contains(&x) || !(0..64).contains(&y));
            let mut c = canvas();
            c.draw_pixel(x, y, Color::On);
            prop_assert!(c.buffer().iter().all(|&b| b == 0));
            prop_assert!(c.dirty().is_empty());
        }

        #[test]
        fn prop_clear_reports_exactly_changed(pixels in proptest::collection::vec((0i32..128, 0i32..64), 0..40)) {
            let mut c = canvas();
            for &(x, y) in &pixels {
                c.draw_pixel(x, y, Color::On);
            }
            let before = c.buffer().to_vec();
            let _ = c.drain_dirty();

            c.clear();
            let expected: BTreeSet<usize> = before
                .iter()
                .enumerate()
                .filter(|&(_, &b)| b != 0)
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(c.dirty(), &expected);
            prop_assert!(c.buffer().iter().all(|&b| b == 0));
        }
    }
}
