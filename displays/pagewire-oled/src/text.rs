//! Text layout
//!
//! Words are laid out left to right from the cursor. With wrapping on, a
//! word that would run past the right edge starts a new line, and so does a
//! glyph that lands too close to it. Glyphs the font does not have are
//! skipped without advancing.

use core::iter;

use crate::font::Font;
use crate::framebuffer::{Canvas, Color};

/// How a string is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TextStyle {
    /// Integer scale factor (1 = native glyph size)
    pub size: u8,
    /// Break lines at the right edge
    pub wrap: bool,
    /// Light background, dark glyphs
    pub inverse: bool,
    /// Blank this many columns at the target position before drawing
    ///
    /// Only [`Canvas::write_string_at`] honours it; [`Canvas::write_string`]
    /// continues from the cursor and never clears.
    pub clear_width: Option<u8>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            size: 1,
            wrap: true,
            inverse: false,
            clear_width: None,
        }
    }
}

impl Canvas {
    fn line_advance<F: Font + ?Sized>(&self, font: &F, size: i32) -> i32 {
        font.height() as i32 * size + self.line_spacing
    }

    /// Render `text` starting at the cursor, leaving the cursor after it
    pub fn write_string<F: Font + ?Sized>(&mut self, font: &F, text: &str, style: &TextStyle) {
        let size = style.size.max(1) as i32;
        let glyph_width = font.width() as i32;
        let advance = self.line_advance(font, size);

        let words: Vec<&str> = text.split(' ').filter(|w| !w.is_empty()).collect();
        let count = words.len() as i32;
        let mut offset = self.cursor_x;

        for word in words {
            // Each word keeps its trailing space
            let chars = word.chars().count() as i32 + 1;
            let span = glyph_width * size * chars + size * (count - 1);
            if style.wrap && count > 1 && offset >= self.width - span {
                offset = 0;
                self.cursor_y += advance;
                self.cursor_x = offset;
            }

            for ch in word.chars().chain(iter::once(' ')) {
                if ch == '\n' {
                    offset = 0;
                    self.cursor_y += advance;
                    self.cursor_x = offset;
                    continue;
                }
                let Some(glyph) = font.glyph(ch) else {
                    continue;
                };
                self.draw_glyph(glyph, size, style.inverse);

                offset += glyph_width * size + self.letter_spacing;
                if style.wrap && offset >= self.width - glyph_width - self.letter_spacing {
                    offset = 0;
                    self.cursor_y += advance;
                }
                self.cursor_x = offset;
            }
        }
    }

    /// Clear the area if asked, move the cursor to (`x`, `y`) and render
    pub fn write_string_at<F: Font + ?Sized>(
        &mut self,
        x: i32,
        y: i32,
        font: &F,
        text: &str,
        style: &TextStyle,
    ) {
        if let Some(width) = style.clear_width {
            let height = self.line_advance(font, style.size.max(1) as i32);
            let background = Color::from(style.inverse);
            self.draw_filled_rectangle(x, y, width as i32, height, background);
        }
        self.set_cursor(x, y);
        self.write_string(font, text, style);
    }

    /// Draw one glyph at the cursor, all eight rows of every column
    fn draw_glyph(&mut self, glyph: &[u8], size: i32, inverse: bool) {
        let (x, y) = (self.cursor_x, self.cursor_y);
        for (i, &column) in glyph.iter().enumerate() {
            let i = i as i32;
            for j in 0..8 {
                let lit = (column >> j) & 1 != 0;
                let color = Color::from(lit != inverse);
                if size == 1 {
                    self.draw_pixel(x + i, y + j, color);
                } else {
                    self.draw_filled_rectangle(x + i * size, y + j * size, size, size, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisplayConfig;
    use crate::font::Font5x7;

    fn canvas(letter_spacing: u8) -> Canvas {
        Canvas::new(&DisplayConfig {
            width: 128,
            height: 64,
            letter_spacing,
            ..DisplayConfig::default()
        })
    }

    fn lit_bounds(c: &Canvas) -> Option<(i32, i32)> {
        let mut max = None;
        for x in 0..128 {
            for y in 0..64 {
                if c.pixel(x, y) {
                    let (mx, my) = max.unwrap_or((0, 0));
                    max = Some((mx.max(x + 1), my.max(y + 1)));
                }
            }
        }
        max
    }

    #[test]
    fn test_two_glyphs_fit_tight_box() {
        let mut c = canvas(0);
        c.write_string(&Font5x7, "AB", &TextStyle::default());
        assert_eq!(lit_bounds(&c), Some((10, 7)));
    }

    #[test]
    fn test_letter_spacing_widens_run() {
        let mut c = canvas(1);
        c.write_string(&Font5x7, "AB", &TextStyle::default());
        assert_eq!(lit_bounds(&c), Some((11, 7)));
        // Advanced past "AB " with one pixel after each glyph
        assert_eq!(c.cursor(), (18, 0));
    }

    #[test]
    fn test_newline_breaks_line() {
        let mut c = canvas(1);
        c.write_string(&Font5x7, "A\nB", &TextStyle::default());
        // Second line starts at 7 + line spacing
        assert!(c.pixel(0, 8 + 1));
        assert_eq!(c.cursor().1, 8);
    }

    #[test]
    fn test_word_wrap() {
        let mut c = canvas(1);
        let text = "aaaaaaaaaaaaaaa bbbbbbbbbbbbbbb";
        c.write_string(&Font5x7, text, &TextStyle::default());
        // The second word does not fit after the first and moves down
        assert_eq!(c.cursor(), (96, 8));
        assert!(c.pixel(0, 8));
    }

    #[test]
    fn test_no_wrap_runs_off_edge() {
        let mut c = canvas(1);
        let style = TextStyle {
            wrap: false,
            ..TextStyle::default()
        };
        c.write_string(&Font5x7, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", &style);
        assert_eq!(c.cursor().1, 0);
    }

    #[test]
    fn test_scaled_glyph() {
        let mut c = canvas(0);
        let style = TextStyle {
            size: 2,
            ..TextStyle::default()
        };
        c.write_string(&Font5x7, "I", &style);
        // 'I' column 2 is 0x7F: rows 0..6 at double size
        assert!(c.pixel(4, 0));
        assert!(c.pixel(5, 13));
        assert!(!c.pixel(4, 14));
    }

    #[test]
    fn test_missing_glyph_is_skipped() {
        let mut c = canvas(1);
        c.write_string(&Font5x7, "é", &TextStyle::default());
        // Only the trailing space advanced the cursor
        assert_eq!(c.cursor(), (6, 0));
        assert!(c.dirty().is_empty());
    }

    #[test]
    fn test_clear_width_ignored_at_cursor() {
        let mut c = canvas(1);
        c.draw_pixel(30, 0, Color::On);
        let style = TextStyle {
            clear_width: Some(40),
            ..TextStyle::default()
        };
        c.write_string(&Font5x7, "A", &style);
        assert!(c.pixel(30, 0));

        c.write_string_at(0, 0, &Font5x7, "A", &style);
        assert!(!c.pixel(30, 0));
    }

    #[test]
    fn test_inverse_with_clear_width() {
        let mut c = canvas(1);
        let style = TextStyle {
            inverse: true,
            clear_width: Some(20),
            wrap: false,
            ..TextStyle::default()
        };
        c.write_string_at(0, 8, &Font5x7, "A", &style);
        // Background lit, glyph pixels dark
        assert!(c.pixel(19, 8));
        assert!(!c.pixel(2, 8 + 4));
        assert!(c.pixel(0, 8));
    }
}
