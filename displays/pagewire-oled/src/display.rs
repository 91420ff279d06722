//! OLED driver
//!
//! [`Oled`] keeps the framebuffer on the host and mirrors it to the panel.
//! Drawing only touches the [`Canvas`]; nothing reaches the wire until
//! [`Oled::update`] or [`Oled::update_dirty_bytes`] runs. The canvas sits
//! behind its own short-lived lock, separate from the bus, so a snapshot is
//! taken and the dirty set cleared before any byte is transmitted.

use core::cell::{Cell, RefCell};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use log::{debug, info, warn};
use pagewire_i2c::hal::Transport;
use pagewire_i2c::{Bridge, ConfigError, TransactionSink};

use crate::command::{self, cmd, MAX_DATA_CHUNK};
use crate::config::{DisplayConfig, ScreenConfig};
use crate::error::DisplayError;
use crate::font::Font;
use crate::framebuffer::{BitmapFormat, Canvas, Color};
use crate::text::TextStyle;

/// Panel bring-up state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayState {
    /// Init sequence not (successfully) sent yet
    #[default]
    Uninitialized,
    /// Panel configured and in sync with a cleared buffer
    Initialised,
}

/// What a dirty synchronization has to send
enum Pending {
    Nothing,
    Full,
    Bytes(Vec<(usize, u8)>),
}

/// SSD1306/SH1106 panel with a host-side framebuffer
pub struct Oled {
    config: DisplayConfig,
    screen: ScreenConfig,
    canvas: Mutex<CriticalSectionRawMutex, RefCell<Canvas>>,
    state: Mutex<CriticalSectionRawMutex, Cell<DisplayState>>,
}

impl Oled {
    /// Validate `config` and allocate the framebuffer; no bus traffic
    pub fn new(config: DisplayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let screen = ScreenConfig::lookup(config.width, config.height);
        let canvas = Canvas::new(&config);
        debug!(
            "OLED {}x{} at 0x{:02X}, {} byte buffer",
            config.width,
            config.height,
            config.address,
            config.buffer_len()
        );
        Ok(Self {
            config,
            screen,
            canvas: Mutex::new(RefCell::new(canvas)),
            state: Mutex::new(Cell::new(DisplayState::Uninitialized)),
        })
    }

    /// Panel configuration
    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Controller parameters resolved for this resolution
    pub fn screen(&self) -> &ScreenConfig {
        &self.screen
    }

    /// Bring-up state
    pub fn state(&self) -> DisplayState {
        self.state.lock(|s| s.get())
    }

    fn set_state(&self, state: DisplayState) {
        self.state.lock(|s| s.set(state));
    }

    /// Run `f` with the canvas locked
    ///
    /// Never call back into this `Oled` from `f`.
    pub fn with_canvas<R>(&self, f: impl FnOnce(&mut Canvas) -> R) -> R {
        self.canvas.lock(|canvas| f(&mut canvas.borrow_mut()))
    }

    /// Copy of the framebuffer
    pub fn buffer(&self) -> Vec<u8> {
        self.with_canvas(|c| c.buffer().to_vec())
    }

    /// Number of bytes waiting for synchronization
    pub fn dirty_len(&self) -> usize {
        self.with_canvas(|c| c.dirty().len())
    }

    /// Read one pixel back from the framebuffer
    pub fn pixel(&self, x: i32, y: i32) -> bool {
        self.with_canvas(|c| c.pixel(x, y))
    }

    /// Move the text cursor
    pub fn set_cursor(&self, x: i32, y: i32) {
        self.with_canvas(|c| c.set_cursor(x, y));
    }

    /// Set or clear one pixel
    pub fn draw_pixel(&self, x: i32, y: i32, color: Color) {
        self.with_canvas(|c| c.draw_pixel(x, y, color));
    }

    /// Bresenham line, both endpoints included
    pub fn draw_line(&self, x0: i32, y0: i32, x1: i32, y1: i32, color: Color) {
        self.with_canvas(|c| c.draw_line(x0, y0, x1, y1, color));
    }

    /// Solid `w` x `h` rectangle
    pub fn draw_filled_rectangle(&self, x: i32, y: i32, w: i32, h: i32, color: Color) {
        self.with_canvas(|c| c.draw_filled_rectangle(x, y, w, h, color));
    }

    /// Blit a bitmap with its top-left corner at (`x`, `y`)
    pub fn draw_bitmap(&self, x: i32, y: i32, data: &[u8], w: i32, h: i32, format: BitmapFormat) {
        self.with_canvas(|c| c.draw_bitmap(x, y, data, w, h, format));
    }

    /// Blank the framebuffer
    pub fn clear_display(&self) {
        self.with_canvas(|c| c.clear());
    }

    /// Render `text` at the cursor
    pub fn write_string<F: Font + ?Sized>(&self, font: &F, text: &str, style: &TextStyle) {
        self.with_canvas(|c| c.write_string(font, text, style));
    }

    /// Render `text` at (`x`, `y`), pre-clearing if the style asks for it
    pub fn write_string_at<F: Font + ?Sized>(
        &self,
        x: i32,
        y: i32,
        font: &F,
        text: &str,
        style: &TextStyle,
    ) {
        self.with_canvas(|c| c.write_string_at(x, y, font, text, style));
    }

    /// Draw with the canvas locked, then push the changes to the panel
    ///
    /// Drawing finishes before any byte is sent; the transmission is the
    /// same as [`Oled::update_dirty_bytes`].
    pub fn draw_and_sync<S, R>(
        &self,
        sink: &mut S,
        draw: impl FnOnce(&mut Canvas) -> R,
    ) -> Result<R, DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        let result = self.with_canvas(draw);
        self.update_dirty_bytes(sink)?;
        Ok(result)
    }

    /// [`Oled::draw_pixel`] followed by a dirty update
    pub fn draw_pixel_and_sync<S>(
        &self,
        sink: &mut S,
        x: i32,
        y: i32,
        color: Color,
    ) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        self.draw_and_sync(sink, |c| c.draw_pixel(x, y, color))
    }

    /// [`Oled::draw_line`] followed by a dirty update
    pub fn draw_line_and_sync<S>(
        &self,
        sink: &mut S,
        (x0, y0): (i32, i32),
        (x1, y1): (i32, i32),
        color: Color,
    ) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        self.draw_and_sync(sink, |c| c.draw_line(x0, y0, x1, y1, color))
    }

    /// [`Oled::draw_filled_rectangle`] followed by a dirty update
    pub fn draw_filled_rectangle_and_sync<S>(
        &self,
        sink: &mut S,
        (x, y): (i32, i32),
        (w, h): (i32, i32),
        color: Color,
    ) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        self.draw_and_sync(sink, |c| c.draw_filled_rectangle(x, y, w, h, color))
    }

    /// [`Oled::clear_display`] followed by a dirty update
    pub fn clear_display_and_sync<S>(&self, sink: &mut S) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        self.draw_and_sync(sink, Canvas::clear)
    }

    /// [`Oled::write_string`] followed by a dirty update
    pub fn write_string_and_sync<S, F>(
        &self,
        sink: &mut S,
        font: &F,
        text: &str,
        style: &TextStyle,
    ) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
        F: Font + ?Sized,
    {
        self.draw_and_sync(sink, |c| c.write_string(font, text, style))
    }

    /// RAM column of framebuffer column 0
    fn column_base(&self) -> u8 {
        self.config.controller.column_offset() + self.screen.col_offset
    }

    fn command<S>(&self, sink: &mut S, byte: u8) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        sink.send_transaction(&command::command_frame(self.config.address, byte))?;
        Ok(())
    }

    fn go_coordinate<S>(&self, sink: &mut S, page: u8, column: u8) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        for byte in command::go_coordinate(page, column) {
            self.command(sink, byte)?;
        }
        Ok(())
    }

    /// Send the bring-up sequence, then blank the panel
    ///
    /// Every command byte is attempted even after a failure.
    pub fn initialise<S>(&self, sink: &mut S) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        let sequence = command::init_sequence(&self.screen, self.config.external_vcc);
        let mut failed = 0;
        for &byte in sequence.iter() {
            if let Err(e) = self.command(sink, byte) {
                debug!("Init command 0x{:02X} failed: {}", byte, e);
                failed += 1;
            }
        }
        if failed > 0 {
            warn!("{} of {} init commands failed", failed, sequence.len());
        }

        self.clear_display();
        if let Err(e) = self.update(sink) {
            warn!("Initial refresh failed: {}", e);
            failed += match e {
                DisplayError::Communication { failed } => failed,
                DisplayError::Bus(_) => 1,
            };
        }

        if failed > 0 {
            return Err(DisplayError::Communication { failed });
        }
        info!(
            "OLED initialised ({}x{}, {:?})",
            self.config.width, self.config.height, self.config.controller
        );
        self.set_state(DisplayState::Initialised);
        Ok(())
    }

    /// Send the whole framebuffer, page by page
    pub fn update<S>(&self, sink: &mut S) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        let snapshot = self.with_canvas(|c| {
            c.dirty.clear();
            c.buffer.clone()
        });
        let width = self.config.width as usize;
        let mut failed = 0;

        for (page, bytes) in snapshot.chunks(width).enumerate() {
            if let Err(e) = self.go_coordinate(sink, page as u8, self.column_base()) {
                warn!("Page {} address failed, skipping: {}", page, e);
                failed += 1;
                continue;
            }
            for chunk in bytes.chunks(MAX_DATA_CHUNK) {
                let frame = command::data_frame(self.config.address, chunk);
                if sink.send_transaction(&frame).is_err() {
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(DisplayError::Communication { failed });
        }
        Ok(())
    }

    /// Send only the bytes changed since the last synchronization
    ///
    /// Past `buffer_len / dirty_divisor` changed bytes a full [`Oled::update`]
    /// is cheaper than addressing each one.
    pub fn update_dirty_bytes<S>(&self, sink: &mut S) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        let threshold = self.config.buffer_len() / self.config.dirty_divisor as usize;
        let pending = self.with_canvas(|c| {
            if c.dirty.is_empty() {
                Pending::Nothing
            } else if c.dirty.len() > threshold {
                Pending::Full
            } else {
                Pending::Bytes(c.drain_dirty())
            }
        });

        let bytes = match pending {
            Pending::Nothing => return Ok(()),
            Pending::Full => {
                debug!("Dirty set above {} bytes, full refresh", threshold);
                return self.update(sink);
            }
            Pending::Bytes(bytes) => bytes,
        };

        let width = self.config.width as usize;
        let mut failed = 0;
        for (index, value) in bytes {
            let page = (index / width) as u8;
            let column = (index % width) as u8 + self.column_base();
            let result = self.go_coordinate(sink, page, column).and_then(|()| {
                sink.send_transaction(&command::data_frame(self.config.address, &[value]))?;
                Ok(())
            });
            if let Err(e) = result {
                warn!("Dirty byte {} not sent: {}", index, e);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(DisplayError::Communication { failed });
        }
        Ok(())
    }

    /// Set display contrast (0-255)
    pub fn set_contrast<S>(&self, sink: &mut S, contrast: u8) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        self.command(sink, cmd::SET_CONTRAST)?;
        self.command(sink, contrast)
    }

    /// Turn the panel on or off; RAM is retained
    pub fn set_display_on<S>(&self, sink: &mut S, on: bool) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        let byte = if on { cmd::DISPLAY_ON } else { cmd::DISPLAY_OFF };
        self.command(sink, byte)
    }

    /// Invert display colors in hardware
    pub fn set_inverted<S>(&self, sink: &mut S, inverted: bool) -> Result<(), DisplayError>
    where
        S: TransactionSink + ?Sized,
    {
        let byte = if inverted {
            cmd::INVERSE_DISPLAY
        } else {
            cmd::NORMAL_DISPLAY
        };
        self.command(sink, byte)
    }

    /// [`Oled::initialise`] over a shared bridge
    pub async fn initialise_on<T: Transport>(&self, bridge: &Bridge<T>) -> Result<(), DisplayError> {
        bridge.with_bus(|bus| self.initialise(bus)).await
    }

    /// [`Oled::update_dirty_bytes`] over a shared bridge
    pub async fn sync<T: Transport>(&self, bridge: &Bridge<T>) -> Result<(), DisplayError> {
        bridge.with_bus(|bus| self.update_dirty_bytes(bus)).await
    }

    /// [`Oled::update`] over a shared bridge
    pub async fn refresh<T: Transport>(&self, bridge: &Bridge<T>) -> Result<(), DisplayError> {
        bridge.with_bus(|bus| self.update(bus)).await
    }

    /// [`Oled::draw_and_sync`] over a shared bridge, under one bus lock
    pub async fn draw_and_sync_on<T, R>(
        &self,
        bridge: &Bridge<T>,
        draw: impl FnOnce(&mut Canvas) -> R,
    ) -> Result<R, DisplayError>
    where
        T: Transport,
    {
        bridge.with_bus(|bus| self.draw_and_sync(bus, draw)).await
    }

    /// Re-initialise the panel every time the bridge comes up
    pub async fn register_init<T: Transport>(self: &Arc<Self>, bridge: &Bridge<T>) {
        let oled = Arc::clone(self);
        bridge
            .register_init_action(move |bus| oled.initialise(bus).is_ok())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Controller;
    use crate::font::Font5x7;
    use embassy_futures::block_on;
    use pagewire_i2c::sim::SimTransport;
    use pagewire_i2c::{BridgeConfig, BusError};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Vec<u8>>,
        failing: BTreeSet<usize>,
    }

    impl TransactionSink for Recorder {
        fn send_transaction(&mut self, bytes: &[u8]) -> Result<(), BusError> {
            let n = self.frames.len();
            self.frames.push(bytes.to_vec());
            if self.failing.contains(&n) {
                Err(BusError::Nack.at(1))
            } else {
                Ok(())
            }
        }
    }

    fn oled(controller: Controller) -> Oled {
        Oled::new(DisplayConfig {
            width: 128,
            height: 64,
            controller,
            ..DisplayConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_unusable_configs() {
        let bad = [
            DisplayConfig {
                height: 30,
                ..DisplayConfig::default()
            },
            DisplayConfig {
                width: 0,
                ..DisplayConfig::default()
            },
            DisplayConfig {
                dirty_divisor: 0,
                ..DisplayConfig::default()
            },
            DisplayConfig {
                width: 255,
                controller: Controller::Sh1106,
                ..DisplayConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(Oled::new(config), Err(ConfigError::Invalid(_))),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn test_widest_sh1106_columns_fit() {
        let oled = Oled::new(DisplayConfig {
            width: 253,
            height: 8,
            controller: Controller::Sh1106,
            ..DisplayConfig::default()
        })
        .unwrap();
        oled.draw_pixel(252, 0, Color::On);
        let mut sink = Recorder::default();
        oled.update_dirty_bytes(&mut sink).unwrap();
        // Column 254 = 0xFE
        assert_eq!(sink.frames[1], [0x3C, 0x00, 0x0E]);
        assert_eq!(sink.frames[2], [0x3C, 0x00, 0x1F]);
    }

    #[test]
    fn test_draw_and_sync_sends_changes() {
        let oled = oled(Controller::Ssd1306);
        let mut sink = Recorder::default();
        oled.draw_pixel_and_sync(&mut sink, 5, 0, Color::On).unwrap();
        assert_eq!(
            sink.frames,
            vec![
                vec![0x3C, 0x00, 0xB0],
                vec![0x3C, 0x00, 0x05],
                vec![0x3C, 0x00, 0x10],
                vec![0x3C, 0x40, 0x01],
            ]
        );
        assert_eq!(oled.dirty_len(), 0);

        sink.frames.clear();
        oled.draw_line_and_sync(&mut sink, (0, 8), (3, 8), Color::On)
            .unwrap();
        assert_eq!(sink.frames.len(), 4 * 4);

        sink.frames.clear();
        oled.write_string_and_sync(&mut sink, &Font5x7, "A", &TextStyle::default())
            .unwrap();
        assert!(!sink.frames.is_empty());
        assert_eq!(oled.dirty_len(), 0);

        sink.frames.clear();
        oled.draw_filled_rectangle_and_sync(&mut sink, (0, 0), (128, 64), Color::On)
            .unwrap();
        // Whole screen changed: one full refresh
        assert_eq!(sink.frames.len(), 8 * 5);

        sink.frames.clear();
        oled.clear_display_and_sync(&mut sink).unwrap();
        assert_eq!(sink.frames.len(), 8 * 5);
        assert!(oled.buffer().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_draw_and_sync_reports_failures() {
        let oled = oled(Controller::Ssd1306);
        let mut sink = Recorder {
            failing: [3].into_iter().collect(),
            ..Recorder::default()
        };
        let err = oled.draw_pixel_and_sync(&mut sink, 0, 0, Color::On).unwrap_err();
        assert_eq!(err, DisplayError::Communication { failed: 1 });
        assert!(oled.pixel(0, 0));
        assert_eq!(oled.dirty_len(), 0);
    }

    const SCREEN_128X64: ScreenConfig = crate::config::SCREEN_CONFIGS[1];

    #[test]
    fn test_initialise_frames() {
        let oled = oled(Controller::Ssd1306);
        let mut sink = Recorder::default();
        oled.initialise(&mut sink).unwrap();

        let sequence = command::init_sequence(&SCREEN_128X64, true);
        for (frame, &byte) in sink.frames.iter().zip(sequence.iter()) {
            assert_eq!(frame.as_slice(), &[0x3C, 0x00, byte]);
        }
        // 25 init commands, then 8 pages of 3 address commands + 2 data chunks
        assert_eq!(sink.frames.len(), 25 + 8 * 5);
        assert_eq!(oled.state(), DisplayState::Initialised);
    }

    #[test]
    fn test_initialise_keeps_going_after_failure() {
        let oled = oled(Controller::Ssd1306);
        let mut sink = Recorder {
            failing: [3].into_iter().collect(),
            ..Recorder::default()
        };
        let err = oled.initialise(&mut sink).unwrap_err();
        assert_eq!(err, DisplayError::Communication { failed: 1 });
        assert_eq!(sink.frames.len(), 25 + 8 * 5);
        assert_eq!(oled.state(), DisplayState::Uninitialized);
    }

    #[test]
    fn test_full_update_layout() {
        let oled = oled(Controller::Ssd1306);
        oled.draw_pixel(0, 0, Color::On);
        let mut sink = Recorder::default();
        oled.update(&mut sink).unwrap();

        assert_eq!(sink.frames[0], [0x3C, 0x00, 0xB0]);
        assert_eq!(sink.frames[1], [0x3C, 0x00, 0x00]);
        assert_eq!(sink.frames[2], [0x3C, 0x00, 0x10]);
        assert_eq!(sink.frames[3].len(), 2 + MAX_DATA_CHUNK);
        assert_eq!(&sink.frames[3][..3], &[0x3C, 0x40, 0x01]);
        assert_eq!(sink.frames[5], [0x3C, 0x00, 0xB1]);
        assert_eq!(oled.dirty_len(), 0);
    }

    #[test]
    fn test_sh1106_column_offset() {
        let oled = oled(Controller::Sh1106);
        let mut sink = Recorder::default();
        oled.update(&mut sink).unwrap();
        assert_eq!(sink.frames[1], [0x3C, 0x00, 0x02]);

        oled.draw_pixel(20, 0, Color::On);
        sink.frames.clear();
        oled.update_dirty_bytes(&mut sink).unwrap();
        // Column 22 = 0x16
        assert_eq!(sink.frames[1], [0x3C, 0x00, 0x06]);
        assert_eq!(sink.frames[2], [0x3C, 0x00, 0x11]);
    }

    #[test]
    fn test_failed_page_address_skips_page() {
        let oled = oled(Controller::Ssd1306);
        let mut sink = Recorder {
            failing: [0].into_iter().collect(),
            ..Recorder::default()
        };
        let err = oled.update(&mut sink).unwrap_err();
        assert_eq!(err, DisplayError::Communication { failed: 1 });
        // Page 0 stops at its first command; pages 1..8 go out in full
        assert_eq!(sink.frames.len(), 1 + 7 * 5);
        assert_eq!(sink.frames[1], [0x3C, 0x00, 0xB1]);
    }

    #[test]
    fn test_incremental_update_ascending() {
        let oled = oled(Controller::Ssd1306);
        oled.draw_pixel(3, 9, Color::On);
        oled.draw_pixel(5, 0, Color::On);
        let mut sink = Recorder::default();
        oled.update_dirty_bytes(&mut sink).unwrap();

        let expected: Vec<Vec<u8>> = vec![
            vec![0x3C, 0x00, 0xB0],
            vec![0x3C, 0x00, 0x05],
            vec![0x3C, 0x00, 0x10],
            vec![0x3C, 0x40, 0x01],
            vec![0x3C, 0x00, 0xB1],
            vec![0x3C, 0x00, 0x03],
            vec![0x3C, 0x00, 0x10],
            vec![0x3C, 0x40, 0x02],
        ];
        assert_eq!(sink.frames, expected);
        assert_eq!(oled.dirty_len(), 0);
    }

    #[test]
    fn test_clean_buffer_sends_nothing() {
        let oled = oled(Controller::Ssd1306);
        let mut sink = Recorder::default();
        oled.update_dirty_bytes(&mut sink).unwrap();
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_incremental_failures_still_drain() {
        let oled = oled(Controller::Ssd1306);
        oled.draw_pixel(0, 0, Color::On);
        oled.draw_pixel(1, 0, Color::On);
        let mut sink = Recorder {
            failing: [3].into_iter().collect(),
            ..Recorder::default()
        };
        let err = oled.update_dirty_bytes(&mut sink).unwrap_err();
        assert_eq!(err, DisplayError::Communication { failed: 1 });
        assert_eq!(sink.frames.len(), 8);
        assert_eq!(oled.dirty_len(), 0);
    }

    #[test]
    fn test_large_change_triggers_full_refresh() {
        let oled = oled(Controller::Ssd1306);
        oled.draw_filled_rectangle(0, 0, 128, 16, Color::On);
        assert_eq!(oled.dirty_len(), 256);
        let mut sink = Recorder::default();
        oled.update_dirty_bytes(&mut sink).unwrap();
        assert_eq!(sink.frames.len(), 8 * 5);
    }

    #[test]
    fn test_controller_commands() {
        let oled = oled(Controller::Ssd1306);
        let mut sink = Recorder::default();
        oled.set_contrast(&mut sink, 0x42).unwrap();
        oled.set_display_on(&mut sink, false).unwrap();
        oled.set_inverted(&mut sink, true).unwrap();
        assert_eq!(
            sink.frames,
            vec![
                vec![0x3C, 0x00, 0x81],
                vec![0x3C, 0x00, 0x42],
                vec![0x3C, 0x00, 0xAE],
                vec![0x3C, 0x00, 0xA7],
            ]
        );

        sink.failing.insert(4);
        let err = oled.set_display_on(&mut sink, true).unwrap_err();
        assert!(matches!(err, DisplayError::Bus(e) if e.is_nack()));
    }

    #[test]
    fn test_text_reaches_panel() {
        let oled = oled(Controller::Ssd1306);
        oled.write_string_at(0, 0, &Font5x7, "Hi", &TextStyle::default());
        assert!(oled.dirty_len() > 0);
        let mut sink = Recorder::default();
        oled.update_dirty_bytes(&mut sink).unwrap();
        // 'H' first column
        assert_eq!(sink.frames[3], [0x3C, 0x40, 0x7F]);
    }

    #[test]
    fn test_bridge_bring_up_initialises_panel() {
        let bridge = Bridge::new(SimTransport::with_device(&[0x3C]), BridgeConfig::default());
        let oled = Arc::new(oled(Controller::Sh1106));
        block_on(oled.register_init(&bridge));
        block_on(bridge.tick());

        assert!(bridge.is_ready());
        assert_eq!(oled.state(), DisplayState::Initialised);

        oled.draw_line(0, 0, 10, 0, Color::On);
        block_on(oled.sync(&bridge)).unwrap();
        let lit = block_on(oled.draw_and_sync_on(&bridge, |c| {
            c.draw_pixel(0, 20, Color::On);
            c.pixel(0, 20)
        }))
        .unwrap();
        assert!(lit);
        assert_eq!(oled.dirty_len(), 0);
        block_on(oled.refresh(&bridge)).unwrap();

        let (starts, stops) = block_on(bridge.with_bus(|bus| {
            (bus.transport().starts(), bus.transport().stops())
        }));
        assert_eq!(starts, stops);
    }

    #[test]
    fn test_bridge_without_panel_stays_unready() {
        let bridge = Bridge::new(SimTransport::with_device(&[]), BridgeConfig::default());
        let oled = Arc::new(oled(Controller::Ssd1306));
        block_on(oled.register_init(&bridge));
        block_on(bridge.tick());

        assert!(!bridge.is_ready());
        assert_eq!(oled.state(), DisplayState::Uninitialized);
        assert!(block_on(oled.initialise_on(&bridge)).is_err());
    }

    proptest! {
        #[test]
        fn prop_dirty_threshold_picks_strategy(
            offsets in proptest::sample::subsequence((0..1024usize).collect::<Vec<_>>(), 0..300)
        ) {
            let oled = oled(Controller::Ssd1306);
            for &index in &offsets {
                let x = (index % 128) as i32;
                let y = (index / 128) as i32 * 8;
                oled.draw_pixel(x, y, Color::On);
            }
            prop_assert_eq!(oled.dirty_len(), offsets.len());

            let mut sink = Recorder::default();
            oled.update_dirty_bytes(&mut sink).unwrap();
            let expected = if offsets.is_empty() {
                0
            } else if offsets.len() > 1024 / 7 {
                8 * 5
            } else {
                offsets.len() * 4
            };
            prop_assert_eq!(sink.frames.len(), expected);
            prop_assert_eq!(oled.dirty_len(), 0);
        }
    }
}
