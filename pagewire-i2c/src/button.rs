//! GPIO button monitor
//!
//! Polls one of the bridge's GPIO pins and reports press/release edges.
//! Pin-read failures (bridge unplugged, bus busy re-syncing) are treated as
//! "no change" so a flaky link never produces phantom presses.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{Duration, Ticker};
use log::{debug, info, warn};
use pagewire_hal::Transport;

use crate::bridge::{Bridge, StopSignal};
use crate::error::BusError;

/// Low-port GPIO bit masks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum GpioPin {
    Pin1 = 0x01,
    Pin2 = 0x02,
    Pin3 = 0x04,
    Pin4 = 0x08,
    Pin5 = 0x10,
    Pin6 = 0x20,
    Pin7 = 0x40,
    Pin8 = 0x80,
}

impl GpioPin {
    /// Bit mask for [`Bridge::pin_status`]
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

/// Button state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PressState {
    Pressed,
    Released,
}

impl From<bool> for PressState {
    fn from(high: bool) -> Self {
        if high {
            PressState::Pressed
        } else {
            PressState::Released
        }
    }
}

/// A state change on a monitored pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonEvent {
    pub pin: GpioPin,
    pub state: PressState,
}

/// Edge detector for one pin
#[derive(Debug, Clone)]
pub struct ButtonMonitor {
    pin: GpioPin,
    last: Option<PressState>,
}

impl ButtonMonitor {
    /// Monitor `pin`; the first successful reading is always reported
    pub fn new(pin: GpioPin) -> Self {
        Self { pin, last: None }
    }

    /// Monitored pin
    pub fn pin(&self) -> GpioPin {
        self.pin
    }

    /// Last reported state
    pub fn last(&self) -> Option<PressState> {
        self.last
    }

    /// Feed one pin reading; returns the new state if it changed
    pub fn observe(&mut self, reading: Result<bool, BusError>) -> Option<PressState> {
        let state = PressState::from(reading.ok()?);
        if self.last == Some(state) {
            return None;
        }
        self.last = Some(state);
        Some(state)
    }

    /// Read the pin once through `bridge`
    pub async fn poll<T: Transport>(&mut self, bridge: &Bridge<T>) -> Option<ButtonEvent> {
        let reading = bridge.pin_status(self.pin.mask()).await;
        let state = self.observe(reading)?;
        debug!("{:?} {:?}", self.pin, state);
        Some(ButtonEvent {
            pin: self.pin,
            state,
        })
    }

    /// Poll every `interval` and forward changes until `stop` fires
    pub async fn run<T: Transport, const N: usize>(
        &mut self,
        bridge: &Bridge<T>,
        interval: Duration,
        events: Sender<'_, CriticalSectionRawMutex, ButtonEvent, N>,
        stop: &StopSignal,
    ) {
        info!("Monitoring {:?}", self.pin);
        let mut ticker = Ticker::every(interval);
        loop {
            if let Some(event) = self.poll(bridge).await {
                if events.try_send(event).is_err() {
                    warn!("Button event dropped, channel full");
                }
            }
            match select(ticker.next(), stop.wait()).await {
                Either::First(()) => {}
                Either::Second(()) => break,
            }
        }
    }
}
