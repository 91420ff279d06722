//! Shared bridge session with auto-reconnect
//!
//! One [`Bridge`] owns one bus session. Every piece of bus traffic, whether
//! from a display refresh, a button poll or the reconnect tick, runs under
//! the same async mutex, so a tick never lands in the middle of a
//! transaction.
//!
//! The reconnect tick is the only thing that flips the ready flag. State
//! changes are published on a channel for whoever cares (usually the UI
//! layer, which redraws after a reconnect).

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver};
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};
use log::{debug, info, trace, warn};
use pagewire_hal::Transport;

use crate::bus::{I2cBus, ScanResult};
use crate::config::BridgeConfig;
use crate::error::BusError;
use crate::link::{LinkEvent, LinkState, ReadyChanged};

/// Capacity of the ready-state notification channel
pub const READY_CHANNEL_SIZE: usize = 8;

/// Stop signal shared with background loops
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// Receiver half of the ready-state notification channel
pub type ReadyReceiver<'a> =
    Receiver<'a, CriticalSectionRawMutex, ReadyChanged, READY_CHANNEL_SIZE>;

/// Bring-up step run every time the session becomes ready
///
/// Returning `false` aborts the bring-up; the session stays unready and the
/// whole sequence runs again on the next tick.
pub type InitAction<T> = Box<dyn FnMut(&mut I2cBus<T>) -> bool + Send>;

struct Session<T: Transport> {
    bus: I2cBus<T>,
    state: LinkState,
    init_actions: Vec<InitAction<T>>,
}

impl<T: Transport> Session<T> {
    fn run_init_actions(&mut self) -> bool {
        let Session {
            bus, init_actions, ..
        } = self;
        for (index, action) in init_actions.iter_mut().enumerate() {
            debug!("Init action {}", index);
            if !action(bus) {
                warn!("Init action {} failed", index);
                return false;
            }
        }
        true
    }
}

/// Clears the tick-in-progress flag on every exit path
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared, auto-reconnecting bus session
pub struct Bridge<T: Transport> {
    session: Mutex<CriticalSectionRawMutex, Session<T>>,
    ready: AtomicBool,
    ticking: AtomicBool,
    events: Channel<CriticalSectionRawMutex, ReadyChanged, READY_CHANNEL_SIZE>,
}

impl<T: Transport> Bridge<T> {
    /// Create an unready session; nothing touches the transport until the
    /// first tick
    pub fn new(transport: T, config: BridgeConfig) -> Self {
        Self {
            session: Mutex::new(Session {
                bus: I2cBus::new(transport, config),
                state: LinkState::Unready,
                init_actions: Vec::new(),
            }),
            ready: AtomicBool::new(false),
            ticking: AtomicBool::new(false),
            events: Channel::new(),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, CriticalSectionRawMutex, Session<T>> {
        self.session.lock().await
    }

    /// Check if the last tick left the session ready
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        if self.is_ready() {
            LinkState::Ready
        } else {
            LinkState::Unready
        }
    }

    /// Ready-state change notifications
    pub fn ready_events(&self) -> ReadyReceiver<'_> {
        self.events.receiver()
    }

    /// Send one write transaction (`bytes[0]` is the 7-bit address)
    pub async fn send_transaction(&self, bytes: &[u8]) -> Result<(), BusError> {
        self.lock().await.bus.send_transaction(bytes)
    }

    /// Read `buf.len()` bytes from `address`
    pub async fn read_from(&self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.lock().await.bus.read_from(address, buf)
    }

    /// Test the GPIO pins against `mask`
    pub async fn pin_status(&self, mask: u8) -> Result<bool, BusError> {
        self.lock().await.bus.pin_status(mask)
    }

    /// Probe every address on the bus
    pub async fn scan(&self) -> Result<ScanResult, BusError> {
        self.lock().await.bus.scan()
    }

    /// Bring the bus up by hand
    ///
    /// Does not mark the session ready; the next tick does that after the
    /// init actions have run.
    pub async fn setup(&self) -> Result<(), BusError> {
        self.lock().await.bus.setup()
    }

    /// Close the bus; the next tick reports the loss
    pub async fn shutdown(&self) -> Result<(), BusError> {
        self.lock().await.bus.shutdown()
    }

    /// Run `f` with exclusive access to the bus
    pub async fn with_bus<R>(&self, f: impl FnOnce(&mut I2cBus<T>) -> R) -> R {
        f(&mut self.lock().await.bus)
    }

    /// Append a bring-up step
    pub async fn register_init_action<F>(&self, action: F)
    where
        F: FnMut(&mut I2cBus<T>) -> bool + Send + 'static,
    {
        self.lock().await.init_actions.push(Box::new(action));
    }

    /// Drop every registered bring-up step
    pub async fn clear_init_actions(&self) {
        self.lock().await.init_actions.clear();
    }

    /// One reconnect pass
    ///
    /// A tick that finds another tick in progress returns immediately.
    pub async fn tick(&self) {
        if self.ticking.swap(true, Ordering::AcqRel) {
            trace!("Reconnect tick already running");
            return;
        }
        let _guard = TickGuard(&self.ticking);

        let mut session = self.lock().await;
        let index = session.bus.config().device_index;
        let device = match session.bus.device_at(index) {
            Ok(device) => device,
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                return;
            }
        };

        match (session.state, device) {
            (LinkState::Ready, None) => {
                info!("Bridge {} disconnected, no device found", index);
                let _ = session.bus.shutdown();
                self.apply(&mut session, LinkEvent::DeviceAbsent);
            }
            (LinkState::Ready, Some(_)) if !session.bus.is_open() => {
                warn!("Bridge {} lost synchronization", index);
                self.apply(&mut session, LinkEvent::LinkLost);
            }
            (LinkState::Ready, Some(_)) | (LinkState::Unready, None) => {}
            (LinkState::Unready, Some(info)) => {
                info!(
                    "Detected device: {} location 0x{:X} id 0x{:08X} serial {}",
                    info.description.as_str(),
                    info.location_id,
                    info.id,
                    info.serial.as_str()
                );

                if !info.has_location() {
                    info!("Stale handle, cycling port");
                    if let Err(e) = session.bus.cycle_port() {
                        warn!("Port cycle failed: {}", e);
                    }
                    return;
                }

                // Left open by an earlier bring-up whose init actions failed
                if session.bus.is_open() {
                    let _ = session.bus.shutdown();
                }
                if let Err(e) = session.bus.setup() {
                    debug!("Bring-up deferred: {}", e);
                    return;
                }
                if session.run_init_actions() {
                    self.apply(&mut session, LinkEvent::BringUpComplete);
                }
            }
        }
    }

    fn apply(&self, session: &mut Session<T>, event: LinkEvent) {
        let next = session.state.transition(event);
        if next == session.state {
            return;
        }
        session.state = next;
        self.ready.store(next.is_ready(), Ordering::Release);
        info!("Link state changed to {:?} ({:?})", next, event);

        let change = ReadyChanged {
            state: next,
            cause: event,
        };
        if self.events.try_send(change).is_err() {
            warn!("Ready notification dropped, channel full");
        }
    }

    /// Tick now, then every `interval` until `stop` fires
    pub async fn run_reconnect(&self, interval: Duration, stop: &StopSignal) {
        info!("Reconnect loop started");
        self.tick().await;

        let mut ticker = Ticker::every(interval);
        loop {
            match select(ticker.next(), stop.wait()).await {
                Either::First(()) => self.tick().await,
                Either::Second(()) => break,
            }
        }
        info!("Reconnect loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimOp, SimTransport};
    use embassy_futures::block_on;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn bridge(sim: SimTransport) -> Bridge<SimTransport> {
        Bridge::new(sim, BridgeConfig::default())
    }

    #[test]
    fn test_tick_brings_session_up() {
        let bridge = bridge(SimTransport::with_device(&[0x3C]));
        block_on(bridge.tick());

        assert!(bridge.is_ready());
        let events = bridge.ready_events();
        assert_eq!(
            events.try_receive().ok(),
            Some(ReadyChanged {
                state: LinkState::Ready,
                cause: LinkEvent::BringUpComplete
            })
        );
        assert!(events.try_receive().is_err());
    }

    #[test]
    fn test_tick_without_device_stays_unready() {
        let bridge = bridge(SimTransport::new());
        block_on(bridge.tick());
        assert!(!bridge.is_ready());
        assert!(bridge.ready_events().try_receive().is_err());
    }

    #[test]
    fn test_device_removal_notifies_once() {
        let bridge = bridge(SimTransport::with_device(&[0x3C]));
        block_on(bridge.tick());
        let events = bridge.ready_events();
        let _ = events.try_receive();

        block_on(bridge.with_bus(|bus| bus.transport_mut().detach_all()));
        block_on(bridge.tick());
        block_on(bridge.tick());

        assert!(!bridge.is_ready());
        assert_eq!(
            events.try_receive().ok(),
            Some(ReadyChanged {
                state: LinkState::Unready,
                cause: LinkEvent::DeviceAbsent
            })
        );
        assert!(events.try_receive().is_err());
    }

    #[test]
    fn test_enumeration_failure_changes_nothing() {
        let bridge = bridge(SimTransport::with_device(&[]));
        block_on(bridge.tick());
        assert!(bridge.is_ready());

        block_on(bridge.with_bus(|bus| bus.transport_mut().fail(SimOp::Enumerate)));
        block_on(bridge.tick());
        assert!(bridge.is_ready());
    }

    #[test]
    fn test_unassigned_location_cycles_port() {
        let mut sim = SimTransport::new();
        sim.attach(pagewire_hal::LOCATION_UNASSIGNED);
        let bridge = bridge(sim);

        // Stale handle from an earlier session
        block_on(bridge.with_bus(|bus| bus.transport_mut().open(0))).unwrap();
        block_on(bridge.tick());

        assert!(!bridge.is_ready());
        let (cycles, open) =
            block_on(bridge.with_bus(|bus| (bus.transport().cycles(), bus.transport().is_open())));
        assert_eq!(cycles, 1);
        assert!(!open);
    }

    #[test]
    fn test_failed_port_cycle_closes_stale_handle() {
        let mut sim = SimTransport::new();
        sim.attach(pagewire_hal::LOCATION_UNASSIGNED);
        sim.fail(SimOp::CyclePort);
        let bridge = bridge(sim);

        block_on(bridge.with_bus(|bus| bus.transport_mut().open(0))).unwrap();
        block_on(bridge.tick());

        assert!(!bridge.is_ready());
        let (cycles, open) =
            block_on(bridge.with_bus(|bus| (bus.transport().cycles(), bus.transport().is_open())));
        assert_eq!(cycles, 0);
        assert!(!open);
    }

    #[test]
    fn test_init_actions_run_in_order_and_gate_ready() {
        let bridge = bridge(SimTransport::with_device(&[0x3C]));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = calls.clone();
        block_on(bridge.register_init_action(move |bus| {
            first.fetch_add(1, Ordering::SeqCst);
            bus.send_transaction(&[0x3C, 0x00, 0xAE]).is_ok()
        }));
        let second = calls.clone();
        block_on(bridge.register_init_action(move |_| {
            second.fetch_add(10, Ordering::SeqCst);
            false
        }));

        block_on(bridge.tick());
        assert!(!bridge.is_ready());
        assert_eq!(calls.load(Ordering::SeqCst), 11);

        block_on(bridge.clear_init_actions());
        block_on(bridge.tick());
        assert!(bridge.is_ready());
    }

    #[test]
    fn test_failed_init_action_stops_sequence() {
        let bridge = bridge(SimTransport::with_device(&[]));
        let reached = Arc::new(AtomicBool::new(false));

        block_on(bridge.register_init_action(|_| false));
        let flag = reached.clone();
        block_on(bridge.register_init_action(move |_| {
            flag.store(true, Ordering::SeqCst);
            true
        }));

        block_on(bridge.tick());
        assert!(!reached.load(Ordering::SeqCst));
    }

    #[test]
    fn test_lost_sync_drops_to_unready() {
        let bridge = bridge(SimTransport::with_device(&[0x3C]));
        block_on(bridge.tick());
        assert!(bridge.is_ready());

        // Recovery after the NAK cannot re-sync
        block_on(bridge.with_bus(|bus| {
            bus.transport_mut().echo_bad_commands = false;
            bus.transport_mut().nack_at = Some(1);
        }));
        assert!(block_on(bridge.send_transaction(&[0x3C, 0x00])).is_err());

        block_on(bridge.tick());
        assert_eq!(bridge.link_state(), LinkState::Unready);

        // Device healthy again
        block_on(bridge.with_bus(|bus| {
            bus.transport_mut().echo_bad_commands = true;
            bus.transport_mut().nack_at = None;
        }));
        block_on(bridge.tick());
        assert!(bridge.is_ready());
    }

    #[test]
    fn test_concurrent_tick_is_noop() {
        let bridge = bridge(SimTransport::with_device(&[]));
        bridge.ticking.store(true, Ordering::SeqCst);
        block_on(bridge.tick());
        assert!(!bridge.is_ready());

        bridge.ticking.store(false, Ordering::SeqCst);
        block_on(bridge.tick());
        assert!(bridge.is_ready());
    }

    #[test]
    fn test_reconnect_loop_honours_stop() {
        let bridge = bridge(SimTransport::with_device(&[]));
        let stop = StopSignal::new();
        stop.signal(());
        block_on(bridge.run_reconnect(Duration::from_millis(10), &stop));
        // The immediate tick still ran
        assert!(bridge.is_ready());
    }

    #[test]
    fn test_full_channel_drops_notifications() {
        let bridge = bridge(SimTransport::with_device(&[]));
        for _ in 0..READY_CHANNEL_SIZE + 2 {
            block_on(bridge.tick());
            block_on(bridge.with_bus(|bus| bus.transport_mut().detach_all()));
            block_on(bridge.tick());
            block_on(bridge.with_bus(|bus| bus.transport_mut().attach(0x21)));
        }
        let events = bridge.ready_events();
        let mut received = 0;
        while events.try_receive().is_ok() {
            received += 1;
        }
        assert_eq!(received, READY_CHANNEL_SIZE);
    }
}
