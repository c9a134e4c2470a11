//! Driver façade: the synchronized boundary between callers and the wire.
//!
//! ## Threading
//!
//! One protocol thread owns the transport. It reads bytes, reassembles
//! frames and dispatches each one through the [`PollResponder`] while holding
//! the state lock. Callers never touch the transport; they install a
//! transaction in the pending slot and block on a completion channel.
//!
//! ## Single pending transaction
//!
//! - [`Driver::submit_and_wait`] queues behind an occupied slot, waiting on a
//!   condition variable until it frees or the caller's deadline passes.
//! - [`Driver::submit_no_wait`] returns [`DriverError::Busy`] instead.
//! - When a blocking caller times out it withdraws its transaction. Nothing
//!   more is transmitted for it; a late ACK is ignored and a late data frame
//!   is delivered as an unsolicited event.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};
use vmc_protocol::{Frame, FrameReader, OutboundCommand};

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};
use crate::events::{AsyncEvent, EventSink};
use crate::responder::PollResponder;
use crate::transaction::{CommandRequest, Outcome, TransactionState};
use crate::transport::{open_serial, Transport};

/// State shared between callers and the protocol thread.
struct Shared {
    /// Pending slot and packet number, behind the one lock.
    state: Mutex<PollResponder>,
    /// Signalled whenever the pending slot is vacated.
    slot_free: Condvar,
    /// Unsolicited frames.
    events: Arc<EventSink>,
    /// Protocol thread is alive.
    running: AtomicBool,
    /// Ask the protocol thread to exit.
    stop: AtomicBool,
}

impl Shared {
    fn dispatch(&self, frame: &Frame, out: &mut dyn Transport) -> DriverResult<()> {
        let mut responder = self.state.lock();
        let was_busy = !responder.slot().is_free();
        let result = responder.handle_frame(frame, out);
        if was_busy && responder.slot().is_free() {
            self.slot_free.notify_all();
        }
        result
    }

    /// Fail whatever is pending once the protocol thread is gone.
    fn abandon(&self, reason: &str) {
        let mut responder = self.state.lock();
        if let Some(tx) = responder.take_pending() {
            tx.finish(Err(DriverError::TransportUnavailable(reason.to_string())));
        }
        self.slot_free.notify_all();
    }
}

/// Driver for one VMC.
pub struct Driver {
    config: DriverConfig,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    /// Why the driver is inert, if it never started.
    unavailable: Option<String>,
}

impl Driver {
    /// Open the configured serial port and start the protocol thread.
    ///
    /// If the port cannot be opened the failure is logged and an inert driver
    /// is returned; every submission on it fails with
    /// [`DriverError::TransportUnavailable`].
    pub fn start(config: DriverConfig) -> Driver {
        match open_serial(&config) {
            Ok(transport) => {
                info!(port = %config.port, baud = config.baud_rate, "VMC driver starting");
                Self::start_with_transport(config, transport)
            }
            Err(e) => {
                error!(port = %config.port, "failed to open VMC transport: {}", e);
                Self::inert(config, e.to_string())
            }
        }
    }

    /// Start the protocol thread over an already-open transport.
    pub fn start_with_transport(config: DriverConfig, transport: Box<dyn Transport>) -> Driver {
        let events = Arc::new(EventSink::new());
        let shared = Arc::new(Shared {
            state: Mutex::new(PollResponder::new(events.clone(), config.checksum_policy)),
            slot_free: Condvar::new(),
            events,
            running: AtomicBool::new(true),
            stop: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("vmc-protocol".to_string())
            .spawn(move || protocol_loop(loop_shared, transport));

        let thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("failed to spawn protocol thread: {}", e);
                shared.running.store(false, Ordering::SeqCst);
                return Driver {
                    config,
                    shared,
                    thread: None,
                    unavailable: Some(e.to_string()),
                };
            }
        };

        let driver = Driver {
            config,
            shared,
            thread: Some(thread),
            unavailable: None,
        };

        if driver.config.startup_sync {
            if let Err(e) = driver.submit_no_wait(OutboundCommand::RequestInfoSync.code(), &[]) {
                warn!("startup sync not queued: {}", e);
            }
        }
        driver
    }

    fn inert(config: DriverConfig, reason: String) -> Driver {
        let events = Arc::new(EventSink::new());
        Driver {
            shared: Arc::new(Shared {
                state: Mutex::new(PollResponder::new(events.clone(), config.checksum_policy)),
                slot_free: Condvar::new(),
                events,
                running: AtomicBool::new(false),
                stop: AtomicBool::new(true),
            }),
            config,
            thread: None,
            unavailable: Some(reason),
        }
    }

    fn ensure_running(&self) -> DriverResult<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let reason = self
            .unavailable
            .clone()
            .unwrap_or_else(|| "protocol loop stopped".to_string());
        Err(DriverError::TransportUnavailable(reason))
    }

    /// Configuration the driver was started with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Whether the protocol thread is alive.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Packet number the next command frame will carry.
    pub fn sequence(&self) -> u8 {
        self.shared.state.lock().sequence()
    }

    /// Lifecycle state of the pending transaction, if any.
    pub fn pending_state(&self) -> Option<TransactionState> {
        self.shared.state.lock().slot().pending().map(|tx| tx.state())
    }

    /// Send a command and block until it completes, fails or `timeout` passes.
    ///
    /// Time spent queued behind another pending transaction counts against
    /// `timeout`.
    pub fn submit_and_wait(&self, code: u8, payload: &[u8], timeout: Duration) -> DriverResult<Outcome> {
        self.ensure_running()?;
        let request = CommandRequest::new(code, payload.to_vec());
        request.validate()?;
        let deadline = Instant::now() + timeout;
        let (tx, rx) = crossbeam_channel::bounded(1);

        let ticket = {
            let mut responder = self.shared.state.lock();
            while !responder.slot().is_free() {
                let timed_out = self.shared.slot_free.wait_until(&mut responder, deadline).timed_out();
                self.ensure_running()?;
                if timed_out && !responder.slot().is_free() {
                    debug!(code = format_args!("0x{:02X}", code), "timed out queued behind pending command");
                    return Err(DriverError::Timeout);
                }
            }
            // The loop may have exited and abandoned the slot since the first check.
            self.ensure_running()?;
            responder.submit(request, Some(tx))?
        };
        debug!(ticket, code = format_args!("0x{:02X}", code), "queued command, waiting for VMC");

        match rx.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.shared.state.lock().cancel(ticket) {
                    self.shared.slot_free.notify_all();
                }
                // The result may have landed between expiry and withdrawal.
                match rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(ticket, "timeout waiting for VMC response");
                        Err(DriverError::Timeout)
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(DriverError::TransportUnavailable(
                "protocol loop stopped".to_string(),
            )),
        }
    }

    /// Queue a command without waiting for its result.
    pub fn submit_no_wait(&self, code: u8, payload: &[u8]) -> DriverResult<()> {
        self.ensure_running()?;
        let ticket = {
            let mut responder = self.shared.state.lock();
            self.ensure_running()?;
            responder.submit(CommandRequest::new(code, payload.to_vec()), None)?
        };
        debug!(ticket, code = format_args!("0x{:02X}", code), "queued command without waiter");
        Ok(())
    }

    /// Remove and return every queued unsolicited event.
    pub fn drain_events(&self) -> Vec<AsyncEvent> {
        self.shared.events.drain_all()
    }

    /// REQUEST_STATUS_SIMPLE (0x53).
    pub fn request_status(&self) -> DriverResult<Outcome> {
        self.submit_and_wait(
            OutboundCommand::RequestStatusSimple.code(),
            &[],
            self.config.command_timeout(),
        )
    }

    /// DISPENSE_ITEM (0x03) for a selection number.
    pub fn dispense(&self, slot: u16) -> DriverResult<Outcome> {
        self.submit_and_wait(
            OutboundCommand::DispenseItem.code(),
            &slot.to_be_bytes(),
            self.config.command_timeout(),
        )
    }

    /// SET_PRICE (0x12): selection number then price, both big-endian.
    pub fn set_price(&self, slot: u16, price: u32) -> DriverResult<Outcome> {
        let mut payload = Vec::with_capacity(6);
        payload.extend_from_slice(&slot.to_be_bytes());
        payload.extend_from_slice(&price.to_be_bytes());
        self.submit_and_wait(OutboundCommand::SetPrice.code(), &payload, self.config.command_timeout())
    }

    /// Menu setting by symbolic sub-command name.
    ///
    /// Unknown names are rejected before anything is queued.
    pub fn menu_command(&self, sub_command: &str, params: &[u8], timeout: Duration) -> DriverResult<Outcome> {
        let sub = self.config.menu_sub_command(sub_command)?;
        self.menu_command_raw(sub, params, timeout)
    }

    /// Menu setting by sub-command byte.
    pub fn menu_command_raw(&self, sub_command: u8, params: &[u8], timeout: Duration) -> DriverResult<Outcome> {
        let mut payload = Vec::with_capacity(1 + params.len());
        payload.push(sub_command);
        payload.extend_from_slice(params);
        self.submit_and_wait(OutboundCommand::MenuCommandWrapper.code(), &payload, timeout)
    }

    /// Stop the protocol thread and wait for it to exit.
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("protocol thread panicked");
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Main function for the protocol thread.
///
/// Runs until asked to stop, the transport closes, or a write fails.
fn protocol_loop(shared: Arc<Shared>, mut transport: Box<dyn Transport>) {
    let mut reader = FrameReader::new();
    let mut buf = [0u8; 256];

    'read: while !shared.stop.load(Ordering::SeqCst) {
        let n = match transport.read(&mut buf) {
            Ok(0) => {
                warn!("VMC transport closed");
                break;
            }
            Ok(n) => n,
            Err(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::Interrupted => continue,
                _ => {
                    error!("VMC transport read failed: {}", e);
                    break;
                }
            },
        };

        for frame in reader.push(&buf[..n]) {
            if let Err(e) = shared.dispatch(&frame, transport.as_mut()) {
                error!("failed to answer VMC: {}", e);
                break 'read;
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    shared.abandon("protocol loop stopped");
    debug!(discarded = reader.discarded(), "protocol loop exited");
}
