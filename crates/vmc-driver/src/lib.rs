//! Polling-slave driver for vending machine controllers.
//!
//! The VMC polls; the host answers. This crate runs the host side of that
//! exchange on a dedicated thread and exposes blocking and fire-and-forget
//! command submission to any number of caller threads.
//!
//! ## Key Types
//!
//! - [`Driver`]: façade owning the protocol thread
//! - [`PollResponder`]: per-frame dispatch (POLL / ACK / DATA)
//! - [`TransactionSlot`]: the single pending command and its lifecycle
//! - [`SequenceManager`]: rolling 1–255 packet number
//! - [`EventSink`]: FIFO of unsolicited frames
//!
//! # Example
//!
//! ```rust,ignore
//! use vmc_driver::{Driver, DriverConfig};
//!
//! let driver = Driver::start(DriverConfig::default());
//! let outcome = driver.dispense(10)?;
//! for event in driver.drain_events() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod responder;
pub mod sequence;
pub mod transaction;
pub mod transport;

pub use config::{ChecksumPolicy, DriverConfig};
pub use driver::Driver;
pub use error::{DriverError, DriverResult};
pub use events::{AsyncEvent, EventSink};
pub use responder::PollResponder;
pub use sequence::SequenceManager;
pub use transaction::{CommandRequest, Completion, Outcome, TransactionSlot, TransactionState};
pub use transport::{open_serial, MemoryPeer, MemoryTransport, Transport};
