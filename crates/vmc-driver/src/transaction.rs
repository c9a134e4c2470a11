//! The single in-flight host command.
//!
//! ## Lifecycle
//!
//! ```text
//!   submit ──► AwaitingPoll ──POLL──► SentAwaitingAck ──ACK──► AckReceivedAwaitingData
//!                                      │   ▲      │                      │
//!                                      └POLL┘     │ (no data expected)   │ matching DATA
//!                                   (retransmit)  ▼                      ▼
//!                                             Completed              Completed
//! ```
//!
//! A POLL that arrives after [`MAX_RETRIES`] transmissions fails the
//! transaction. Terminal transactions leave the [`TransactionSlot`]; the
//! result is delivered once over the completion channel, if anyone is
//! listening.

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, trace};
use vmc_protocol::{
    encode, expected_response, ProtocolError, ProtocolResult, Response, MAX_PAYLOAD_LEN, MAX_RETRIES,
};

use crate::error::{DriverError, DriverResult};

/// Result delivered to whoever submitted a transaction.
pub type Completion = DriverResult<Outcome>;

/// Successful end of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The VMC acknowledged a command that expects no data.
    Acknowledged,
    /// The VMC answered with the expected data frame.
    Data {
        /// Inbound command code.
        code: u8,
        /// Data bytes.
        payload: Vec<u8>,
    },
}

impl Outcome {
    /// Data bytes, empty for an ACK-only outcome.
    pub fn payload(&self) -> &[u8] {
        match self {
            Outcome::Acknowledged => &[],
            Outcome::Data { payload, .. } => payload,
        }
    }

    /// Interpret the data frame, if there was one.
    pub fn response(&self) -> Option<Response> {
        match self {
            Outcome::Acknowledged => None,
            Outcome::Data { code, payload } => Some(Response::decode(*code, payload)),
        }
    }
}

/// A command to send, with the code that completes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Outbound command code.
    pub code: u8,
    /// Data bytes following the packet number.
    pub payload: Vec<u8>,
    /// Inbound code that completes the transaction; `None` completes on ACK.
    pub expect: Option<u8>,
}

impl CommandRequest {
    /// Build a request, looking up the expected response code.
    pub fn new(code: u8, payload: impl Into<Vec<u8>>) -> Self {
        CommandRequest {
            code,
            payload: payload.into(),
            expect: expected_response(code).map(|c| c.code()),
        }
    }

    /// Check that the payload fits in a single frame.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLong {
                max: MAX_PAYLOAD_LEN,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    /// Encode this command with the given packet number.
    pub fn encode(&self, pack_no: u8) -> ProtocolResult<Vec<u8>> {
        encode(self.code, pack_no, &self.payload)
    }
}

/// Non-terminal lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Submitted, waiting for a POLL to transmit.
    AwaitingPoll,
    /// Transmitted, waiting for the VMC's ACK.
    SentAwaitingAck,
    /// Acknowledged, waiting for the data frame.
    AckReceivedAwaitingData,
}

/// What to do in response to a POLL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollAction {
    /// Send this command frame instead of an idle ACK.
    Transmit(Vec<u8>),
    /// Out of attempts: fail the transaction and answer with an idle ACK.
    Exhausted,
    /// Nothing to send: answer with an idle ACK.
    Idle,
}

/// The pending host command.
#[derive(Debug)]
pub struct Transaction {
    ticket: u64,
    request: CommandRequest,
    state: TransactionState,
    retries: u8,
    notify: Option<Sender<Completion>>,
}

impl Transaction {
    /// Identifier assigned at submission.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// The command being sent.
    pub fn request(&self) -> &CommandRequest {
        &self.request
    }

    #[cfg(test)]
    pub(crate) fn request_mut(&mut self) -> &mut CommandRequest {
        &mut self.request
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of transmissions so far.
    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Decide how to answer a POLL.
    pub fn poll_action(&self, pack_no: u8) -> ProtocolResult<PollAction> {
        match self.state {
            TransactionState::AwaitingPoll | TransactionState::SentAwaitingAck => {
                if self.retries >= MAX_RETRIES {
                    Ok(PollAction::Exhausted)
                } else {
                    Ok(PollAction::Transmit(self.request.encode(pack_no)?))
                }
            }
            TransactionState::AckReceivedAwaitingData => Ok(PollAction::Idle),
        }
    }

    /// Record that the command frame went out.
    pub fn mark_sent(&mut self) {
        self.state = TransactionState::SentAwaitingAck;
        self.retries += 1;
        debug!(
            code = format_args!("0x{:02X}", self.request.code),
            attempt = self.retries,
            "command transmitted"
        );
    }

    /// Whether an ACK from the VMC applies to this transaction.
    pub fn accepts_ack(&self) -> bool {
        self.state == TransactionState::SentAwaitingAck
    }

    /// Whether a data frame with `code` is this transaction's response.
    ///
    /// Only a command that has actually been transmitted can be answered.
    pub fn matches(&self, code: u8) -> bool {
        self.state != TransactionState::AwaitingPoll && self.request.expect == Some(code)
    }

    /// Move to waiting for data after the ACK.
    pub fn mark_acked(&mut self) {
        self.state = TransactionState::AckReceivedAwaitingData;
    }

    /// Deliver the result and consume the transaction.
    pub fn finish(self, result: Completion) {
        match &self.notify {
            Some(tx) => {
                if tx.send(result).is_err() {
                    trace!(ticket = self.ticket, "completion dropped: waiter gone");
                }
            }
            None => trace!(ticket = self.ticket, ?result, "completed without waiter"),
        }
    }
}

/// Holder of the at-most-one pending [`Transaction`].
#[derive(Debug, Default)]
pub struct TransactionSlot {
    pending: Option<Transaction>,
    next_ticket: u64,
}

impl TransactionSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no transaction is pending.
    pub fn is_free(&self) -> bool {
        self.pending.is_none()
    }

    /// Install a new transaction in `AwaitingPoll`.
    ///
    /// Fails with [`DriverError::Busy`] if one is already pending; the slot is
    /// never overwritten. A payload too long for one frame is rejected before
    /// it is installed.
    pub fn submit(
        &mut self,
        request: CommandRequest,
        notify: Option<Sender<Completion>>,
    ) -> DriverResult<u64> {
        request.validate()?;
        if self.pending.is_some() {
            return Err(DriverError::Busy);
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending = Some(Transaction {
            ticket,
            request,
            state: TransactionState::AwaitingPoll,
            retries: 0,
            notify,
        });
        Ok(ticket)
    }

    /// The pending transaction.
    pub fn pending(&self) -> Option<&Transaction> {
        self.pending.as_ref()
    }

    /// The pending transaction, mutably.
    pub fn pending_mut(&mut self) -> Option<&mut Transaction> {
        self.pending.as_mut()
    }

    /// Remove the pending transaction.
    pub fn take(&mut self) -> Option<Transaction> {
        self.pending.take()
    }

    /// Withdraw the transaction with `ticket`, if it is still pending.
    ///
    /// Returns `false` when it already finished or was never installed.
    pub fn cancel(&mut self, ticket: u64) -> bool {
        match &self.pending {
            Some(tx) if tx.ticket == ticket => {
                debug!(ticket, state = ?tx.state, retries = tx.retries, "transaction withdrawn");
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}
