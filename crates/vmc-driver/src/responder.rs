//! Dispatcher for every frame received from the VMC.
//!
//! The responder owns the protocol's mutable state (pending slot and packet
//! number) and writes replies straight to the transport. It is driven only by
//! the protocol loop, always under the driver's state lock.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use vmc_protocol::{Frame, ACK_FRAME, CMD_ACK, CMD_POLL, MAX_RETRIES};

use crate::config::ChecksumPolicy;
use crate::error::{DriverError, DriverResult};
use crate::events::{AsyncEvent, EventSink};
use crate::sequence::SequenceManager;
use crate::transaction::{
    CommandRequest, Completion, Outcome, PollAction, Transaction, TransactionSlot,
};

/// Routes POLL, ACK and DATA frames and produces the replies.
#[derive(Debug)]
pub struct PollResponder {
    slot: TransactionSlot,
    sequence: SequenceManager,
    events: Arc<EventSink>,
    checksum_policy: ChecksumPolicy,
}

impl PollResponder {
    /// Create a responder that queues unsolicited frames into `events`.
    pub fn new(events: Arc<EventSink>, checksum_policy: ChecksumPolicy) -> Self {
        PollResponder {
            slot: TransactionSlot::new(),
            sequence: SequenceManager::new(),
            events,
            checksum_policy,
        }
    }

    /// The pending slot.
    pub fn slot(&self) -> &TransactionSlot {
        &self.slot
    }

    /// Install a transaction; see [`TransactionSlot::submit`].
    pub fn submit(
        &mut self,
        request: CommandRequest,
        notify: Option<crossbeam_channel::Sender<Completion>>,
    ) -> DriverResult<u64> {
        let ticket = self.slot.submit(request, notify)?;
        trace!(ticket, "transaction queued, awaiting poll");
        Ok(ticket)
    }

    /// Withdraw a transaction; see [`TransactionSlot::cancel`].
    pub fn cancel(&mut self, ticket: u64) -> bool {
        self.slot.cancel(ticket)
    }

    /// Remove the pending transaction without completing it.
    pub fn take_pending(&mut self) -> Option<Transaction> {
        self.slot.take()
    }

    /// Packet number the next command frame will carry.
    pub fn sequence(&self) -> u8 {
        self.sequence.current()
    }

    /// Handle one inbound frame, writing any reply to `out`.
    pub fn handle_frame<W: Write + ?Sized>(&mut self, frame: &Frame, out: &mut W) -> DriverResult<()> {
        metrics::counter!("vmc_frames_rx_total").increment(1);

        if !frame.checksum_ok() {
            metrics::counter!("vmc_checksum_errors_total").increment(1);
            match self.checksum_policy {
                ChecksumPolicy::Verify => {
                    warn!(
                        code = format_args!("0x{:02X}", frame.command),
                        expected = format_args!("0x{:02X}", frame.computed()),
                        actual = format_args!("0x{:02X}", frame.checksum),
                        "dropping frame with bad checksum"
                    );
                    return Ok(());
                }
                ChecksumPolicy::Trust => {
                    debug!(code = format_args!("0x{:02X}", frame.command), "bad checksum ignored");
                }
            }
        }

        match frame.command {
            CMD_POLL => self.on_poll(out),
            CMD_ACK => {
                self.on_ack();
                Ok(())
            }
            _ => self.on_data(frame, out),
        }
    }

    fn on_poll<W: Write + ?Sized>(&mut self, out: &mut W) -> DriverResult<()> {
        let pack_no = self.sequence.current();
        let action = match self.slot.pending().map(|tx| tx.poll_action(pack_no)) {
            Some(Ok(action)) => action,
            Some(Err(e)) => {
                // Unencodable command: fail it alone and keep the link alive.
                if let Some(tx) = self.slot.take() {
                    warn!(ticket = tx.ticket(), "cannot encode command: {}", e);
                    tx.finish(Err(DriverError::Protocol(e)));
                }
                return send(out, &ACK_FRAME);
            }
            None => PollAction::Idle,
        };

        match action {
            PollAction::Transmit(bytes) => {
                send(out, &bytes)?;
                if let Some(tx) = self.slot.pending_mut() {
                    if tx.retries() > 0 {
                        metrics::counter!("vmc_retransmits_total").increment(1);
                    }
                    tx.mark_sent();
                }
                Ok(())
            }
            PollAction::Exhausted => {
                if let Some(tx) = self.slot.take() {
                    warn!(
                        code = format_args!("0x{:02X}", tx.request().code),
                        "command failed {} times, giving up", MAX_RETRIES
                    );
                    tx.finish(Err(DriverError::MaxRetriesExceeded(MAX_RETRIES)));
                }
                send(out, &ACK_FRAME)
            }
            PollAction::Idle => send(out, &ACK_FRAME),
        }
    }

    fn on_ack(&mut self) {
        let Some(tx) = self.slot.pending_mut() else {
            trace!("ACK with nothing pending");
            return;
        };
        if !tx.accepts_ack() {
            trace!(state = ?tx.state(), "ACK ignored");
            return;
        }

        // An accepted ACK closes the host-to-VMC exchange.
        self.sequence.advance();

        if tx.request().expect.is_some() {
            tx.mark_acked();
            trace!(ticket = tx.ticket(), "ACK received, awaiting data");
        } else if let Some(tx) = self.slot.take() {
            debug!(ticket = tx.ticket(), "ACK-only command complete");
            tx.finish(Ok(Outcome::Acknowledged));
        }
    }

    fn on_data<W: Write + ?Sized>(&mut self, frame: &Frame, out: &mut W) -> DriverResult<()> {
        // Every data frame is acknowledged before anything else happens.
        send(out, &ACK_FRAME)?;

        let matched = self
            .slot
            .pending()
            .is_some_and(|tx| tx.matches(frame.command));

        if matched {
            if let Some(tx) = self.slot.take() {
                debug!(
                    ticket = tx.ticket(),
                    code = format_args!("0x{:02X}", frame.command),
                    payload = %hex::encode(&frame.payload),
                    "response received"
                );
                tx.finish(Ok(Outcome::Data {
                    code: frame.command,
                    payload: frame.payload.clone(),
                }));
            }
        } else {
            debug!(
                code = format_args!("0x{:02X}", frame.command),
                payload = %hex::encode(&frame.payload),
                "unsolicited event"
            );
            metrics::counter!("vmc_events_queued_total").increment(1);
            self.events
                .push(AsyncEvent::new(frame.command, frame.pack_no, frame.payload.clone()));
            self.sequence.advance();
        }
        Ok(())
    }
}

fn send<W: Write + ?Sized>(out: &mut W, bytes: &[u8]) -> DriverResult<()> {
    out.write_all(bytes)?;
    out.flush()?;
    metrics::counter!("vmc_frames_tx_total").increment(1);
    trace!(bytes = %hex::encode(bytes), "tx");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionState;
    use vmc_protocol::encode;

    fn poll() -> Frame {
        Frame::decode(&[0xFA, 0xFB, 0x41, 0x00, 0x40]).unwrap()
    }

    fn ack() -> Frame {
        Frame::decode(&ACK_FRAME).unwrap()
    }

    fn data(code: u8, pack_no: u8, payload: &[u8]) -> Frame {
        Frame::decode(&encode(code, pack_no, payload).unwrap()).unwrap()
    }

    fn responder() -> (PollResponder, Arc<EventSink>) {
        let events = Arc::new(EventSink::new());
        (PollResponder::new(events.clone(), ChecksumPolicy::Verify), events)
    }

    #[test]
    fn test_idle_poll_gets_ack() {
        let (mut r, _) = responder();
        let mut out = Vec::new();
        r.handle_frame(&poll(), &mut out).unwrap();
        assert_eq!(out, ACK_FRAME.to_vec());
    }

    #[test]
    fn test_poll_transmits_pending_command() {
        let (mut r, _) = responder();
        r.submit(CommandRequest::new(0x53, vec![]), None).unwrap();

        let mut out = Vec::new();
        r.handle_frame(&poll(), &mut out).unwrap();
        assert_eq!(out, vec![0xFA, 0xFB, 0x53, 0x01, 0x01, 0x52]);
        assert_eq!(r.slot().pending().unwrap().state(), TransactionState::SentAwaitingAck);
    }

    #[test]
    fn test_ack_only_completion_advances_sequence() {
        let (mut r, _) = responder();
        let (tx, rx) = crossbeam_channel::bounded(1);
        r.submit(CommandRequest::new(0x12, vec![0, 1, 0, 0, 0, 100]), Some(tx)).unwrap();

        let mut out = Vec::new();
        r.handle_frame(&poll(), &mut out).unwrap();
        r.handle_frame(&ack(), &mut out).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), Ok(Outcome::Acknowledged)));
        assert!(r.slot().is_free());
        assert_eq!(r.sequence(), 2);
    }

    #[test]
    fn test_stray_ack_ignored() {
        let (mut r, _) = responder();
        let mut out = Vec::new();
        r.handle_frame(&ack(), &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(r.sequence(), 1);

        // ACK before the command was ever sent does not count either.
        r.submit(CommandRequest::new(0x12, vec![]), None).unwrap();
        r.handle_frame(&ack(), &mut out).unwrap();
        assert_eq!(r.slot().pending().unwrap().state(), TransactionState::AwaitingPoll);
        assert_eq!(r.sequence(), 1);
    }

    #[test]
    fn test_matched_data_does_not_advance_sequence() {
        let (mut r, events) = responder();
        let (tx, rx) = crossbeam_channel::bounded(1);
        r.submit(CommandRequest::new(0x53, vec![]), Some(tx)).unwrap();

        let mut out = Vec::new();
        r.handle_frame(&poll(), &mut out).unwrap();
        r.handle_frame(&ack(), &mut out).unwrap();
        assert_eq!(r.sequence(), 2);

        out.clear();
        r.handle_frame(&data(0x54, 9, &[0x00]), &mut out).unwrap();
        assert_eq!(out, ACK_FRAME.to_vec());
        assert_eq!(r.sequence(), 2);
        assert!(events.is_empty());

        let outcome = rx.try_recv().unwrap().unwrap();
        assert_eq!(outcome, Outcome::Data { code: 0x54, payload: vec![0x00] });
    }

    #[test]
    fn test_unsolicited_data_queued_and_advances() {
        let (mut r, events) = responder();
        let mut out = Vec::new();
        r.handle_frame(&data(0x21, 4, &[0x01, 0x00, 0x64]), &mut out).unwrap();

        assert_eq!(out, ACK_FRAME.to_vec());
        assert_eq!(r.sequence(), 2);
        let drained = events.drain_all();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].code, 0x21);
        assert_eq!(drained[0].pack_no, Some(4));
        assert_eq!(drained[0].payload, vec![0x01, 0x00, 0x64]);
    }

    #[test]
    fn test_exhausted_poll_fails_and_acks() {
        let (mut r, _) = responder();
        let (tx, rx) = crossbeam_channel::bounded(1);
        r.submit(CommandRequest::new(0x53, vec![]), Some(tx)).unwrap();

        for _ in 0..MAX_RETRIES {
            let mut out = Vec::new();
            r.handle_frame(&poll(), &mut out).unwrap();
            assert_eq!(out[2], 0x53);
        }

        let mut out = Vec::new();
        r.handle_frame(&poll(), &mut out).unwrap();
        assert_eq!(out, ACK_FRAME.to_vec());
        assert!(matches!(rx.try_recv().unwrap(), Err(DriverError::MaxRetriesExceeded(5))));
        assert!(r.slot().is_free());
    }

    #[test]
    fn test_unencodable_command_fails_alone() {
        let (mut r, _) = responder();
        let (tx, rx) = crossbeam_channel::bounded(1);
        r.submit(CommandRequest::new(0x70, vec![]), Some(tx)).unwrap();
        // Grow the payload past what submit would accept.
        r.slot.pending_mut().unwrap().request_mut().payload = vec![0u8; 300];

        let mut out = Vec::new();
        r.handle_frame(&poll(), &mut out).unwrap();
        assert_eq!(out, ACK_FRAME.to_vec());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DriverError::Protocol(vmc_protocol::ProtocolError::PayloadTooLong { .. }))
        ));
        assert!(r.slot().is_free());
    }

    #[test]
    fn test_bad_checksum_policy() {
        let mut raw = encode(0x21, 1, &[0x01]).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let corrupt = Frame::decode(&raw).unwrap();

        let (mut r, events) = responder();
        let mut out = Vec::new();
        r.handle_frame(&corrupt, &mut out).unwrap();
        assert!(out.is_empty());
        assert!(events.is_empty());

        let events = Arc::new(EventSink::new());
        let mut r = PollResponder::new(events.clone(), ChecksumPolicy::Trust);
        r.handle_frame(&corrupt, &mut out).unwrap();
        assert_eq!(out, ACK_FRAME.to_vec());
        assert_eq!(events.len(), 1);
    }
}
