//! Unsolicited frames pushed by the VMC.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use vmc_protocol::{InboundCommand, Response};

/// An inbound data frame not matched to the pending transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsyncEvent {
    /// Command code.
    pub code: u8,
    /// Packet number the VMC stamped on the frame.
    pub pack_no: Option<u8>,
    /// Data bytes.
    pub payload: Vec<u8>,
    /// When the driver received the frame.
    pub received_at: DateTime<Utc>,
}

impl AsyncEvent {
    /// Create an event stamped with the current time.
    pub fn new(code: u8, pack_no: Option<u8>, payload: Vec<u8>) -> Self {
        AsyncEvent {
            code,
            pack_no,
            payload,
            received_at: Utc::now(),
        }
    }

    /// The inbound command, if the code is known.
    pub fn command(&self) -> Option<InboundCommand> {
        InboundCommand::from_code(self.code)
    }

    /// Interpret the payload.
    pub fn response(&self) -> Response {
        Response::decode(self.code, &self.payload)
    }
}

/// Unbounded FIFO of [`AsyncEvent`]s.
#[derive(Debug, Default)]
pub struct EventSink {
    queue: Mutex<VecDeque<AsyncEvent>>,
}

impl EventSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&self, event: AsyncEvent) {
        self.queue.lock().push_back(event);
    }

    /// Remove and return everything queued, oldest first.
    pub fn drain_all(&self) -> Vec<AsyncEvent> {
        std::mem::take(&mut *self.queue.lock()).into()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the sink is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_is_fifo_and_empties() {
        let sink = EventSink::new();
        sink.push(AsyncEvent::new(0x21, Some(1), vec![1]));
        sink.push(AsyncEvent::new(0x23, Some(2), vec![2]));
        assert_eq!(sink.len(), 2);

        let drained = sink.drain_all();
        let codes: Vec<u8> = drained.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![0x21, 0x23]);

        assert!(sink.is_empty());
        assert!(sink.drain_all().is_empty());
    }

    #[test]
    fn test_event_command_lookup() {
        let event = AsyncEvent::new(0x21, None, vec![]);
        assert_eq!(event.command(), Some(InboundCommand::MoneyReceivedNotice));
        assert!(matches!(event.response(), Response::MoneyReceived { .. }));
    }
}
