//! Responses from the VMC.

use serde::Serialize;

use crate::constants::*;

/// Status byte carried by a DISPENSING_STATUS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispenseStatus {
    /// 0x01: dispense in progress.
    Dispensing,
    /// 0x02: item delivered.
    Success,
    /// 0x03: selection jammed.
    Jammed,
    /// 0x04: motor fault.
    MotorError,
    /// 0x07: elevator fault.
    ElevatorError,
    /// 0xFF: dispense terminated.
    Terminated,
    /// Status byte not in the vendor table.
    Unknown(u8),
}

impl DispenseStatus {
    /// Human-readable description matching the vendor documentation.
    pub fn description(&self) -> &'static str {
        match self {
            DispenseStatus::Dispensing => "Dispensing...",
            DispenseStatus::Success => "Dispensing Success",
            DispenseStatus::Jammed => "Selection Jammed",
            DispenseStatus::MotorError => "Motor Error",
            DispenseStatus::ElevatorError => "Elevator Error",
            DispenseStatus::Terminated => "Terminated",
            DispenseStatus::Unknown(_) => "Unknown",
        }
    }

    /// Whether the machine reports a finished dispense, good or bad.
    pub fn is_final(&self) -> bool {
        !matches!(self, DispenseStatus::Dispensing)
    }
}

impl From<u8> for DispenseStatus {
    fn from(code: u8) -> Self {
        match code {
            0x01 => DispenseStatus::Dispensing,
            0x02 => DispenseStatus::Success,
            0x03 => DispenseStatus::Jammed,
            0x04 => DispenseStatus::MotorError,
            0x07 => DispenseStatus::ElevatorError,
            0xFF => DispenseStatus::Terminated,
            _ => DispenseStatus::Unknown(code),
        }
    }
}

impl std::fmt::Display for DispenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispenseStatus::Unknown(code) => write!(f, "Unknown (0x{:02X})", code),
            other => f.write_str(other.description()),
        }
    }
}

/// A data frame from the VMC, interpreted where its layout is known.
///
/// Payloads are otherwise passed through untouched; the controller firmware
/// revisions differ in the trailing fields they append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Result of a dispense request.
    DispensingStatus {
        /// Decoded first payload byte.
        status: DispenseStatus,
        /// Remaining payload bytes.
        extra: Vec<u8>,
    },

    /// Money accepted by the machine.
    MoneyReceived {
        /// Raw notice bytes.
        data: Vec<u8>,
    },

    /// Any other known inbound command.
    Known {
        /// The command.
        command: InboundCommand,
        /// Raw payload.
        data: Vec<u8>,
    },

    /// A code missing from the inbound table.
    Unknown {
        /// Wire code.
        code: u8,
        /// Raw payload.
        data: Vec<u8>,
    },
}

impl Response {
    /// Interpret a data frame's code and payload.
    pub fn decode(code: u8, payload: &[u8]) -> Response {
        match InboundCommand::from_code(code) {
            Some(InboundCommand::DispensingStatus) if !payload.is_empty() => {
                Response::DispensingStatus {
                    status: DispenseStatus::from(payload[0]),
                    extra: payload[1..].to_vec(),
                }
            }
            Some(InboundCommand::MoneyReceivedNotice) => Response::MoneyReceived {
                data: payload.to_vec(),
            },
            Some(command) => Response::Known {
                command,
                data: payload.to_vec(),
            },
            None => Response::Unknown {
                code,
                data: payload.to_vec(),
            },
        }
    }

    /// Short human-readable summary.
    pub fn summary(&self) -> String {
        match self {
            Response::DispensingStatus { status, .. } => status.to_string(),
            Response::MoneyReceived { data } => format!("money received ({} bytes)", data.len()),
            Response::Known { command, data } => format!("{} ({} bytes)", command.name(), data.len()),
            Response::Unknown { code, data } => format!("unknown 0x{:02X} ({} bytes)", code, data.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispense_status_table() {
        assert_eq!(DispenseStatus::from(0x02).description(), "Dispensing Success");
        assert_eq!(DispenseStatus::from(0x03), DispenseStatus::Jammed);
        assert_eq!(DispenseStatus::from(0x07), DispenseStatus::ElevatorError);
        assert_eq!(DispenseStatus::from(0xFF), DispenseStatus::Terminated);
        assert_eq!(DispenseStatus::from(0x55), DispenseStatus::Unknown(0x55));
        assert!(!DispenseStatus::Dispensing.is_final());
        assert_eq!(DispenseStatus::Unknown(0x55).to_string(), "Unknown (0x55)");
    }

    #[test]
    fn test_decode_dispensing_status() {
        match Response::decode(0x04, &[0x02]) {
            Response::DispensingStatus { status, extra } => {
                assert_eq!(status, DispenseStatus::Success);
                assert!(extra.is_empty());
            }
            other => panic!("Expected DispensingStatus, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_other() {
        assert!(matches!(Response::decode(0x21, &[1, 2]), Response::MoneyReceived { .. }));
        assert!(matches!(
            Response::decode(0x54, &[0]),
            Response::Known { command: InboundCommand::MachineStatusSimple, .. }
        ));
        assert_eq!(Response::decode(0x99, &[]).summary(), "unknown 0x99 (0 bytes)");
    }
}
