//! Protocol constants
//!
//! These constants define the start marker, command codes and response
//! correlation table used by the VMC serial protocol. Byte values must match
//! the controller firmware exactly.

use serde::Serialize;

use crate::error::ProtocolError;

// ============================================================================
// Framing
// ============================================================================

/// Two-byte start marker that begins every frame.
pub const STX: [u8; 2] = [0xFA, 0xFB];

/// Offset of the command byte within a frame.
pub const CMD_OFFSET: usize = 2;
/// Offset of the length byte within a frame.
pub const LEN_OFFSET: usize = 3;
/// Offset of the packet number, present only when the length byte is non-zero.
pub const PACK_NO_OFFSET: usize = 4;

/// Marker + command + length bytes.
pub const HEADER_LEN: usize = 4;
/// Smallest possible frame: header plus checksum.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;
/// Largest payload that fits alongside the packet number in a `u8` length.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - 1;

/// Poll from the VMC granting the host permission to transmit.
pub const CMD_POLL: u8 = 0x41;
/// Acknowledgement, sent by either side.
pub const CMD_ACK: u8 = 0x42;

/// The fixed idle acknowledgement frame.
pub const ACK_FRAME: [u8; 5] = [0xFA, 0xFB, CMD_ACK, 0x00, 0x43];

/// Number of transmissions attempted before a command is abandoned.
pub const MAX_RETRIES: u8 = 5;

/// Lowest valid packet number.
pub const PACK_NO_MIN: u8 = 1;
/// Highest valid packet number before wrapping.
pub const PACK_NO_MAX: u8 = 255;

// ============================================================================
// Commands sent by the host
// ============================================================================

/// Commands the host can send to the VMC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum OutboundCommand {
    // Dispensing
    CheckSelectionStatus = 0x01,
    DispenseItem = 0x03,
    CancelSelection = 0x05,
    DirectDriveMotor = 0x06,

    // Selection & config
    SetPrice = 0x12,
    SetInventory = 0x13,
    SetCapacity = 0x14,
    SetProductId = 0x15,
    SetPollInterval = 0x16,

    // Payment
    RequestGiveChange = 0x25,
    NotifyCashlessPayment = 0x27,
    SetPaymentAcceptance = 0x28,

    // System
    RequestInfoSync = 0x31,
    RequestStatusFull = 0x51,
    RequestStatusSimple = 0x53,
    CheckIcCardBalance = 0x61,
    RequestCardDeduction = 0x64,

    /// Wrapper for every menu setting; the first payload byte selects the setting.
    MenuCommandWrapper = 0x70,
}

impl OutboundCommand {
    /// Every outbound command, in code order.
    pub const ALL: [OutboundCommand; 18] = [
        OutboundCommand::CheckSelectionStatus,
        OutboundCommand::DispenseItem,
        OutboundCommand::CancelSelection,
        OutboundCommand::DirectDriveMotor,
        OutboundCommand::SetPrice,
        OutboundCommand::SetInventory,
        OutboundCommand::SetCapacity,
        OutboundCommand::SetProductId,
        OutboundCommand::SetPollInterval,
        OutboundCommand::RequestGiveChange,
        OutboundCommand::NotifyCashlessPayment,
        OutboundCommand::SetPaymentAcceptance,
        OutboundCommand::RequestInfoSync,
        OutboundCommand::RequestStatusFull,
        OutboundCommand::RequestStatusSimple,
        OutboundCommand::CheckIcCardBalance,
        OutboundCommand::RequestCardDeduction,
        OutboundCommand::MenuCommandWrapper,
    ];

    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Symbolic name as used in the vendor documentation.
    pub fn name(self) -> &'static str {
        match self {
            OutboundCommand::CheckSelectionStatus => "CHECK_SELECTION_STATUS",
            OutboundCommand::DispenseItem => "DISPENSE_ITEM",
            OutboundCommand::CancelSelection => "CANCEL_SELECTION",
            OutboundCommand::DirectDriveMotor => "DIRECT_DRIVE_MOTOR",
            OutboundCommand::SetPrice => "SET_PRICE",
            OutboundCommand::SetInventory => "SET_INVENTORY",
            OutboundCommand::SetCapacity => "SET_CAPACITY",
            OutboundCommand::SetProductId => "SET_PRODUCT_ID",
            OutboundCommand::SetPollInterval => "SET_POLL_INTERVAL",
            OutboundCommand::RequestGiveChange => "REQUEST_GIVE_CHANGE",
            OutboundCommand::NotifyCashlessPayment => "NOTIFY_CASHLESS_PAYMENT",
            OutboundCommand::SetPaymentAcceptance => "SET_PAYMENT_ACCEPTANCE",
            OutboundCommand::RequestInfoSync => "REQUEST_INFO_SYNC",
            OutboundCommand::RequestStatusFull => "REQUEST_STATUS_FULL",
            OutboundCommand::RequestStatusSimple => "REQUEST_STATUS_SIMPLE",
            OutboundCommand::CheckIcCardBalance => "CHECK_IC_CARD_BALANCE",
            OutboundCommand::RequestCardDeduction => "REQUEST_CARD_DEDUCTION",
            OutboundCommand::MenuCommandWrapper => "MENU_COMMAND_WRAPPER",
        }
    }

    /// Look up a command by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Look up a command by its symbolic name (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self, ProtocolError> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ProtocolError::UnknownCommandName(name.to_string()))
    }

    /// Inbound code that completes this command, if it expects data back.
    ///
    /// Commands without an entry complete on the VMC's ACK alone.
    pub fn expected_response(self) -> Option<InboundCommand> {
        expected_response(self.code())
    }
}

impl std::fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

// ============================================================================
// Commands received from the VMC
// ============================================================================

/// Frames the VMC sends to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum InboundCommand {
    /// Response to CHECK_SELECTION_STATUS.
    SelectionCheckResult = 0x02,
    /// Response to DISPENSE_ITEM.
    DispensingStatus = 0x04,
    /// Response to REQUEST_INFO_SYNC.
    SelectionInfoReport = 0x11,
    /// Pushed when the machine accepts money.
    MoneyReceivedNotice = 0x21,
    /// Pushed when the inserted credit changes.
    CurrentAmountReport = 0x23,
    /// The VMC offering the host a turn to transmit.
    Poll = 0x41,
    /// Acknowledgement of the previous frame.
    Ack = 0x42,
    /// Response to REQUEST_STATUS_FULL.
    MachineStatusFull = 0x52,
    /// Response to REQUEST_STATUS_SIMPLE.
    MachineStatusSimple = 0x54,
    /// Response to CHECK_IC_CARD_BALANCE.
    IcCardBalance = 0x62,
    /// Response to MENU_COMMAND_WRAPPER.
    MenuSettingResponse = 0x71,
}

impl InboundCommand {
    /// Every known inbound command, in code order.
    pub const ALL: [InboundCommand; 11] = [
        InboundCommand::SelectionCheckResult,
        InboundCommand::DispensingStatus,
        InboundCommand::SelectionInfoReport,
        InboundCommand::MoneyReceivedNotice,
        InboundCommand::CurrentAmountReport,
        InboundCommand::Poll,
        InboundCommand::Ack,
        InboundCommand::MachineStatusFull,
        InboundCommand::MachineStatusSimple,
        InboundCommand::IcCardBalance,
        InboundCommand::MenuSettingResponse,
    ];

    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Symbolic name as used in the vendor documentation.
    pub fn name(self) -> &'static str {
        match self {
            InboundCommand::SelectionCheckResult => "SELECTION_CHECK_RESULT",
            InboundCommand::DispensingStatus => "DISPENSING_STATUS",
            InboundCommand::SelectionInfoReport => "SELECTION_INFO_REPORT",
            InboundCommand::MoneyReceivedNotice => "MONEY_RECEIVED_NOTICE",
            InboundCommand::CurrentAmountReport => "CURRENT_AMOUNT_REPORT",
            InboundCommand::Poll => "POLL",
            InboundCommand::Ack => "ACK",
            InboundCommand::MachineStatusFull => "MACHINE_STATUS_FULL",
            InboundCommand::MachineStatusSimple => "MACHINE_STATUS_SIMPLE",
            InboundCommand::IcCardBalance => "IC_CARD_BALANCE",
            InboundCommand::MenuSettingResponse => "MENU_SETTING_RESPONSE",
        }
    }

    /// Look up an inbound command by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }
}

impl std::fmt::Display for InboundCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

// ============================================================================
// Response expectation map
// ============================================================================

/// Inbound code that completes a transaction for the given outbound code.
///
/// Outbound codes not listed here complete on ACK alone.
pub fn expected_response(code: u8) -> Option<InboundCommand> {
    match code {
        0x01 => Some(InboundCommand::SelectionCheckResult),
        0x03 => Some(InboundCommand::DispensingStatus),
        0x53 => Some(InboundCommand::MachineStatusSimple),
        0x51 => Some(InboundCommand::MachineStatusFull),
        0x31 => Some(InboundCommand::SelectionInfoReport),
        0x70 => Some(InboundCommand::MenuSettingResponse),
        0x61 => Some(InboundCommand::IcCardBalance),
        _ => None,
    }
}
