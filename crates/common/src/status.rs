//! Status codes reported by the decode engine.
//!
//! The engine reports one status per decoded picture and a sticky "last
//! error" for the whole session. Codes split into three groups: success,
//! warnings (decoding continues, possibly with concealment) and errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A status code reported by the decode engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HwStatus {
    #[default]
    Success,

    // Errors
    InitFailed,
    ChanCreation,
    NoMemory,
    StreamOverflow,
    TooManySlices,
    WatchdogTimeout,
    NotSupported,
    RequestMalformed,
    CmdNotAllowed,
    InvalidCmdValue,
    /// A code outside the known table; treated as an error.
    Unknown(u8),

    // Warnings
    ConcealDetect,
    HwConcealDetect,
    InvalidAccessUnitStructure,
    SeiOverflow,
    LcuOverflow,
    UnsupportedNal,
}

/// First numeric code of the warning range.
const WARNING_BASE: u8 = 0x80;

impl HwStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_warning(self) -> bool {
        matches!(
            self,
            Self::ConcealDetect
                | Self::HwConcealDetect
                | Self::InvalidAccessUnitStructure
                | Self::SeiOverflow
                | Self::LcuOverflow
                | Self::UnsupportedNal
        )
    }

    pub fn is_error(self) -> bool {
        !self.is_success() && !self.is_warning()
    }

    /// Warnings that mean the engine substituted reference data for the picture.
    pub fn is_concealment(self) -> bool {
        matches!(
            self,
            Self::ConcealDetect | Self::HwConcealDetect | Self::InvalidAccessUnitStructure
        )
    }

    /// Decode the engine's numeric status code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::InitFailed,
            2 => Self::ChanCreation,
            3 => Self::NoMemory,
            4 => Self::StreamOverflow,
            5 => Self::TooManySlices,
            6 => Self::WatchdogTimeout,
            7 => Self::NotSupported,
            8 => Self::RequestMalformed,
            9 => Self::CmdNotAllowed,
            10 => Self::InvalidCmdValue,
            0x80 => Self::ConcealDetect,
            0x81 => Self::HwConcealDetect,
            0x82 => Self::InvalidAccessUnitStructure,
            0x83 => Self::SeiOverflow,
            0x84 => Self::LcuOverflow,
            0x85 => Self::UnsupportedNal,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::InitFailed => 1,
            Self::ChanCreation => 2,
            Self::NoMemory => 3,
            Self::StreamOverflow => 4,
            Self::TooManySlices => 5,
            Self::WatchdogTimeout => 6,
            Self::NotSupported => 7,
            Self::RequestMalformed => 8,
            Self::CmdNotAllowed => 9,
            Self::InvalidCmdValue => 10,
            Self::Unknown(code) => code,
            Self::ConcealDetect => WARNING_BASE,
            Self::HwConcealDetect => WARNING_BASE + 1,
            Self::InvalidAccessUnitStructure => WARNING_BASE + 2,
            Self::SeiOverflow => WARNING_BASE + 3,
            Self::LcuOverflow => WARNING_BASE + 4,
            Self::UnsupportedNal => WARNING_BASE + 5,
        }
    }
}

impl fmt::Display for HwStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Success => "Success",
            Self::InitFailed => "Failed to initialize the decoder",
            Self::ChanCreation => "Channel creation failed, no resources available",
            Self::NoMemory => "Memory shortage detected (DMA, embedded memory or virtual memory)",
            Self::StreamOverflow => "Stream overflow",
            Self::TooManySlices => "Too many slices",
            Self::WatchdogTimeout => "Watchdog timeout",
            Self::NotSupported => "Not supported",
            Self::RequestMalformed => "Request malformed",
            Self::CmdNotAllowed => "Command not allowed",
            Self::InvalidCmdValue => "Invalid command value",
            Self::Unknown(code) => return write!(f, "Unknown error (0x{code:02x})"),
            Self::ConcealDetect => "Concealment detected",
            Self::HwConcealDetect => "Hardware concealment detected",
            Self::InvalidAccessUnitStructure => "Invalid access unit structure detected",
            Self::SeiOverflow => "SEI metadata buffer is too small",
            Self::LcuOverflow => "LCU overflow",
            Self::UnsupportedNal => "Unsupported NAL unit skipped",
        };
        f.write_str(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(HwStatus::Success.is_success());
        assert!(!HwStatus::Success.is_error());
        assert!(HwStatus::NoMemory.is_error());
        assert!(HwStatus::Unknown(0x42).is_error());
        assert!(HwStatus::SeiOverflow.is_warning());
        assert!(!HwStatus::SeiOverflow.is_concealment());
        assert!(HwStatus::ConcealDetect.is_concealment());
        assert!(HwStatus::InvalidAccessUnitStructure.is_concealment());
    }

    #[test]
    fn codes_map_back() {
        for code in (0..=10).chain(0x80..=0x85) {
            assert_eq!(HwStatus::from_code(code).code(), code);
        }
        assert_eq!(HwStatus::from_code(0x55), HwStatus::Unknown(0x55));
    }
}
