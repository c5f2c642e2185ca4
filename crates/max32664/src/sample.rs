use crate::registers::{BASIC_FRAME_LEN, EXTENDED_FRAME_LEN};

/// One decoded algorithm report.
///
/// Only ever built from a FIFO that held at least one sample. A report with
/// all fields zero is something the device reported, not a decode fallback;
/// absence of data is [`Poll::Empty`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Beats per minute.
    pub heart_rate: u16,
    /// Algorithm confidence, 0-100 %.
    pub confidence: u8,
    /// Oxygen saturation in percent. Whole percent in [`Basic`] mode,
    /// tenths of a percent in [`Extended`] mode.
    ///
    /// [`Basic`]: crate::registers::AlgoMode::Basic
    /// [`Extended`]: crate::registers::AlgoMode::Extended
    pub oxygen: f32,
    /// Device reported finger/algorithm state.
    pub status: u8,
    /// Extra fields of the extended report, `None` in basic mode.
    pub extended: Option<Extended>,
}

/// Extended-mode additions to a [`Reading`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extended {
    /// Red/infrared absorption ratio.
    pub r_value: f32,
    pub status: u8,
}

/// Outcome of draining the FIFO once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Poll {
    Ready(Reading),
    /// FIFO fill level was zero, nothing was decoded.
    Empty,
    /// The hub status register reported this fault code, nothing was decoded.
    Fault(u8),
}

impl Poll {
    pub fn reading(self) -> Option<Reading> {
        match self {
            Poll::Ready(reading) => Some(reading),
            Poll::Empty | Poll::Fault(_) => None,
        }
    }
}

impl Reading {
    /// All multi-byte fields are big-endian fixed point, scaled by 10. The
    /// basic report truncates SpO2 to whole percent, the extended report
    /// keeps the tenths. That asymmetry is the device's, not ours.
    pub(crate) fn from_basic_frame(frame: &[u8; BASIC_FRAME_LEN]) -> Self {
        Reading {
            heart_rate: u16::from_be_bytes([frame[0], frame[1]]) / 10,
            confidence: frame[2],
            oxygen: (u16::from_be_bytes([frame[3], frame[4]]) / 10) as f32,
            status: frame[5],
            extended: None,
        }
    }

    pub(crate) fn from_extended_frame(frame: &[u8; EXTENDED_FRAME_LEN]) -> Self {
        Reading {
            heart_rate: u16::from_be_bytes([frame[0], frame[1]]) / 10,
            confidence: frame[2],
            oxygen: f32::from(u16::from_be_bytes([frame[3], frame[4]])) / 10.0,
            status: frame[5],
            extended: Some(Extended {
                r_value: f32::from(u16::from_be_bytes([frame[6], frame[7]])) / 10.0,
                status: frame[8],
            }),
        }
    }
}
