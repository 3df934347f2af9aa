//! Rate-based rhythm label.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lower bound (inclusive) of the normal resting rate.
pub const BRADYCARDIA_BELOW_BPM: f64 = 60.0;
/// Upper bound (inclusive) of the normal resting rate.
pub const TACHYCARDIA_ABOVE_BPM: f64 = 100.0;

/// Three ordinal rhythm classes. The numeric codes are the training labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Normal,
    Bradycardia,
    Tachycardia,
}

impl Label {
    pub fn code(self) -> u8 {
        match self {
            Label::Normal => 0,
            Label::Bradycardia => 1,
            Label::Tachycardia => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Label::Normal),
            1 => Some(Label::Bradycardia),
            2 => Some(Label::Tachycardia),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Label::Normal => "Normal",
            Label::Bradycardia => "Bradycardia",
            Label::Tachycardia => "Tachycardia",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Label a record by its mean heart rate. Both bounds belong to `Normal`.
pub fn classify(mean_bpm: f64) -> Label {
    if mean_bpm < BRADYCARDIA_BELOW_BPM {
        Label::Bradycardia
    } else if mean_bpm <= TACHYCARDIA_ABOVE_BPM {
        Label::Normal
    } else {
        Label::Tachycardia
    }
}
