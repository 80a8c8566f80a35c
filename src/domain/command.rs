//! Motion command alphabet
//!
//! Every command travels over the wire as exactly one ASCII byte.

use std::fmt;

/// A single control command understood by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Up,
    Forward,
    Back,
    Down,
    Left,
    Right,
    Clockwise,
    CounterClockwise,
    /// Dual purpose: toggles the run state on release
    StartStop,
}

impl Command {
    /// All commands in control-pad order
    pub const ALL: [Command; 9] = [
        Command::Up,
        Command::Forward,
        Command::Back,
        Command::Down,
        Command::Left,
        Command::Right,
        Command::Clockwise,
        Command::CounterClockwise,
        Command::StartStop,
    ];

    /// The wire character for this command
    pub fn as_char(self) -> char {
        match self {
            Self::Up => 'U',
            Self::Forward => 'F',
            Self::Back => 'B',
            Self::Down => 'D',
            Self::Left => 'L',
            Self::Right => 'R',
            Self::Clockwise => 'C',
            Self::CounterClockwise => 'W',
            Self::StartStop => 'S',
        }
    }

    /// The single byte written to the characteristic
    pub fn as_byte(self) -> u8 {
        self.as_char() as u8
    }

    /// Button caption used by the control pad
    pub fn label(self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Forward => "Forward",
            Self::Back => "Back",
            Self::Down => "Down",
            Self::Left => "Left",
            Self::Right => "Right",
            Self::Clockwise => "CW",
            Self::CounterClockwise => "CCW",
            Self::StartStop => "Start/Stop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}
