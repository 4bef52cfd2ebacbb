//! Status light feedback.
//!
//! Pure mapping from orchestrator state to a [`LightCommand`].  The command
//! is dispatched best-effort over the device link as `set_light`; the
//! mapping itself never touches I/O.
//!
//! | State        | Colour | Brightness |
//! |--------------|--------|------------|
//! | Idle         | blue   | 30         |
//! | Debouncing   | purple | 100        |
//! | Generating   | purple | 100        |
//! | Printing     | green  | 100        |
//! | Error(*)     | red    | 100        |

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::fsm::OrchestratorState;

/// Named colours understood by the controller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Off,
    Red,
    Yellow,
    Green,
    Blue,
    Purple,
    White,
}

impl Color {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Purple => "purple",
            Self::White => "white",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `set_light` request.  Brightness is a percentage (0–100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LightCommand {
    pub color: Color,
    pub brightness: u8,
}

impl LightCommand {
    pub const fn new(color: Color, brightness: u8) -> Self {
        Self { color, brightness }
    }
}

pub const LIGHT_IDLE: LightCommand = LightCommand::new(Color::Blue, 30);
pub const LIGHT_BUSY: LightCommand = LightCommand::new(Color::Purple, 100);
pub const LIGHT_PRINTING: LightCommand = LightCommand::new(Color::Green, 100);
pub const LIGHT_ERROR: LightCommand = LightCommand::new(Color::Red, 100);

/// Colour sweep played once at startup, before the idle light.
pub const STARTUP_SEQUENCE: [LightCommand; 5] = [
    LightCommand::new(Color::Red, 50),
    LightCommand::new(Color::Yellow, 50),
    LightCommand::new(Color::Green, 50),
    LightCommand::new(Color::Blue, 50),
    LightCommand::new(Color::Purple, 50),
];

/// Gap between startup sweep steps.
pub const STARTUP_STEP_MS: u64 = 300;

/// The light for `state`.  Same state, same command.
pub const fn light_for(state: OrchestratorState) -> LightCommand {
    match state {
        OrchestratorState::Idle => LIGHT_IDLE,
        OrchestratorState::Debouncing | OrchestratorState::Generating => LIGHT_BUSY,
        OrchestratorState::Printing => LIGHT_PRINTING,
        OrchestratorState::Error(_) => LIGHT_ERROR,
    }
}
