//! Wire-level actions exchanged with the runner.
//!
//! The wire format is line-oriented: each line of the runner's socket is
//! the datum of one action on the channel bound to that socket. Direction
//! and channel are supplied by the connector from its binding, not parsed
//! from the line.

use std::fmt;

/// Whether the runner drove this action (`Input`) or expects it (`Output`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// One action on the runner wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorxAction {
    pub direction: Direction,
    pub channel: String,
    pub data: String,
}

impl TorxAction {
    pub fn input(channel: impl Into<String>, data: impl Into<String>) -> Self {
        TorxAction {
            direction: Direction::Input,
            channel: channel.into(),
            data: data.into(),
        }
    }

    pub fn output(channel: impl Into<String>, data: impl Into<String>) -> Self {
        TorxAction {
            direction: Direction::Output,
            channel: channel.into(),
            data: data.into(),
        }
    }
}

impl fmt::Display for TorxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.direction, self.channel, self.data)
    }
}
