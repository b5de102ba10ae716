//! Signal colours and junction signal states.
//!
//! A signal state holds one colour per controlled link. The textual form uses
//! one character per link (`r`, `y`, `g`); uppercase letters are accepted on
//! parse and mean the same colour.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Colour shown to one controlled link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalColor {
    /// Stop.
    Red,
    /// Clearing.
    Yellow,
    /// Go.
    Green,
}

impl SignalColor {
    /// Character used in the textual state.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Red => 'r',
            Self::Yellow => 'y',
            Self::Green => 'g',
        }
    }

    /// Parses a single state character.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'r' | 'R' => Some(Self::Red),
            'y' | 'Y' => Some(Self::Yellow),
            'g' | 'G' => Some(Self::Green),
            _ => None,
        }
    }
}

/// Full signal state of a junction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignalState(Vec<SignalColor>);

impl SignalState {
    /// Creates a state from colours.
    #[must_use]
    pub fn new(colors: Vec<SignalColor>) -> Self {
        Self(colors)
    }

    /// A state with every link red.
    #[must_use]
    pub fn all_red(links: usize) -> Self {
        Self(vec![SignalColor::Red; links])
    }

    /// Number of links covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the state covers no links.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Colour for one link.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<SignalColor> {
        self.0.get(index).copied()
    }

    /// Sets the colour of one link. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, color: SignalColor) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = color;
        }
    }

    /// Colours in link order.
    #[must_use]
    pub fn colors(&self) -> &[SignalColor] {
        &self.0
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.0 {
            write!(f, "{}", c.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for SignalState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .enumerate()
            .map(|(index, found)| {
                SignalColor::from_char(found).ok_or(ValidationError::InvalidSignalColor { found, index })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Serialize for SignalState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SignalState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
