//! Leg roles and the audio directions they imply.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{BridgeError, BridgeResult};

/// Which side of a call a leg is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// First party of a bridged call
    A,
    /// Second party of a bridged call
    B,
    /// Single caller talking to an assistant
    Solo,
}

impl Role {
    /// Parse a role string (case-insensitive).
    pub fn parse(s: &str) -> BridgeResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "a" => Ok(Role::A),
            "b" => Ok(Role::B),
            "solo" => Ok(Role::Solo),
            _ => Err(BridgeError::InvalidRole(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::A => "a",
            Role::B => "b",
            Role::Solo => "solo",
        }
    }

    /// The far side of this leg. A solo leg is its own far side.
    pub fn opposite(&self) -> Role {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
            Role::Solo => Role::Solo,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flow of audio through one AI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// A's speech, delivered to B
    #[serde(rename = "a_to_b")]
    AtoB,
    /// B's speech, delivered to A
    #[serde(rename = "b_to_a")]
    BtoA,
    /// The solo caller's speech, answered back to the same caller
    #[serde(rename = "solo")]
    Solo,
}

impl Direction {
    /// Session that consumes speech from `role`.
    pub fn from_source(role: Role) -> Self {
        match role {
            Role::A => Direction::AtoB,
            Role::B => Direction::BtoA,
            Role::Solo => Direction::Solo,
        }
    }

    /// Session whose output is played to `role`.
    pub fn to_target(role: Role) -> Self {
        Direction::from_source(role.opposite())
    }

    pub fn source(&self) -> Role {
        match self {
            Direction::AtoB => Role::A,
            Direction::BtoA => Role::B,
            Direction::Solo => Role::Solo,
        }
    }

    pub fn target(&self) -> Role {
        self.source().opposite()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::AtoB => "a_to_b",
            Direction::BtoA => "b_to_a",
            Direction::Solo => "solo",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("a").unwrap(), Role::A);
        assert_eq!(Role::parse("B").unwrap(), Role::B);
        assert_eq!(Role::parse(" Solo ").unwrap(), Role::Solo);
        assert!(matches!(Role::parse("c"), Err(BridgeError::InvalidRole(_))));
        assert!(matches!(Role::parse(""), Err(BridgeError::InvalidRole(_))));
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(Direction::from_source(Role::A), Direction::AtoB);
        assert_eq!(Direction::from_source(Role::B), Direction::BtoA);
        assert_eq!(Direction::to_target(Role::A), Direction::BtoA);
        assert_eq!(Direction::to_target(Role::B), Direction::AtoB);
        assert_eq!(Direction::AtoB.target(), Role::B);
        assert_eq!(Direction::BtoA.target(), Role::A);
        assert_eq!(Direction::Solo.source(), Role::Solo);
        assert_eq!(Direction::Solo.target(), Role::Solo);
        assert_eq!(Direction::to_target(Role::Solo), Direction::Solo);
    }
}
