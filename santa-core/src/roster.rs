use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{GameError, Participant};

/// The family roster the game was written for.
pub const DEFAULT_ROSTER: [&str; 6] = ["Andy", "Liz", "George", "Harriet", "Charlie", "Camilla"];

/// Characters a name may not contain: names double as keys in the shared
/// reveal record.
pub const RESERVED_NAME_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// Ordered list of unique, non-blank participants. At least two entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Participant>", into = "Vec<Participant>")]
pub struct Roster(Vec<Participant>);

impl Roster {
    pub fn new<I, S>(names: I) -> Result<Self, GameError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Participant>,
    {
        let mut seen = HashSet::new();
        let mut participants = Vec::new();
        for name in names {
            let raw: Participant = name.into();
            let name = raw.trim();
            if name.is_empty() {
                return Err(GameError::BlankParticipant);
            }
            if name.chars().any(|c| c.is_control() || RESERVED_NAME_CHARS.contains(&c)) {
                return Err(GameError::ReservedCharacter(name.to_string()));
            }
            if !seen.insert(name.to_string()) {
                return Err(GameError::DuplicateParticipant(name.to_string()));
            }
            participants.push(name.to_string());
        }

        if participants.len() < 2 {
            return Err(GameError::RosterTooSmall(participants.len()));
        }
        Ok(Self(participants))
    }

    pub fn participants(&self) -> &[Participant] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|p| p == name)
    }

    /// Looks up `name`, failing with [`GameError::UnknownParticipant`].
    pub fn require(&self, name: &str) -> Result<&Participant, GameError> {
        self.0
            .iter()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| GameError::UnknownParticipant(name.to_string()))
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self(DEFAULT_ROSTER.iter().map(|n| n.to_string()).collect())
    }
}

impl TryFrom<Vec<Participant>> for Roster {
    type Error = GameError;

    fn try_from(names: Vec<Participant>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<Roster> for Vec<Participant> {
    fn from(roster: Roster) -> Self {
        roster.0
    }
}
