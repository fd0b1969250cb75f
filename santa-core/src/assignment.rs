use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{GameError, Participant, Roster};

/// Giver -> recipient mapping for one game epoch.
///
/// Stored as a plain JSON object so every client reads the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignments(BTreeMap<Participant, Participant>);

impl Assignments {
    pub fn recipient_for(&self, giver: &str) -> Option<&Participant> {
        self.0.get(giver)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Participant, &Participant)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that the mapping is a derangement of `roster`: every participant
    /// gives exactly once, receives exactly once, and never to themselves.
    pub fn validate(&self, roster: &Roster) -> Result<(), GameError> {
        for giver in roster.iter() {
            if !self.0.contains_key(giver) {
                return Err(GameError::MissingGiver {
                    giver: giver.clone(),
                });
            }
        }

        let mut received = HashSet::new();
        for (giver, recipient) in &self.0 {
            if !roster.contains(giver) {
                return Err(GameError::UnknownParticipant(giver.clone()));
            }
            if !roster.contains(recipient) {
                return Err(GameError::UnknownParticipant(recipient.clone()));
            }
            if giver == recipient {
                return Err(GameError::SelfAssigned(giver.clone()));
            }
            if !received.insert(recipient) {
                return Err(GameError::DuplicateRecipient(recipient.clone()));
            }
        }
        Ok(())
    }
}

impl FromIterator<(Participant, Participant)> for Assignments {
    fn from_iter<T: IntoIterator<Item = (Participant, Participant)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Draws a derangement of `roster` by rejection sampling: shuffle, and retry
/// while anyone lands on themselves. Expected attempts approach e (~2.72).
pub fn generate<R: Rng + ?Sized>(roster: &Roster, rng: &mut R) -> Assignments {
    let givers = roster.participants();
    let mut recipients = givers.to_vec();
    loop {
        recipients.shuffle(rng);
        if givers.iter().zip(&recipients).all(|(g, r)| g != r) {
            return givers
                .iter()
                .cloned()
                .zip(recipients.iter().cloned())
                .collect();
        }
    }
}

/// Validates untrusted names before generating, so a single-name roster is
/// rejected instead of spinning forever.
pub fn assign<I, S, R>(names: I, rng: &mut R) -> Result<Assignments, GameError>
where
    I: IntoIterator<Item = S>,
    S: Into<Participant>,
    R: Rng + ?Sized,
{
    let roster = Roster::new(names)?;
    Ok(generate(&roster, rng))
}
