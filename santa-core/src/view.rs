use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Assignments, OptimisticLayer, Participant, RevealRecord, Roster};

/// How a participant's button should be painted on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    /// Not revealed yet; clicking reveals.
    Hidden,
    /// Revealed from this device.
    Revealed,
    /// Revealed from another device.
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantControl {
    pub name: Participant,
    pub state: ControlState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealMessage {
    pub giver: Participant,
    pub recipient: Participant,
}

impl fmt::Display for RevealMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, you are Secret Santa for {}! 🎁",
            self.giver, self.recipient
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameView {
    pub controls: Vec<ParticipantControl>,
    pub revealed_count: usize,
    pub is_complete: bool,
    pub messages: Vec<RevealMessage>,
}

impl GameView {
    pub fn control(&self, name: &str) -> Option<ControlState> {
        self.controls
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.state)
    }
}

/// Builds the per-device view. `effective` is the reconciled record (see
/// [`OptimisticLayer::reconcile`]); messages need `assignments` and are
/// omitted while the mapping is still loading.
pub fn render(
    roster: &Roster,
    effective: &RevealRecord,
    layer: &OptimisticLayer,
    assignments: Option<&Assignments>,
) -> GameView {
    let controls = roster
        .iter()
        .map(|name| {
            let state = match (effective.is_revealed(name), layer.revealed_here(name)) {
                (false, _) => ControlState::Hidden,
                (true, true) => ControlState::Revealed,
                (true, false) => ControlState::Locked,
            };
            ParticipantControl {
                name: name.clone(),
                state,
            }
        })
        .collect::<Vec<_>>();

    let messages = match assignments {
        Some(assignments) => controls
            .iter()
            .filter(|c| c.state == ControlState::Revealed)
            .filter_map(|c| {
                assignments.recipient_for(&c.name).map(|r| RevealMessage {
                    giver: c.name.clone(),
                    recipient: r.clone(),
                })
            })
            .collect(),
        None => Vec::new(),
    };

    GameView {
        revealed_count: effective.revealed_count(roster),
        is_complete: effective.is_complete(roster),
        controls,
        messages,
    }
}
