//! Secret Santa rules: roster validation, derangement generation, reveal
//! bookkeeping and the view model handed to renderers.
//!
//! Everything here is synchronous and free of I/O. Persistence and
//! notification live in the backend crate.

mod assignment;
mod reveal;
mod roster;
mod view;

pub use assignment::{assign, generate, Assignments};
pub use reveal::{OptimisticLayer, RevealRecord};
pub use roster::{Roster, DEFAULT_ROSTER, RESERVED_NAME_CHARS};
pub use view::{render, ControlState, GameView, ParticipantControl, RevealMessage};

use thiserror::Error;

pub type Participant = String;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("roster needs at least two participants, got {0}")]
    RosterTooSmall(usize),
    #[error("participant listed twice: {0}")]
    DuplicateParticipant(Participant),
    #[error("participant name is blank")]
    BlankParticipant,
    #[error("participant name {0:?} contains a reserved character")]
    ReservedCharacter(Participant),
    #[error("participant not on roster: {0}")]
    UnknownParticipant(Participant),
    #[error("{giver} has no recipient")]
    MissingGiver { giver: Participant },
    #[error("{0} is assigned to themselves")]
    SelfAssigned(Participant),
    #[error("{0} receives more than one gift")]
    DuplicateRecipient(Participant),
}
