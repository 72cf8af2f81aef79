//! Events published to the render layer.

use serde::Serialize;

use chance_master_core::{ClaimKind, CodecError, GameResult, Side};

use crate::projection::LocalProjection;

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// A transient human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }
}

/// Everything the render layer is told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A new projection differing from the last one published.
    ProjectionChanged(Box<LocalProjection>),

    /// The claim kind changed.
    ClaimChanged { from: ClaimKind, to: ClaimKind },

    /// A side started offering a draw.
    DrawOffered(Side),

    /// A side withdrew its offer while the other still offers.
    DrawOfferWithdrawn(Side),

    /// Both offers are gone.
    DrawOfferCleared,

    /// The game result moved from none to a decided result.
    GameEnded(GameResult),

    /// A side's predicted clock reached zero. Advisory only.
    Flagged(Side),

    /// An optimistic move was not confirmed in time and was rolled back.
    OptimisticReverted,

    /// The confirmed board could not be encoded; the previous position is
    /// still shown.
    CodecFailed(CodecError),

    /// Transient message, e.g. a failed ledger submission.
    Notification(Notification),
}

impl SyncEvent {
    /// A one-line description for toasts and logs.
    pub fn describe(&self) -> String {
        match self {
            SyncEvent::ProjectionChanged(p) => format!("position {}", p.position),
            SyncEvent::ClaimChanged { to: ClaimKind::None, .. } => "Claim cleared".to_string(),
            SyncEvent::ClaimChanged { to, .. } => format!("{to:?} claim made"),
            SyncEvent::DrawOffered(side) => format!("{side} offered a draw"),
            SyncEvent::DrawOfferWithdrawn(side) => format!("{side} withdrew the draw offer"),
            SyncEvent::DrawOfferCleared => "Draw offer cleared".to_string(),
            SyncEvent::GameEnded(result) => format!("Game ended: {result:?}"),
            SyncEvent::Flagged(side) => format!("{side} flagged"),
            SyncEvent::OptimisticReverted => "Move was not confirmed; board restored".to_string(),
            SyncEvent::CodecFailed(e) => format!("Board data inconsistent: {e}"),
            SyncEvent::Notification(n) => n.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(
            SyncEvent::DrawOffered(Side::White).describe(),
            "White offered a draw"
        );
        assert_eq!(
            SyncEvent::ClaimChanged {
                from: ClaimKind::None,
                to: ClaimKind::Checkmate
            }
            .describe(),
            "Checkmate claim made"
        );
        assert_eq!(SyncEvent::Flagged(Side::Black).describe(), "Black flagged");
    }
}
