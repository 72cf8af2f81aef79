//! External services: the proof service and the ledger.
//!
//! Both are seams for tests. The proof service turns a pre-move position,
//! a move and the dice into opaque calldata; the ledger accepts calldata
//! per entrypoint and returns a transaction handle without waiting for
//! confirmation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use chance_master_core::{ClaimKind, DiceTriple, Move, SessionId};

use crate::error::ServiceError;
use crate::events::{Notification, SyncEvent};

// ─────────────────────────────────────────────────────────────────────────────
// Proof service
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for the proof service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRequest {
    /// Pre-move position string.
    pub fen: String,
    /// Compact move encoding with a promotion letter when promoting.
    #[serde(rename = "move")]
    pub mv: String,
    /// Dice as piece tags (1..=6).
    pub dice: [u8; 3],
}

impl ProofRequest {
    pub fn new(fen: impl Into<String>, mv: &Move, dice: &DiceTriple) -> Self {
        Self {
            fen: fen.into(),
            mv: mv.uci(),
            dice: dice.tags(),
        }
    }
}

/// Response body of the proof service.
///
/// Failures carry `"calldata": null`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProofResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "de_calldata")]
    pub calldata: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProofResponse {
    pub fn ok(calldata: Vec<String>) -> Self {
        Self {
            success: true,
            calldata,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            calldata: Vec::new(),
            error: Some(error.into()),
        }
    }
}

fn de_calldata<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

/// Produces move proofs.
#[async_trait]
pub trait ProofService: Send + Sync {
    async fn prove(&self, request: &ProofRequest) -> Result<ProofResponse, ServiceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────────────────

/// Handle of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One call to a ledger entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCall {
    pub entrypoint: &'static str,
    pub calldata: Vec<String>,
}

impl LedgerCall {
    fn session_only(entrypoint: &'static str, session: SessionId) -> Self {
        Self {
            entrypoint,
            calldata: vec![session_arg(session)],
        }
    }

    pub fn roll(session: SessionId) -> Self {
        Self::session_only("roll", session)
    }

    /// Submit a move: `[session, len, ...proof]`.
    pub fn submit_move(session: SessionId, proof: &[String]) -> Self {
        let mut calldata = Vec::with_capacity(proof.len() + 2);
        calldata.push(session_arg(session));
        calldata.push(format!("{:#x}", proof.len()));
        calldata.extend(proof.iter().cloned());
        Self {
            entrypoint: "submit_move",
            calldata,
        }
    }

    pub fn resign(session: SessionId) -> Self {
        Self::session_only("resign", session)
    }

    /// Offer a draw, or accept the opponent's offer.
    pub fn offer_draw(session: SessionId) -> Self {
        Self::session_only("offer_draw", session)
    }

    pub fn claim(session: SessionId, kind: ClaimKind) -> Self {
        Self {
            entrypoint: "claim",
            calldata: vec![session_arg(session), kind.discriminant().to_string()],
        }
    }

    pub fn accept_claim(session: SessionId) -> Self {
        Self::session_only("accept_claim", session)
    }

    pub fn adjudicate_claim(session: SessionId) -> Self {
        Self::session_only("adjudicate_claim", session)
    }

    pub fn flag_win(session: SessionId) -> Self {
        Self::session_only("flag_win", session)
    }
}

fn session_arg(session: SessionId) -> String {
    format!("{:#x}", session.value())
}

/// Executes transactions.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn execute(&self, call: LedgerCall) -> Result<TxHandle, ServiceError>;
}

/// Submit `call` on a background task. Failure is reported as an error
/// notification on `events`, never as a rollback.
pub fn fire_and_forget(
    ledger: Arc<dyn Ledger>,
    call: LedgerCall,
    events: broadcast::Sender<SyncEvent>,
    label: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let entrypoint = call.entrypoint;
        match ledger.execute(call).await {
            Ok(tx) => debug!(entrypoint, tx = %tx, "{label} submitted"),
            Err(e) => {
                warn!(entrypoint, error = %e, "{label} failed");
                let _ = events.send(SyncEvent::Notification(Notification::error(format!(
                    "{label} failed: {e}"
                ))));
            }
        }
    })
}

/// In-memory service doubles.
pub mod memory {
    use std::collections::VecDeque;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use super::*;

    /// A proof service answering from a script.
    ///
    /// Queued answers are served in order; once the queue is empty every
    /// request gets a generic success.
    #[derive(Default)]
    pub struct ScriptedProver {
        answers: Mutex<VecDeque<Result<ProofResponse, ServiceError>>>,
        requests: Mutex<Vec<ProofRequest>>,
        delay: Mutex<Option<Duration>>,
    }

    impl ScriptedProver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, answer: Result<ProofResponse, ServiceError>) {
            self.answers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(answer);
        }

        /// Delay every answer by `delay`.
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
        }

        pub fn requests(&self) -> Vec<ProofRequest> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl ProofService for ScriptedProver {
        async fn prove(&self, request: &ProofRequest) -> Result<ProofResponse, ServiceError> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let answer = self
                .answers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            answer.unwrap_or_else(|| Ok(ProofResponse::ok(vec!["0x1".into(), "0x2".into()])))
        }
    }

    /// A ledger that records every call.
    #[derive(Default)]
    pub struct RecordingLedger {
        calls: Mutex<Vec<LedgerCall>>,
        failure: Mutex<Option<ServiceError>>,
    }

    impl RecordingLedger {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent call fail with `error`.
        pub fn fail_with(&self, error: Option<ServiceError>) {
            *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = error;
        }

        pub fn calls(&self) -> Vec<LedgerCall> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl Ledger for RecordingLedger {
        async fn execute(&self, call: LedgerCall) -> Result<TxHandle, ServiceError> {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(call);
            if let Some(e) = self
                .failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
            {
                return Err(e);
            }
            Ok(TxHandle(format!("{:#x}", calls.len())))
        }
    }
}
