//! Move-commit pipeline.
//!
//! ```text
//! Idle ─► Validating ─► Proving ─► Applied ─► Submitting ─► Idle
//!             │             │
//!             └─────────────┴──► Idle (error, nothing mutated)
//! ```
//!
//! Validation is local and cheap. Proving is the only slow step: the
//! projection is marked busy and the clock frozen until the proof service
//! answers or the timeout elapses. Once a proof exists the move is shown
//! optimistically and submitted to the ledger on a background task; a
//! failed submission is reported as a notification, never rolled back.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use chance_master_core::{
    resolve_move, rules, DiceTriple, Move, MoveRejection, PieceType, Position, SessionId,
    Side, Square,
};
use chance_master_indexer::Indexer;

use crate::error::CommitError;
use crate::services::{fire_and_forget, Ledger, LedgerCall, ProofRequest, ProofService};
use crate::synchronizer::Synchronizer;

/// Where the pipeline is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    Proving,
    Applied,
    Submitting,
}

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard bound on a proof request.
    pub proof_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proof_timeout: Duration::from_secs(20),
        }
    }
}

/// A validated move waiting for its proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub session: SessionId,
    pub mv: Move,
    pub dice: DiceTriple,
    pub pre: Position,
    pub post: Position,
}

/// Outcome of a commit that got a proof.
#[derive(Debug)]
pub struct CommitOutcome {
    pub mv: Move,
    /// The background ledger submission.
    pub submission: JoinHandle<()>,
}

/// Check a candidate move against the rendered position and dice.
///
/// Accepts iff the piece belongs to the side to move, that side is
/// `seat`, the dice are rolled and include the piece type, and the move
/// is legal.
pub fn validate_move(
    position: &Position,
    dice: &DiceTriple,
    seat: Option<Side>,
    from: Square,
    to: Square,
    promotion: Option<PieceType>,
) -> Result<Move, MoveRejection> {
    if dice.is_unrolled() {
        return Err(MoveRejection::DiceNotRolled);
    }
    let piece = position
        .piece_at(from)
        .ok_or(MoveRejection::EmptySquare(from))?;
    let to_move = position.side_to_move;
    if piece.side != to_move {
        return Err(MoveRejection::NotYourTurn { to_move });
    }
    match seat {
        None => return Err(MoveRejection::NotSeated),
        Some(side) if side != to_move => return Err(MoveRejection::NotYourTurn { to_move }),
        Some(_) => {}
    }
    if !dice.allows(piece.kind) {
        return Err(MoveRejection::PieceNotRolled(piece.kind));
    }
    resolve_move(position, from, to, promotion).ok_or(MoveRejection::IllegalMove { from, to })
}

fn check<I: Indexer + ?Sized>(
    sync: &Synchronizer<I>,
    from: Square,
    to: Square,
    promotion: Option<PieceType>,
) -> Result<PendingMove, CommitError> {
    let Some(projection) = sync.projection() else {
        return Err(MoveRejection::NoSession.into());
    };
    if projection.is_over() {
        return Err(MoveRejection::GameOver.into());
    }

    let pre = sync.position()?;
    let mv = validate_move(
        &pre,
        &projection.dice,
        projection.seat.side(),
        from,
        to,
        promotion,
    )?;
    let post = rules::apply(&pre, &mv);
    Ok(PendingMove {
        session: projection.session,
        mv,
        dice: projection.dice,
        pre,
        post,
    })
}

/// Drives one move at a time from validation to submission.
pub struct MovePipeline {
    prover: Arc<dyn ProofService>,
    ledger: Arc<dyn Ledger>,
    config: PipelineConfig,
    state: PipelineState,
}

impl MovePipeline {
    pub fn new(
        prover: Arc<dyn ProofService>,
        ledger: Arc<dyn Ledger>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            prover,
            ledger,
            config,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.ledger.clone()
    }

    /// Validate a move against the synchronizer's current projection.
    pub fn validate<I: Indexer + ?Sized>(
        &self,
        sync: &Synchronizer<I>,
        from: Square,
        to: Square,
        promotion: Option<PieceType>,
    ) -> Result<PendingMove, CommitError> {
        if self.state != PipelineState::Idle || sync.is_proving() {
            return Err(MoveRejection::Busy.into());
        }
        check(sync, from, to, promotion)
    }

    /// Validate and enter Proving. Returns the pending move together with
    /// the proof request to await.
    ///
    /// The returned future does not borrow the pipeline or the
    /// synchronizer, so callers keep pumping updates while it runs.
    pub fn begin<I: Indexer + ?Sized>(
        &mut self,
        sync: &mut Synchronizer<I>,
        from: Square,
        to: Square,
        promotion: Option<PieceType>,
    ) -> Result<
        (
            PendingMove,
            impl Future<Output = Result<Vec<String>, CommitError>> + Send + 'static,
        ),
        CommitError,
    > {
        if self.state != PipelineState::Idle || sync.is_proving() {
            debug!(from = %from, to = %to, "move rejected: busy");
            return Err(MoveRejection::Busy.into());
        }
        self.state = PipelineState::Validating;
        let pending = match check(sync, from, to, promotion) {
            Ok(pending) => pending,
            Err(e) => {
                self.state = PipelineState::Idle;
                debug!(from = %from, to = %to, error = %e, "move rejected");
                return Err(e);
            }
        };

        self.state = PipelineState::Proving;
        sync.set_proving(true);
        let request =
            ProofRequest::new(pending.pre.to_position_string(), &pending.mv, &pending.dice);
        debug!(session = %pending.session, mv = %pending.mv, "proving");
        Ok((pending, self.proof_future(request)))
    }

    fn proof_future(
        &self,
        request: ProofRequest,
    ) -> impl Future<Output = Result<Vec<String>, CommitError>> + Send + 'static {
        let prover = self.prover.clone();
        let limit = self.config.proof_timeout;
        async move {
            let response = tokio::time::timeout(limit, prover.prove(&request))
                .await
                .map_err(|_| CommitError::ProofTimeout(limit))??;
            if !response.success {
                let reason = response
                    .error
                    .unwrap_or_else(|| "proof service reported failure".to_string());
                return Err(CommitError::ProofFailed(reason));
            }
            if response.calldata.is_empty() {
                return Err(CommitError::ProofFailed("empty proof".to_string()));
            }
            Ok(response.calldata)
        }
    }

    /// Leave Proving with the proof result: apply optimistically and submit
    /// on success, return to Idle untouched on failure.
    ///
    /// A proof is dropped unsubmitted if the session changed or the
    /// confirmed turn moved on while proving.
    pub fn finish<I: Indexer + ?Sized>(
        &mut self,
        sync: &mut Synchronizer<I>,
        pending: PendingMove,
        proof: Result<Vec<String>, CommitError>,
    ) -> Result<CommitOutcome, CommitError> {
        let proof = match proof {
            Ok(proof) => proof,
            Err(e) => {
                sync.set_proving(false);
                self.state = PipelineState::Idle;
                info!(session = %pending.session, mv = %pending.mv, error = %e, "proof failed");
                return Err(e);
            }
        };

        let mover = pending.pre.side_to_move;
        let applied = sync.session_id() == Some(pending.session)
            && sync.apply_optimistic(&pending.post, mover);
        sync.set_proving(false);
        if !applied {
            self.state = PipelineState::Idle;
            let rejection = if sync.session_id() == Some(pending.session) {
                MoveRejection::NotYourTurn {
                    to_move: mover.opponent(),
                }
            } else {
                MoveRejection::NoSession
            };
            info!(
                session = %pending.session,
                mv = %pending.mv,
                reason = %rejection,
                "proof dropped"
            );
            return Err(rejection.into());
        }
        self.state = PipelineState::Applied;

        self.state = PipelineState::Submitting;
        let submission = fire_and_forget(
            self.ledger.clone(),
            LedgerCall::submit_move(pending.session, &proof),
            sync.event_sender(),
            "Move",
        );
        self.state = PipelineState::Idle;
        info!(session = %pending.session, mv = %pending.mv, "move submitted");

        Ok(CommitOutcome {
            mv: pending.mv,
            submission,
        })
    }

    /// Run a full commit, pumping synchronizer updates while proving.
    pub async fn commit<I: Indexer + ?Sized>(
        &mut self,
        sync: &mut Synchronizer<I>,
        from: Square,
        to: Square,
        promotion: Option<PieceType>,
    ) -> Result<CommitOutcome, CommitError> {
        let (pending, proof) = self.begin(sync, from, to, promotion)?;
        tokio::pin!(proof);
        let result = loop {
            tokio::select! {
                result = &mut proof => break result,
                _ = sync.pump() => {}
            }
        };
        self.finish(sync, pending, result)
    }
}
