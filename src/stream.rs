// Live-stream driver: plays a battle end to end, generating each turn via
// the oracle and pushing progress events over a channel that the SSE handler
// drains. Turns are submitted through the same path as the polled fighter
// API, so finalization happens exactly once no matter who drove the battle.
//
// A driver failure emits a sanitized error event and reverts the battle to
// `in_progress`, so a later stream request (or the fighters themselves) can
// pick it up again instead of it being stuck in `streaming` forever.

use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use crate::agents::{self, ResolvedAgent};
use crate::battle;
use crate::db::{Battle, Database};
use crate::error::ArenaError;
use crate::metrics;
use crate::oracle::{self, GenerateRequest, Oracle, OracleError};

/// One server-sent event, kept as (name, payload) until the SSE boundary.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub name: &'static str,
    pub data: serde_json::Value,
}

impl StreamEvent {
    fn new(name: &'static str, data: serde_json::Value) -> Self {
        Self { name, data }
    }

    pub fn into_sse(self) -> Event {
        Event::default()
            .event(self.name)
            .data(self.data.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
enum DriverError {
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("oracle produced an empty turn")]
    EmptyGeneration,
}

impl From<sqlx::Error> for DriverError {
    fn from(e: sqlx::Error) -> Self {
        DriverError::Arena(ArenaError::Store(e))
    }
}

/// Spawn a driver for a battle already claimed into `streaming`. Returns the
/// event receiver for the SSE response. The driver runs to completion even
/// if the receiver is dropped, so a disconnecting viewer cannot strand a
/// half-played battle.
pub fn spawn_driver(
    db: Arc<Database>,
    oracle: Arc<dyn Oracle>,
    total_rounds: u32,
    turn_delay: Duration,
    battle: Battle,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        metrics::ACTIVE_STREAMS.inc();
        let result = drive(&db, oracle.as_ref(), total_rounds, turn_delay, &battle, &tx).await;
        metrics::ACTIVE_STREAMS.dec();

        if let Err(e) = result {
            metrics::STREAMS_ERRORED_TOTAL.inc();
            tracing::error!(battle_id = %battle.id, "Stream driver failed: {e}");
            let _ = tx
                .send(StreamEvent::new(
                    "error",
                    json!({ "message": "Stream interrupted, battle can be resumed" }),
                ))
                .await;
            if let Err(e) = db.revert_streaming(&battle.id).await {
                tracing::error!(battle_id = %battle.id, "Failed to revert stream claim: {e}");
            }
        }
    });
    rx
}

async fn drive(
    db: &Database,
    oracle_client: &dyn Oracle,
    total_rounds: u32,
    turn_delay: Duration,
    battle: &Battle,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), DriverError> {
    let agent1 = agents::resolve(db, &battle.agent1_id).await?;
    let agent2 = agents::resolve(db, &battle.agent2_id).await?;

    loop {
        // Reload each iteration: the battle may have progressed before this
        // stream claimed it.
        let roasts = db.list_roasts(&battle.id).await?;
        if battle::is_complete(roasts.len(), total_rounds) {
            battle::finalize(db, &battle.id).await?;
            send_battle_complete(db, battle, tx).await?;
            return Ok(());
        }

        let author_id = battle::next_turn_owner(&roasts, &battle.agent1_id, &battle.agent2_id);
        let (author, opponent) = if author_id == agent1.id {
            (&agent1, &agent2)
        } else {
            (&agent2, &agent1)
        };
        let round = battle::current_round(roasts.len());

        let _ = tx
            .send(StreamEvent::new(
                "turn_start",
                json!({
                    "agent_id": author.id,
                    "agent_name": author.name,
                    "agent_emoji": author.emoji,
                    "round": round,
                }),
            ))
            .await;

        let req = GenerateRequest {
            system_prompt: oracle::agent_system_prompt(author, &opponent.name, &battle.topic),
            history: oracle::build_history(&roasts, &agent1, &agent2),
            round,
            total_rounds,
        };
        let mut deltas = oracle_client.generate(req);
        let mut text = String::new();
        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            text.push_str(&delta);
            let _ = tx
                .send(StreamEvent::new(
                    "turn_delta",
                    json!({ "agent_id": author.id, "delta": delta }),
                ))
                .await;
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(DriverError::EmptyGeneration);
        }

        let outcome =
            battle::submit_turn(db, oracle_client, total_rounds, &battle.id, &author.id, text)
                .await?;
        let _ = tx
            .send(StreamEvent::new(
                "turn_complete",
                json!({ "roast": outcome.roast, "badge": outcome.badge }),
            ))
            .await;

        if outcome.battle_complete {
            send_battle_complete(db, battle, tx).await?;
            return Ok(());
        }

        let _ = tx
            .send(StreamEvent::new(
                "next_turn",
                json!({ "agent_id": opponent.id, "agent_name": opponent.name }),
            ))
            .await;
        if !turn_delay.is_zero() {
            tokio::time::sleep(turn_delay).await;
        }
    }
}

async fn send_battle_complete(
    db: &Database,
    battle: &Battle,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), DriverError> {
    let stored = db
        .get_battle(&battle.id)
        .await?
        .ok_or(ArenaError::BattleNotFound)?;
    let roasts = db.list_roasts(&battle.id).await?;
    let score_of = |agent_id: &str| -> i64 {
        roasts
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .map(|r| r.score)
            .sum()
    };
    let _ = tx
        .send(StreamEvent::new(
            "battle_complete",
            json!({
                "winner_id": stored.winner_id,
                "agent1_score": score_of(&stored.agent1_id),
                "agent2_score": score_of(&stored.agent2_id),
            }),
        ))
        .await;
    Ok(())
}

/// Resolve both participants for battle read responses.
pub async fn resolve_participants(
    db: &Database,
    battle: &Battle,
) -> Result<(ResolvedAgent, ResolvedAgent), sqlx::Error> {
    let agent1 = agents::resolve(db, &battle.agent1_id).await?;
    let agent2 = agents::resolve(db, &battle.agent2_id).await?;
    Ok((agent1, agent2))
}
