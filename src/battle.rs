// Battle state machine: turn-order contract, round counting, and the
// idempotent completion/scoring algorithm. Independent of how turns are
// supplied - the polled fighter API and the live stream driver both go
// through submit_turn, so there is a single finalization code path.
//
// Status flow: pending -> in_progress -> (streaming) -> completed,
// never backward.

use crate::agents;
use crate::db::{Database, Roast};
use crate::error::ArenaError;
use crate::metrics;
use crate::oracle::{self, JudgeRequest, Oracle};

pub const DEFAULT_TOTAL_ROUNDS: u32 = 5;

/// Turns at or above this score are marked critical.
pub const CRITICAL_SCORE: i64 = 92;

/// 1-indexed round implied by a turn count: two turns per round.
pub fn current_round(turn_count: usize) -> u32 {
    ((turn_count + 2) / 2) as u32
}

/// Who holds the next turn slot: agent1 opens, then authors strictly
/// alternate with whoever did NOT write the last turn.
pub fn next_turn_owner<'a>(roasts: &[Roast], agent1: &'a str, agent2: &'a str) -> &'a str {
    match roasts.last() {
        None => agent1,
        Some(last) if last.agent_id == agent1 => agent2,
        Some(_) => agent1,
    }
}

pub fn is_complete(turn_count: usize, total_rounds: u32) -> bool {
    turn_count >= (total_rounds as usize) * 2
}

/// Response badge for a high-scoring turn.
pub fn badge_for(score: i64) -> Option<&'static str> {
    if score >= 95 {
        Some("LEGENDARY ⚡")
    } else if score >= 90 {
        Some("FATALITY 💀")
    } else if score >= 85 {
        Some("FIRE 🔥")
    } else {
        None
    }
}

/// Result of a successful turn submission.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub roast: Roast,
    pub battle_complete: bool,
    pub badge: Option<&'static str>,
}

/// Submit one turn: validate the battle is open and the author holds the
/// slot, score the text, persist the turn, and finalize when the quota is
/// reached.
///
/// The slot check is a compare-and-swap on `battles.next_turn_agent_id`, so
/// of two racing submissions from the same rightful owner exactly one wins;
/// the other fails `OutOfTurn` without persisting anything.
pub async fn submit_turn(
    db: &Database,
    oracle_client: &dyn Oracle,
    total_rounds: u32,
    battle_id: &str,
    author_id: &str,
    text: &str,
) -> Result<TurnOutcome, ArenaError> {
    let battle = db
        .get_battle(battle_id)
        .await?
        .ok_or(ArenaError::BattleNotFound)?;

    if !battle.is_participant(author_id) {
        return Err(ArenaError::NotYourBattle);
    }

    match battle.status.as_str() {
        "in_progress" | "streaming" => {}
        "completed" => return Err(ArenaError::AlreadyCompleted),
        _ => return Err(ArenaError::BattleNotFound),
    }

    let opponent_id = battle.opponent_of(author_id).to_string();
    if !db.claim_turn_slot(battle_id, author_id, &opponent_id).await? {
        return Err(ArenaError::OutOfTurn);
    }

    let prior_turns = db.count_roasts(battle_id).await? as usize;
    let round = current_round(prior_turns);

    let author = agents::resolve(db, author_id).await?;
    let opponent = agents::resolve(db, &opponent_id).await?;

    let judgement = oracle::judge_with_fallback(
        oracle_client,
        JudgeRequest {
            text: text.to_string(),
            author_name: author.name,
            opponent_name: opponent.name,
            topic: battle.topic.clone(),
            round,
        },
    )
    .await;

    let is_critical = judgement.score >= CRITICAL_SCORE;
    let roast = db
        .create_roast(
            battle_id,
            author_id,
            round as i64,
            text,
            judgement.score,
            is_critical,
        )
        .await?;

    let battle_complete = is_complete(prior_turns + 1, total_rounds);
    if battle_complete {
        finalize(db, battle_id).await?;
    }

    Ok(TurnOutcome {
        badge: badge_for(roast.score),
        roast,
        battle_complete,
    })
}

/// Finalize a battle: sum scores per author, the strictly greater sum wins,
/// a tie is a draw. Idempotent - the completion write is a conditional
/// update, and only the claiming caller updates fighter statistics, so
/// concurrent or retried finalizers from the polling and streaming paths
/// are harmless no-ops.
///
/// Returns the stored winner (None for a draw).
pub async fn finalize(db: &Database, battle_id: &str) -> Result<Option<String>, ArenaError> {
    let battle = db
        .get_battle(battle_id)
        .await?
        .ok_or(ArenaError::BattleNotFound)?;

    if battle.status == "completed" {
        return Ok(battle.winner_id);
    }

    let roasts = db.list_roasts(battle_id).await?;
    let (sum1, count1) = side_totals(&roasts, &battle.agent1_id);
    let (sum2, count2) = side_totals(&roasts, &battle.agent2_id);

    let winner_id = if sum1 > sum2 {
        Some(battle.agent1_id.clone())
    } else if sum2 > sum1 {
        Some(battle.agent2_id.clone())
    } else {
        None
    };

    if !db.claim_completion(battle_id, winner_id.as_deref()).await? {
        // Lost the race; report what the first finalizer stored.
        let battle = db
            .get_battle(battle_id)
            .await?
            .ok_or(ArenaError::BattleNotFound)?;
        return Ok(battle.winner_id);
    }

    metrics::BATTLES_COMPLETED_TOTAL.inc();
    tracing::info!(
        battle_id,
        winner = winner_id.as_deref().unwrap_or("draw"),
        "Battle finalized"
    );

    let sides = [
        (&battle.agent1_id, mean(sum1, count1)),
        (&battle.agent2_id, mean(sum2, count2)),
    ];
    for (agent_id, battle_avg) in sides {
        // Built-in bots carry no statistics; only fighters are updated.
        if db.get_fighter(agent_id).await?.is_some() {
            let won = winner_id.as_deref() == Some(agent_id.as_str());
            let lost = winner_id.is_some() && !won;
            db.record_battle_result(agent_id, won, lost, battle_avg).await?;
        }
    }

    Ok(winner_id)
}

fn side_totals(roasts: &[Roast], agent_id: &str) -> (i64, usize) {
    let scores: Vec<i64> = roasts
        .iter()
        .filter(|r| r.agent_id == agent_id)
        .map(|r| r.score)
        .collect();
    (scores.iter().sum(), scores.len())
}

fn mean(sum: i64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}
