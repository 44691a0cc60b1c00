// Challenge and matchmaking flows: instant bot battles, direct challenges
// between fighters, and the "any opponent" queue. Queue pairing is a single
// conditional claim at the store, so two fighters joining at the same moment
// produce exactly one match.

use chrono::{DateTime, Duration, Utc};

use crate::agents;
use crate::db::{Battle, Challenge, Database, Fighter};
use crate::error::ArenaError;
use crate::metrics;
use crate::topics;

/// Direct challenges wait this long for the opponent to respond.
pub const CHALLENGE_TTL: Duration = Duration::hours(4);

/// Matchmaking-queue entries go stale after this long.
pub const QUEUE_TTL: Duration = Duration::hours(1);

/// Sentinel opponent id for a matchmaking-queue entry.
pub const MATCHMAKING_OPPONENT: &str = "any";

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn expiry(ttl: Duration) -> String {
    (Utc::now() + ttl).to_rfc3339()
}

fn is_expired(challenge: &Challenge) -> bool {
    match DateTime::parse_from_rfc3339(&challenge.expires_at) {
        Ok(t) => t <= Utc::now(),
        // An unreadable timestamp counts as expired rather than immortal.
        Err(_) => true,
    }
}

/// What issuing a challenge produced.
#[derive(Debug, Clone)]
pub enum ChallengeOutcome {
    /// Bot opponent: the battle starts immediately.
    BattleCreated { battle: Battle },
    /// Direct challenge: waiting for the named fighter to accept.
    ChallengeSent { challenge: Challenge },
    /// Matchmaking paired the caller with a waiting fighter.
    Matched { battle: Battle, opponent_id: String },
    /// Matchmaking queue was empty; the caller is now waiting in it.
    Searching { challenge: Challenge },
}

/// Issue a challenge. `opponent` is a built-in bot id, `"random"` for a
/// random bot, a fighter id, or [`MATCHMAKING_OPPONENT`] to join the queue.
pub async fn create_challenge(
    db: &Database,
    challenger: &Fighter,
    opponent: &str,
    topic: Option<String>,
) -> Result<ChallengeOutcome, ArenaError> {
    if opponent == challenger.id {
        return Err(ArenaError::InvalidOpponent);
    }
    let topic = topic.unwrap_or_else(|| topics::random_topic().to_string());

    let opponent = if opponent == "random" {
        agents::random_builtin().id
    } else {
        opponent
    };

    if agents::is_builtin(opponent) {
        let battle = db.create_battle(&challenger.id, opponent, &topic).await?;
        metrics::BATTLES_STARTED_TOTAL
            .with_label_values(&["challenge_bot"])
            .inc();
        tracing::info!(
            battle_id = %battle.id,
            challenger = %challenger.id,
            opponent,
            "Bot battle created"
        );
        return Ok(ChallengeOutcome::BattleCreated { battle });
    }

    if opponent == MATCHMAKING_OPPONENT {
        return join_matchmaking(db, challenger, topic).await;
    }

    // Direct challenge: the opponent must be a registered fighter.
    if db.get_fighter(opponent).await?.is_none() {
        return Err(ArenaError::OpponentNotFound);
    }
    let challenge = db
        .create_challenge(&challenger.id, opponent, &topic, &expiry(CHALLENGE_TTL))
        .await?;
    tracing::info!(
        challenge_id = %challenge.id,
        challenger = %challenger.id,
        opponent,
        "Challenge sent"
    );
    Ok(ChallengeOutcome::ChallengeSent { challenge })
}

async fn join_matchmaking(
    db: &Database,
    challenger: &Fighter,
    topic: String,
) -> Result<ChallengeOutcome, ArenaError> {
    let now = now_rfc3339();

    // Overdue entries drop out of pending here instead of sitting in the
    // queue table forever.
    let swept = db.expire_stale_challenges(&now).await?;
    if swept > 0 {
        tracing::debug!(swept, "Expired stale challenges");
    }

    // Re-joining while already queued just reports the existing entry.
    if let Some(existing) = db.pending_matchmaking_for(&challenger.id, &now).await? {
        return Ok(ChallengeOutcome::Searching { challenge: existing });
    }

    if let Some(waiting) = db.claim_matchmaking_opponent(&challenger.id, &now).await? {
        // The earlier fighter opens the battle. Either side's topic can win.
        let topic = if rand::random::<bool>() {
            waiting.topic.clone()
        } else {
            topic
        };
        let battle = db
            .create_battle(&waiting.challenger_id, &challenger.id, &topic)
            .await?;
        db.resolve_challenge(&waiting.id, "matched", "matched", Some(&battle.id))
            .await?;
        metrics::BATTLES_STARTED_TOTAL
            .with_label_values(&["matchmaking"])
            .inc();
        tracing::info!(
            battle_id = %battle.id,
            agent1 = %waiting.challenger_id,
            agent2 = %challenger.id,
            "Matchmaking pair formed"
        );
        return Ok(ChallengeOutcome::Matched {
            battle,
            opponent_id: waiting.challenger_id,
        });
    }

    let challenge = db
        .create_challenge(
            &challenger.id,
            MATCHMAKING_OPPONENT,
            &topic,
            &expiry(QUEUE_TTL),
        )
        .await?;
    tracing::info!(challenger = %challenger.id, "Fighter queued for matchmaking");
    Ok(ChallengeOutcome::Searching { challenge })
}

/// Accept a direct challenge. Only the challenged fighter may accept; the
/// challenger takes the opening turn. Expired challenges are marked on read.
pub async fn accept_challenge(
    db: &Database,
    caller: &Fighter,
    challenge_id: &str,
) -> Result<Battle, ArenaError> {
    let challenge = db
        .get_challenge(challenge_id)
        .await?
        .ok_or(ArenaError::ChallengeNotFound)?;

    if challenge.opponent_id != caller.id {
        return Err(ArenaError::NotYourBattle);
    }
    if challenge.status != "pending" {
        return Err(ArenaError::ChallengeExpired);
    }
    if is_expired(&challenge) {
        db.expire_challenge(&challenge.id).await?;
        return Err(ArenaError::ChallengeExpired);
    }

    // Claim the challenge before creating the battle: the loser of a
    // double-accept race fails here with nothing persisted.
    if !db
        .resolve_challenge(&challenge.id, "pending", "accepted", None)
        .await?
    {
        return Err(ArenaError::ChallengeExpired);
    }
    let battle = db
        .create_battle(&challenge.challenger_id, &caller.id, &challenge.topic)
        .await?;
    db.set_challenge_battle(&challenge.id, &battle.id).await?;

    metrics::BATTLES_STARTED_TOTAL
        .with_label_values(&["challenge_fighter"])
        .inc();
    tracing::info!(
        battle_id = %battle.id,
        challenge_id = %challenge.id,
        "Challenge accepted"
    );
    Ok(battle)
}

/// Decline a direct challenge. Only the challenged fighter may decline.
pub async fn decline_challenge(
    db: &Database,
    caller: &Fighter,
    challenge_id: &str,
) -> Result<(), ArenaError> {
    let challenge = db
        .get_challenge(challenge_id)
        .await?
        .ok_or(ArenaError::ChallengeNotFound)?;

    if challenge.opponent_id != caller.id {
        return Err(ArenaError::NotYourBattle);
    }
    db.set_challenge_status(&challenge.id, "declined").await?;
    tracing::info!(challenge_id = %challenge.id, "Challenge declined");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    async fn fighter(db: &Database, name: &str) -> Fighter {
        db.create_fighter(name, &format!("hash-{name}"), "").await.unwrap()
    }

    #[tokio::test]
    async fn test_bot_challenge_creates_battle_immediately() {
        let db = test_db().await;
        let f = fighter(&db, "Challenger").await;

        let out = create_challenge(&db, &f, "inferno", Some("t".into())).await.unwrap();
        let battle = match out {
            ChallengeOutcome::BattleCreated { battle } => battle,
            other => panic!("expected instant battle, got {other:?}"),
        };
        assert_eq!(battle.agent1_id, f.id);
        assert_eq!(battle.agent2_id, "inferno");
        assert_eq!(battle.status, "in_progress");
        assert_eq!(battle.next_turn_agent_id.as_deref(), Some(f.id.as_str()));
    }

    #[tokio::test]
    async fn test_random_opponent_is_a_builtin() {
        let db = test_db().await;
        let f = fighter(&db, "Rand").await;

        let out = create_challenge(&db, &f, "random", None).await.unwrap();
        match out {
            ChallengeOutcome::BattleCreated { battle } => {
                assert!(agents::is_builtin(&battle.agent2_id));
            }
            other => panic!("expected instant battle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_self_challenge_rejected() {
        let db = test_db().await;
        let f = fighter(&db, "Narcissus").await;

        let err = create_challenge(&db, &f, &f.id, None).await.unwrap_err();
        assert!(matches!(err, ArenaError::InvalidOpponent));
    }

    #[tokio::test]
    async fn test_unknown_fighter_opponent() {
        let db = test_db().await;
        let f = fighter(&db, "Lonely").await;

        let err = create_challenge(&db, &f, "ftr_missing", None).await.unwrap_err();
        assert!(matches!(err, ArenaError::OpponentNotFound));
    }

    #[tokio::test]
    async fn test_direct_challenge_waits_for_accept() {
        let db = test_db().await;
        let a = fighter(&db, "A").await;
        let b = fighter(&db, "B").await;

        let out = create_challenge(&db, &a, &b.id, Some("duel".into())).await.unwrap();
        let challenge = match out {
            ChallengeOutcome::ChallengeSent { challenge } => challenge,
            other => panic!("expected pending challenge, got {other:?}"),
        };
        assert_eq!(challenge.status, "pending");
        assert_eq!(challenge.opponent_id, b.id);

        let battle = accept_challenge(&db, &b, &challenge.id).await.unwrap();
        assert_eq!(battle.agent1_id, a.id);
        assert_eq!(battle.agent2_id, b.id);

        let challenge = db.get_challenge(&challenge.id).await.unwrap().unwrap();
        assert_eq!(challenge.status, "accepted");
        assert_eq!(challenge.battle_id.as_deref(), Some(battle.id.as_str()));

        // A second accept finds the challenge no longer pending.
        let err = accept_challenge(&db, &b, &challenge.id).await.unwrap_err();
        assert!(matches!(err, ArenaError::ChallengeExpired));
    }

    #[tokio::test]
    async fn test_only_the_challenged_fighter_may_respond() {
        let db = test_db().await;
        let a = fighter(&db, "A").await;
        let b = fighter(&db, "B").await;
        let c = fighter(&db, "C").await;

        let out = create_challenge(&db, &a, &b.id, None).await.unwrap();
        let challenge = match out {
            ChallengeOutcome::ChallengeSent { challenge } => challenge,
            other => panic!("expected pending challenge, got {other:?}"),
        };

        let err = accept_challenge(&db, &c, &challenge.id).await.unwrap_err();
        assert!(matches!(err, ArenaError::NotYourBattle));
        let err = decline_challenge(&db, &c, &challenge.id).await.unwrap_err();
        assert!(matches!(err, ArenaError::NotYourBattle));

        decline_challenge(&db, &b, &challenge.id).await.unwrap();
        let challenge = db.get_challenge(&challenge.id).await.unwrap().unwrap();
        assert_eq!(challenge.status, "declined");
    }

    #[tokio::test]
    async fn test_expired_challenge_is_marked_on_accept() {
        let db = test_db().await;
        let a = fighter(&db, "A").await;
        let b = fighter(&db, "B").await;

        let stale = db
            .create_challenge(&a.id, &b.id, "t", "2020-01-01T00:00:00+00:00")
            .await
            .unwrap();

        let err = accept_challenge(&db, &b, &stale.id).await.unwrap_err();
        assert!(matches!(err, ArenaError::ChallengeExpired));
        let stale = db.get_challenge(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, "expired");
    }

    #[tokio::test]
    async fn test_lost_accept_race_leaves_no_stray_battle() {
        let db = test_db().await;
        let a = fighter(&db, "A").await;
        let b = fighter(&db, "B").await;

        let out = create_challenge(&db, &a, &b.id, None).await.unwrap();
        let challenge = match out {
            ChallengeOutcome::ChallengeSent { challenge } => challenge,
            other => panic!("expected pending challenge, got {other:?}"),
        };

        // A competing accept resolves the challenge first.
        assert!(db
            .resolve_challenge(&challenge.id, "pending", "accepted", None)
            .await
            .unwrap());

        let err = accept_challenge(&db, &b, &challenge.id).await.unwrap_err();
        assert!(matches!(err, ArenaError::ChallengeExpired));

        // The losing accept created nothing.
        assert!(db.active_battles_for(&a.id).await.unwrap().is_empty());
        assert!(db.active_battles_for(&b.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_matchmaking_sweeps_stale_queue_entries() {
        let db = test_db().await;
        let old = fighter(&db, "Stale").await;
        let fresh = fighter(&db, "Fresh").await;

        let stale = db
            .create_challenge(&old.id, MATCHMAKING_OPPONENT, "t", "2020-01-01T00:00:00+00:00")
            .await
            .unwrap();

        // The joiner must not match the stale entry, and joining marks it
        // expired rather than leaving it pending forever.
        let out = create_challenge(&db, &fresh, MATCHMAKING_OPPONENT, None).await.unwrap();
        assert!(matches!(out, ChallengeOutcome::Searching { .. }));

        let stale = db.get_challenge(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, "expired");
    }

    #[tokio::test]
    async fn test_matchmaking_empty_queue_enqueues() {
        let db = test_db().await;
        let a = fighter(&db, "A").await;

        let out = create_challenge(&db, &a, MATCHMAKING_OPPONENT, None).await.unwrap();
        let entry = match out {
            ChallengeOutcome::Searching { challenge } => challenge,
            other => panic!("expected queue entry, got {other:?}"),
        };
        assert_eq!(entry.opponent_id, MATCHMAKING_OPPONENT);
        assert_eq!(entry.status, "pending");

        // Joining again reports the same entry instead of stacking up.
        let out = create_challenge(&db, &a, MATCHMAKING_OPPONENT, None).await.unwrap();
        match out {
            ChallengeOutcome::Searching { challenge } => assert_eq!(challenge.id, entry.id),
            other => panic!("expected existing queue entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_matchmaking_pairs_with_waiting_fighter() {
        let db = test_db().await;
        let a = fighter(&db, "A").await;
        let b = fighter(&db, "B").await;

        let out = create_challenge(&db, &a, MATCHMAKING_OPPONENT, Some("qa".into())).await.unwrap();
        let entry = match out {
            ChallengeOutcome::Searching { challenge } => challenge,
            other => panic!("expected queue entry, got {other:?}"),
        };

        let out = create_challenge(&db, &b, MATCHMAKING_OPPONENT, Some("qb".into())).await.unwrap();
        let battle = match out {
            ChallengeOutcome::Matched { battle, opponent_id } => {
                assert_eq!(opponent_id, a.id);
                battle
            }
            other => panic!("expected a match, got {other:?}"),
        };

        // The fighter who queued first opens the battle.
        assert_eq!(battle.agent1_id, a.id);
        assert_eq!(battle.agent2_id, b.id);
        assert!(battle.topic == "qa" || battle.topic == "qb");

        let entry = db.get_challenge(&entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, "matched");
        assert_eq!(entry.battle_id.as_deref(), Some(battle.id.as_str()));

        // The queue is drained.
        let now = now_rfc3339();
        assert!(db.pending_matchmaking_for(&a.id, &now).await.unwrap().is_none());
        assert!(db.claim_matchmaking_opponent("ftr_other", &now).await.unwrap().is_none());
    }
}
