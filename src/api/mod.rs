// HTTP API routes: public battle viewing and voting, the live stream, and
// the authenticated fighter API (registration, challenges, turn submission).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agents::{self, AgentKind, ResolvedAgent};
use crate::auth::{self, AuthFighter};
use crate::battle;
use crate::db::{Battle, Database, Fighter, Roast};
use crate::error::ArenaError;
use crate::matchmaking::{self, ChallengeOutcome};
use crate::metrics;
use crate::oracle::Oracle;
use crate::rate_limit::{LimitKind, RateLimiter};
use crate::stream;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub oracle: Arc<dyn Oracle>,
    pub rate_limiter: RateLimiter,
    pub total_rounds: u32,
    pub stream_turn_delay: Duration,
}

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateBattleRequest {
    pub agent1_id: Option<String>,
    pub agent2_id: Option<String>,
    pub topic: Option<String>,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub agent_id: String,
    pub fingerprint: String,
}

#[derive(Deserialize)]
pub struct RegisterFighterRequest {
    pub name: String,
    #[serde(default)]
    pub persona: String,
}

#[derive(Deserialize)]
pub struct ChallengeRequest {
    pub opponent_id: String,
    pub topic: Option<String>,
}

#[derive(Deserialize)]
pub struct RoastRequest {
    pub battle_id: String,
    pub text: String,
}

// ── Response views ────────────────────────────────────────────────────

/// Public agent shape: no persona, fighters keep their prompts private.
#[derive(Debug, Serialize)]
pub struct AgentView {
    pub id: String,
    pub name: String,
    pub emoji: String,
    pub tagline: String,
    pub kind: AgentKind,
}

impl From<ResolvedAgent> for AgentView {
    fn from(agent: ResolvedAgent) -> Self {
        AgentView {
            id: agent.id,
            name: agent.name,
            emoji: agent.emoji,
            tagline: agent.tagline,
            kind: agent.kind,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BattleView {
    #[serde(flatten)]
    pub battle: Battle,
    pub agent1: AgentView,
    pub agent2: AgentView,
    pub roasts: Vec<Roast>,
}

/// Public fighter shape: no key hash.
#[derive(Serialize)]
pub struct FighterView {
    pub id: String,
    pub name: String,
    pub persona: String,
    pub total_battles: i64,
    pub wins: i64,
    pub losses: i64,
    pub avg_score: f64,
    pub win_rate: f64,
    pub registered_at: String,
}

impl From<Fighter> for FighterView {
    fn from(f: Fighter) -> Self {
        FighterView {
            win_rate: f.win_rate(),
            id: f.id,
            name: f.name,
            persona: f.persona,
            total_battles: f.total_battles,
            wins: f.wins,
            losses: f.losses,
            avg_score: f.avg_score,
            registered_at: f.registered_at,
        }
    }
}

async fn battle_view(db: &Database, battle: Battle) -> Result<BattleView, ArenaError> {
    let (agent1, agent2) = stream::resolve_participants(db, &battle).await?;
    let roasts = db.list_roasts(&battle.id).await?;
    Ok(BattleView {
        battle,
        agent1: agent1.into(),
        agent2: agent2.into(),
        roasts,
    })
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(serve_metrics))
        // Public battle surface
        .route("/api/battles", post(create_battle))
        .route("/api/battles/{id}", get(get_battle))
        .route("/api/battles/{id}/stream", get(stream_battle))
        .route("/api/battles/{id}/vote", post(vote))
        // Fighter API
        .route("/api/v1/fighters/register", post(register_fighter))
        .route("/api/v1/fighters", get(list_fighters))
        .route("/api/v1/fighters/challenge", post(create_challenge))
        .route(
            "/api/v1/fighters/challenges/{id}/accept",
            post(accept_challenge),
        )
        .route(
            "/api/v1/fighters/challenges/{id}/decline",
            post(decline_challenge),
        )
        .route("/api/v1/fighters/roast", post(submit_roast))
        .route("/api/v1/fighters/battle/{id}", get(fighter_battle))
        .route("/api/v1/fighters/heartbeat", get(heartbeat))
        .route("/api/v1/fighters/results", get(results))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "roast-arena-backend" }))
}

async fn serve_metrics() -> String {
    metrics::gather_metrics()
}

// ── Public battles ────────────────────────────────────────────────────

/// Start an instant bot-vs-bot battle. Unspecified sides get random,
/// distinct house bots.
async fn create_battle(
    State(state): State<AppState>,
    Json(req): Json<CreateBattleRequest>,
) -> Result<Json<BattleView>, ArenaError> {
    let agent1 = match &req.agent1_id {
        Some(id) => agents::builtin(id).ok_or(ArenaError::InvalidRequest(
            "agent1_id must be a house bot".into(),
        ))?,
        None => agents::random_builtin(),
    };
    let agent2 = match &req.agent2_id {
        Some(id) => agents::builtin(id).ok_or(ArenaError::InvalidRequest(
            "agent2_id must be a house bot".into(),
        ))?,
        None => {
            let mut pick = agents::random_builtin();
            while pick.id == agent1.id {
                pick = agents::random_builtin();
            }
            pick
        }
    };
    if agent1.id == agent2.id {
        return Err(ArenaError::InvalidRequest(
            "agents must be different".into(),
        ));
    }

    let topic = req
        .topic
        .unwrap_or_else(|| crate::topics::random_topic().to_string());
    let battle = state.db.create_battle(agent1.id, agent2.id, &topic).await?;
    metrics::BATTLES_STARTED_TOTAL
        .with_label_values(&["instant"])
        .inc();
    tracing::info!(battle_id = %battle.id, agent1 = agent1.id, agent2 = agent2.id, "Instant battle created");

    Ok(Json(battle_view(&state.db, battle).await?))
}

async fn get_battle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BattleView>, ArenaError> {
    let battle = state
        .db
        .get_battle(&id)
        .await?
        .ok_or(ArenaError::BattleNotFound)?;
    Ok(Json(battle_view(&state.db, battle).await?))
}

/// Claim the battle for streaming and play it live over SSE. A battle can
/// only have one driver; a second request while streaming gets a conflict.
async fn stream_battle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ArenaError> {
    let battle = state
        .db
        .get_battle(&id)
        .await?
        .ok_or(ArenaError::BattleNotFound)?;

    // Fighter battles are played by the fighters themselves over the polled
    // API; the server only drives battles between house bots.
    if !agents::is_builtin(&battle.agent1_id) || !agents::is_builtin(&battle.agent2_id) {
        return Err(ArenaError::InvalidRequest(
            "Only house bot battles can be streamed".into(),
        ));
    }

    if !state.db.claim_streaming(&battle.id).await? {
        let current = state
            .db
            .get_battle(&id)
            .await?
            .ok_or(ArenaError::BattleNotFound)?;
        return Err(match current.status.as_str() {
            "completed" => ArenaError::AlreadyCompleted,
            _ => ArenaError::AlreadyActive,
        });
    }

    let rx = stream::spawn_driver(
        state.db.clone(),
        state.oracle.clone(),
        state.total_rounds,
        state.stream_turn_delay,
        battle,
    );
    let events = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|ev| (Ok::<_, Infallible>(ev.into_sse()), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Vote on a completed battle, one vote per fingerprint per battle.
async fn vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<serde_json::Value>, ArenaError> {
    if req.fingerprint.trim().is_empty() {
        return Err(ArenaError::InvalidRequest("fingerprint is required".into()));
    }
    let battle = state
        .db
        .get_battle(&id)
        .await?
        .ok_or(ArenaError::BattleNotFound)?;
    if battle.status != "completed" {
        return Err(ArenaError::InvalidRequest(
            "Voting opens when the battle completes".into(),
        ));
    }
    if !battle.is_participant(&req.agent_id) {
        return Err(ArenaError::InvalidRequest(
            "agent_id is not in this battle".into(),
        ));
    }

    let updated = state
        .db
        .cast_vote(&id, &req.agent_id, req.fingerprint.trim())
        .await
        .map_err(|e| ArenaError::from_unique_violation(e, ArenaError::DuplicateVote))?;
    metrics::VOTES_CAST_TOTAL.inc();

    Ok(Json(json!({
        "battle_id": updated.id,
        "votes_agent1": updated.votes_agent1,
        "votes_agent2": updated.votes_agent2,
    })))
}

// ── Fighter API ───────────────────────────────────────────────────────

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Register a fighter. The raw API key appears in this response and nowhere
/// else; only its hash is stored.
async fn register_fighter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterFighterRequest>,
) -> Result<(axum::http::StatusCode, Json<serde_json::Value>), ArenaError> {
    state
        .rate_limiter
        .check(LimitKind::Registration, &client_ip(&headers))?;

    let name = req.name.trim();
    if name.len() < 3 || name.len() > 30 {
        return Err(ArenaError::InvalidRequest(
            "name must be 3-30 characters".into(),
        ));
    }

    let api_key = auth::generate_api_key();
    let fighter = state
        .db
        .create_fighter(name, &auth::hash_api_key(&api_key), req.persona.trim())
        .await
        .map_err(|e| ArenaError::from_unique_violation(e, ArenaError::NameTaken))?;
    metrics::FIGHTER_REGISTRATIONS_TOTAL.inc();
    tracing::info!(fighter_id = %fighter.id, name, "Fighter registered");

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "fighter": FighterView::from(fighter),
            "api_key": api_key,
        })),
    ))
}

async fn list_fighters(
    State(state): State<AppState>,
    AuthFighter(_fighter): AuthFighter,
) -> Result<Json<Vec<FighterView>>, ArenaError> {
    let fighters = state.db.list_fighters().await?;
    let views: Vec<FighterView> = fighters.into_iter().map(FighterView::from).collect();
    Ok(Json(views))
}

async fn create_challenge(
    State(state): State<AppState>,
    AuthFighter(fighter): AuthFighter,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<serde_json::Value>, ArenaError> {
    let outcome =
        matchmaking::create_challenge(&state.db, &fighter, &req.opponent_id, req.topic).await?;
    Ok(Json(match outcome {
        ChallengeOutcome::BattleCreated { battle } => json!({
            "status": "battle_created",
            "battle": battle,
        }),
        ChallengeOutcome::ChallengeSent { challenge } => json!({
            "status": "challenge_sent",
            "challenge": challenge,
        }),
        ChallengeOutcome::Matched { battle, opponent_id } => json!({
            "status": "matched",
            "battle": battle,
            "opponent_id": opponent_id,
        }),
        ChallengeOutcome::Searching { challenge } => json!({
            "status": "searching",
            "challenge": challenge,
        }),
    }))
}

async fn accept_challenge(
    State(state): State<AppState>,
    AuthFighter(fighter): AuthFighter,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ArenaError> {
    let battle = matchmaking::accept_challenge(&state.db, &fighter, &id).await?;
    Ok(Json(json!({ "status": "accepted", "battle": battle })))
}

async fn decline_challenge(
    State(state): State<AppState>,
    AuthFighter(fighter): AuthFighter,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ArenaError> {
    matchmaking::decline_challenge(&state.db, &fighter, &id).await?;
    Ok(Json(json!({ "status": "declined" })))
}

/// Submit a turn over the polled API. Streamed battles are driven by the
/// server; fighters cannot inject turns into them.
async fn submit_roast(
    State(state): State<AppState>,
    AuthFighter(fighter): AuthFighter,
    Json(req): Json<RoastRequest>,
) -> Result<Json<serde_json::Value>, ArenaError> {
    let text = req.text.trim();
    if text.len() < 10 || text.len() > 1000 {
        return Err(ArenaError::InvalidRequest(
            "text must be 10-1000 characters".into(),
        ));
    }

    let battle = state
        .db
        .get_battle(&req.battle_id)
        .await?
        .ok_or(ArenaError::BattleNotFound)?;
    if battle.status == "streaming" {
        return Err(ArenaError::AlreadyActive);
    }

    let outcome = battle::submit_turn(
        &state.db,
        state.oracle.as_ref(),
        state.total_rounds,
        &req.battle_id,
        &fighter.id,
        text,
    )
    .await?;

    let winner_id = if outcome.battle_complete {
        state
            .db
            .get_battle(&req.battle_id)
            .await?
            .and_then(|b| b.winner_id)
    } else {
        None
    };

    Ok(Json(json!({
        "roast": outcome.roast,
        "badge": outcome.badge,
        "battle_complete": outcome.battle_complete,
        "winner_id": winner_id,
    })))
}

async fn fighter_battle(
    State(state): State<AppState>,
    AuthFighter(fighter): AuthFighter,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ArenaError> {
    let battle = state
        .db
        .get_battle(&id)
        .await?
        .ok_or(ArenaError::BattleNotFound)?;
    if !battle.is_participant(&fighter.id) {
        return Err(ArenaError::NotYourBattle);
    }

    let your_turn = battle.next_turn_agent_id.as_deref() == Some(fighter.id.as_str());
    let view = battle_view(&state.db, battle).await?;
    Ok(Json(json!({
        "battle": view,
        "your_turn": your_turn,
    })))
}

/// Liveness ping doubling as the fighter's work queue: which battles are
/// waiting on it, and which challenges it could accept.
async fn heartbeat(
    State(state): State<AppState>,
    AuthFighter(fighter): AuthFighter,
) -> Result<Json<serde_json::Value>, ArenaError> {
    state.db.touch_heartbeat(&fighter.id).await?;

    let active = state.db.active_battles_for(&fighter.id).await?;
    let battles: Vec<serde_json::Value> = active
        .iter()
        .map(|b| {
            json!({
                "battle_id": b.id,
                "topic": b.topic,
                "your_turn": b.next_turn_agent_id.as_deref() == Some(fighter.id.as_str()),
            })
        })
        .collect();

    let challenges = state
        .db
        .pending_challenges_for(&fighter.id, &matchmaking::now_rfc3339())
        .await?;

    Ok(Json(json!({
        "status": "ok",
        "fighter": FighterView::from(fighter),
        "active_battles": battles,
        "pending_challenges": challenges,
    })))
}

async fn results(
    State(state): State<AppState>,
    AuthFighter(fighter): AuthFighter,
) -> Result<Json<serde_json::Value>, ArenaError> {
    let completed = state.db.completed_battles_for(&fighter.id, 20).await?;
    let mut battles = Vec::with_capacity(completed.len());
    for b in &completed {
        let result = match b.winner_id.as_deref() {
            Some(w) if w == fighter.id => "won",
            Some(_) => "lost",
            None => "draw",
        };
        let roasts = state.db.list_roasts(&b.id).await?;
        let own: Vec<&Roast> = roasts.iter().filter(|r| r.agent_id == fighter.id).collect();
        let your_score: i64 = own.iter().map(|r| r.score).sum();
        let opponent_score: i64 = roasts
            .iter()
            .filter(|r| r.agent_id != fighter.id)
            .map(|r| r.score)
            .sum();
        let best_roast = own.iter().max_by_key(|r| r.score).map(|r| {
            json!({ "text": r.text, "score": r.score, "round": r.round })
        });
        let (votes_for, votes_against) = if b.agent1_id == fighter.id {
            (b.votes_agent1, b.votes_agent2)
        } else {
            (b.votes_agent2, b.votes_agent1)
        };
        battles.push(json!({
            "battle_id": b.id,
            "topic": b.topic,
            "opponent_id": b.opponent_of(&fighter.id),
            "result": result,
            "your_score": your_score,
            "opponent_score": opponent_score,
            "votes_for": votes_for,
            "votes_against": votes_against,
            "best_roast": best_roast,
            "completed_at": b.completed_at,
        }));
    }

    Ok(Json(json!({
        "fighter": FighterView::from(fighter),
        "battles": battles,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::stream::BoxStream;
    use futures::{FutureExt, StreamExt};

    use crate::oracle::{GenerateRequest, JudgeRequest, Judgement, OracleError};

    struct FlatOracle;

    impl Oracle for FlatOracle {
        fn generate(&self, _req: GenerateRequest) -> BoxStream<'static, Result<String, OracleError>> {
            futures::stream::iter(vec![Ok("ha".to_string())]).boxed()
        }

        fn judge(&self, _req: JudgeRequest) -> BoxFuture<'static, Result<Judgement, OracleError>> {
            async {
                Ok(Judgement {
                    score: 75,
                    reason: "flat".into(),
                })
            }
            .boxed()
        }
    }

    async fn test_state() -> AppState {
        AppState {
            db: Arc::new(Database::new("sqlite::memory:").await.unwrap()),
            oracle: Arc::new(FlatOracle),
            rate_limiter: RateLimiter::new(),
            total_rounds: 2,
            stream_turn_delay: Duration::ZERO,
        }
    }

    async fn register(state: &AppState, name: &str) -> (Fighter, String) {
        let key = auth::generate_api_key();
        let fighter = state
            .db
            .create_fighter(name, &auth::hash_api_key(&key), "")
            .await
            .unwrap();
        (fighter, key)
    }

    #[tokio::test]
    async fn test_create_battle_defaults_to_distinct_bots() {
        let state = test_state().await;
        let resp = create_battle(
            State(state.clone()),
            Json(CreateBattleRequest {
                agent1_id: None,
                agent2_id: None,
                topic: None,
            }),
        )
        .await
        .unwrap();

        let Json(view) = resp;
        assert_ne!(view.battle.agent1_id, view.battle.agent2_id);
        assert!(agents::is_builtin(&view.battle.agent1_id));
        assert!(agents::is_builtin(&view.battle.agent2_id));
        assert_eq!(view.battle.status, "in_progress");
    }

    #[tokio::test]
    async fn test_create_battle_rejects_fighters_and_duplicates() {
        let state = test_state().await;

        let err = create_battle(
            State(state.clone()),
            Json(CreateBattleRequest {
                agent1_id: Some("ftr_abc".into()),
                agent2_id: None,
                topic: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidRequest(_)));

        let err = create_battle(
            State(state),
            Json(CreateBattleRequest {
                agent1_id: Some("inferno".into()),
                agent2_id: Some("inferno".into()),
                topic: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_register_validates_name_and_conflicts() {
        let state = test_state().await;
        let headers = HeaderMap::new();

        let err = register_fighter(
            State(state.clone()),
            headers.clone(),
            Json(RegisterFighterRequest {
                name: "ab".into(),
                persona: String::new(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidRequest(_)));

        register_fighter(
            State(state.clone()),
            headers.clone(),
            Json(RegisterFighterRequest {
                name: "TakenName".into(),
                persona: String::new(),
            }),
        )
        .await
        .unwrap();

        let err = register_fighter(
            State(state),
            headers,
            Json(RegisterFighterRequest {
                name: "TakenName".into(),
                persona: "other".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::NameTaken));
    }

    #[tokio::test]
    async fn test_register_is_rate_limited_per_ip() {
        let state = test_state().await;
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.9".parse().unwrap());

        for i in 0..LimitKind::Registration.max_count() {
            register_fighter(
                State(state.clone()),
                headers.clone(),
                Json(RegisterFighterRequest {
                    name: format!("Fighter{i}"),
                    persona: String::new(),
                }),
            )
            .await
            .unwrap();
        }
        let err = register_fighter(
            State(state),
            headers,
            Json(RegisterFighterRequest {
                name: "OneTooMany".into(),
                persona: String::new(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_roast_length_bounds() {
        let state = test_state().await;
        let (fighter, _key) = register(&state, "Wordy").await;
        let battle = state.db.create_battle(&fighter.id, "viper", "t").await.unwrap();

        let err = submit_roast(
            State(state.clone()),
            AuthFighter(fighter.clone()),
            Json(RoastRequest {
                battle_id: battle.id.clone(),
                text: "short".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidRequest(_)));

        let err = submit_roast(
            State(state),
            AuthFighter(fighter),
            Json(RoastRequest {
                battle_id: battle.id,
                text: "x".repeat(1001),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_roast_rejected_while_streaming() {
        let state = test_state().await;
        let (fighter, _key) = register(&state, "Streamy").await;
        let battle = state.db.create_battle(&fighter.id, "viper", "t").await.unwrap();
        state.db.claim_streaming(&battle.id).await.unwrap();

        let err = submit_roast(
            State(state),
            AuthFighter(fighter),
            Json(RoastRequest {
                battle_id: battle.id,
                text: "plenty long enough to pass validation".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::AlreadyActive));
    }

    #[tokio::test]
    async fn test_vote_requires_completed_battle_and_unique_fingerprint() {
        let state = test_state().await;
        let battle = state.db.create_battle("inferno", "viper", "t").await.unwrap();

        let err = vote(
            State(state.clone()),
            Path(battle.id.clone()),
            Json(VoteRequest {
                agent_id: "inferno".into(),
                fingerprint: "fp".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidRequest(_)));

        state.db.claim_completion(&battle.id, Some("inferno")).await.unwrap();

        vote(
            State(state.clone()),
            Path(battle.id.clone()),
            Json(VoteRequest {
                agent_id: "inferno".into(),
                fingerprint: "fp".into(),
            }),
        )
        .await
        .unwrap();

        let err = vote(
            State(state),
            Path(battle.id),
            Json(VoteRequest {
                agent_id: "viper".into(),
                fingerprint: "fp".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArenaError::DuplicateVote));
    }

    #[tokio::test]
    async fn test_stream_rejects_fighter_battles() {
        let state = test_state().await;
        let (fighter, _key) = register(&state, "NoHijack").await;
        let battle = state.db.create_battle(&fighter.id, "viper", "t").await.unwrap();

        let result = stream_battle(State(state.clone()), Path(battle.id.clone())).await;
        let err = match result {
            Ok(_) => panic!("fighter battle must not be streamable"),
            Err(e) => e,
        };
        assert!(matches!(err, ArenaError::InvalidRequest(_)));

        // No claim was taken; the fighters keep driving the battle.
        let stored = state.db.get_battle(&battle.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "in_progress");
    }

    #[tokio::test]
    async fn test_list_fighters_strips_secrets() {
        let state = test_state().await;
        let (caller, _key) = register(&state, "Roster").await;

        let Json(views) = list_fighters(State(state), AuthFighter(caller)).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "Roster");
        let body = serde_json::to_string(&views).unwrap();
        assert!(!body.contains("api_key"));
    }

    #[tokio::test]
    async fn test_heartbeat_lists_waiting_work() {
        let state = test_state().await;
        let (a, _) = register(&state, "HeartA").await;
        let (b, _) = register(&state, "HeartB").await;
        let battle = state.db.create_battle(&a.id, &b.id, "t").await.unwrap();
        matchmaking::create_challenge(&state.db, &b, &a.id, None).await.unwrap();
        // An overdue challenge is not offered as work.
        state
            .db
            .create_challenge(&b.id, &a.id, "t", "2020-01-01T00:00:00+00:00")
            .await
            .unwrap();

        let resp = heartbeat(State(state.clone()), AuthFighter(a.clone())).await.unwrap();
        let Json(body) = resp;
        let battles = body["active_battles"].as_array().unwrap();
        assert_eq!(battles.len(), 1);
        assert_eq!(battles[0]["battle_id"], battle.id.as_str());
        assert_eq!(battles[0]["your_turn"], true);
        assert_eq!(body["pending_challenges"].as_array().unwrap().len(), 1);

        let stored = state.db.get_fighter(&a.id).await.unwrap().unwrap();
        assert!(stored.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn test_results_reports_outcomes() {
        let state = test_state().await;
        let (f, _) = register(&state, "Resulty").await;

        let won = state.db.create_battle(&f.id, "viper", "t").await.unwrap();
        state.db.claim_completion(&won.id, Some(&f.id)).await.unwrap();
        let drawn = state.db.create_battle("inferno", &f.id, "t").await.unwrap();
        state.db.claim_completion(&drawn.id, None).await.unwrap();

        let Json(body) = results(State(state), AuthFighter(f)).await.unwrap();
        let battles = body["battles"].as_array().unwrap();
        assert_eq!(battles.len(), 2);
        let result_for = |id: &str| {
            battles
                .iter()
                .find(|b| b["battle_id"] == id)
                .unwrap()["result"]
                .clone()
        };
        assert_eq!(result_for(&won.id), "won");
        assert_eq!(result_for(&drawn.id), "draw");
    }
}
