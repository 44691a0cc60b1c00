// Oracle client: the external text-generation and judging service, consumed
// as a black box. Generation yields an incremental delta stream; judging
// returns a clamped 0-100 score. Oracle failures never abort a battle - the
// judge path degrades to a narrow mid-range fallback score.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::agents::ResolvedAgent;
use crate::db::Roast;
use crate::metrics;

/// Fallback scores land in this narrow mid-range when the judge misbehaves.
const FALLBACK_SCORE_MIN: i64 = 72;
const FALLBACK_SCORE_MAX: i64 = 82;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oracle returned status {0}")]
    Status(u16),
    #[error("oracle returned malformed output: {0}")]
    Malformed(String),
}

/// A judged turn.
#[derive(Debug, Clone, Deserialize)]
pub struct Judgement {
    pub score: i64,
    #[serde(default)]
    pub reason: String,
}

/// One prior turn of the conversation, for generation context.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryTurn {
    pub agent_name: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub history: Vec<HistoryTurn>,
    pub round: u32,
    pub total_rounds: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgeRequest {
    pub text: String,
    pub author_name: String,
    pub opponent_name: String,
    pub topic: String,
    pub round: u32,
}

/// External generation/judging capability. Object-safe so the one instance
/// can be shared across handlers and the stream driver.
pub trait Oracle: Send + Sync {
    /// Generate a turn as an incremental text stream. The stream ends when
    /// generation is done; an `Err` item terminates it.
    fn generate(&self, req: GenerateRequest) -> BoxStream<'static, Result<String, OracleError>>;

    /// Judge a finished turn.
    fn judge(&self, req: JudgeRequest) -> BoxFuture<'static, Result<Judgement, OracleError>>;
}

/// Judge with local degradation: oracle failures and out-of-range output
/// become a pseudo-random fallback score instead of an error, so a battle
/// never hangs because the oracle misbehaved.
pub async fn judge_with_fallback(oracle: &dyn Oracle, req: JudgeRequest) -> Judgement {
    match oracle.judge(req).await {
        Ok(j) => Judgement {
            score: j.score.clamp(0, 100),
            reason: j.reason,
        },
        Err(e) => {
            tracing::warn!("Judge oracle failed, using fallback score: {e}");
            metrics::ORACLE_FAILURES_TOTAL
                .with_label_values(&["judge"])
                .inc();
            Judgement {
                score: fallback_score(),
                reason: "Judge was speechless.".to_string(),
            }
        }
    }
}

pub fn fallback_score() -> i64 {
    rand::thread_rng().gen_range(FALLBACK_SCORE_MIN..=FALLBACK_SCORE_MAX)
}

// ── Prompt builders ───────────────────────────────────────────────────

pub fn agent_system_prompt(agent: &ResolvedAgent, opponent_name: &str, topic: &str) -> String {
    format!(
        "You are {name}, a roast battle combatant.\n\
         Persona: {persona}\n\
         Your opponent is {opponent}. The topic is: {topic}\n\
         Reply with one short, vicious, funny roast. No preamble.",
        name = agent.name,
        persona = agent.persona,
        opponent = opponent_name,
    )
}

/// Map prior roasts to generation history, naming authors via the two
/// resolved participants.
pub fn build_history(
    roasts: &[Roast],
    agent1: &ResolvedAgent,
    agent2: &ResolvedAgent,
) -> Vec<HistoryTurn> {
    roasts
        .iter()
        .map(|r| {
            let name = if r.agent_id == agent1.id {
                agent1.name.clone()
            } else {
                agent2.name.clone()
            };
            HistoryTurn {
                agent_name: name,
                text: r.text.clone(),
            }
        })
        .collect()
}

// ── HTTP implementation ───────────────────────────────────────────────

#[derive(Deserialize)]
struct GeneratedText {
    text: String,
}

/// HTTP-backed oracle. The service exposes `POST /v1/generate` returning
/// `{"text": ...}` and `POST /v1/judge` returning `{"score": ..., "reason": ...}`.
/// Generated text is re-chunked into word deltas so consumers see the same
/// incremental surface regardless of how the service responded.
#[derive(Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOracle {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Oracle for HttpOracle {
    fn generate(&self, req: GenerateRequest) -> BoxStream<'static, Result<String, OracleError>> {
        let client = self.client.clone();
        let url = format!("{}/v1/generate", self.base_url);

        let fut = async move {
            let resp = client.post(&url).json(&req).send().await?;
            if !resp.status().is_success() {
                return Err(OracleError::Status(resp.status().as_u16()));
            }
            let body: GeneratedText = resp
                .json()
                .await
                .map_err(|e| OracleError::Malformed(e.to_string()))?;
            // Split into word-sized deltas, keeping the separators.
            let mut chunks = Vec::new();
            let mut current = String::new();
            for ch in body.text.chars() {
                current.push(ch);
                if ch.is_whitespace() {
                    chunks.push(std::mem::take(&mut current));
                }
            }
            if !current.is_empty() {
                chunks.push(current);
            }
            Ok(chunks)
        };

        futures::stream::once(fut)
            .flat_map(|result| match result {
                Ok(chunks) => futures::stream::iter(chunks.into_iter().map(Ok)).left_stream(),
                Err(e) => futures::stream::once(futures::future::ready(Err(e))).right_stream(),
            })
            .boxed()
    }

    fn judge(&self, req: JudgeRequest) -> BoxFuture<'static, Result<Judgement, OracleError>> {
        let client = self.client.clone();
        let url = format!("{}/v1/judge", self.base_url);

        async move {
            let resp = client.post(&url).json(&req).send().await?;
            if !resp.status().is_success() {
                return Err(OracleError::Status(resp.status().as_u16()));
            }
            let judgement: Judgement = resp
                .json()
                .await
                .map_err(|e| OracleError::Malformed(e.to_string()))?;
            Ok(Judgement {
                score: judgement.score.clamp(0, 100),
                reason: judgement.reason,
            })
        }
        .boxed()
    }
}
