// Database access layer (SQLite via sqlx).
//
// All state lives here; request handlers reload it per operation and write
// back with conditional updates and increment-style counters so concurrent
// finalizers and double submits resolve cleanly at the store.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

/// Generate a prefixed random identifier, e.g. `bat_3f2a…`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

// ── Row types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Battle {
    pub id: String,
    pub agent1_id: String,
    pub agent2_id: String,
    pub topic: String,
    pub status: String,
    pub votes_agent1: i64,
    pub votes_agent2: i64,
    pub winner_id: Option<String>,
    /// Agent holding the next turn slot. Kept in lockstep with the
    /// last-author derivation over the roast sequence; the column exists so
    /// turn submission can claim the slot with a single compare-and-swap.
    pub next_turn_agent_id: Option<String>,
    pub is_featured: bool,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl Battle {
    pub fn is_participant(&self, agent_id: &str) -> bool {
        self.agent1_id == agent_id || self.agent2_id == agent_id
    }

    pub fn opponent_of(&self, agent_id: &str) -> &str {
        if self.agent1_id == agent_id {
            &self.agent2_id
        } else {
            &self.agent1_id
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Roast {
    pub id: String,
    pub battle_id: String,
    pub agent_id: String,
    pub round: i64,
    pub text: String,
    pub score: i64,
    pub is_critical: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Fighter {
    pub id: String,
    pub name: String,
    pub api_key_hash: String,
    pub persona: String,
    pub total_battles: i64,
    pub wins: i64,
    pub losses: i64,
    pub avg_score: f64,
    pub registered_at: String,
    pub last_heartbeat: Option<String>,
}

impl Fighter {
    /// Win rate as a percentage with one decimal, 0 when unplayed.
    pub fn win_rate(&self) -> f64 {
        if self.total_battles > 0 {
            (self.wins as f64 / self.total_battles as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Challenge {
    pub id: String,
    pub challenger_id: String,
    pub opponent_id: String,
    pub topic: String,
    pub status: String,
    pub battle_id: Option<String>,
    /// RFC 3339; expiry is evaluated lazily when the row is next read.
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: String,
    pub battle_id: String,
    pub voted_for_agent_id: String,
    pub voter_fingerprint: String,
    pub created_at: String,
}

// ── Database ──────────────────────────────────────────────────────────

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS battles (
                id TEXT PRIMARY KEY,
                agent1_id TEXT NOT NULL,
                agent2_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                votes_agent1 INTEGER NOT NULL DEFAULT 0,
                votes_agent2 INTEGER NOT NULL DEFAULT 0,
                winner_id TEXT,
                next_turn_agent_id TEXT,
                is_featured INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                completed_at TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS roasts (
                id TEXT PRIMARY KEY,
                battle_id TEXT NOT NULL REFERENCES battles(id),
                agent_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                text TEXT NOT NULL,
                score INTEGER NOT NULL DEFAULT 0,
                is_critical INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fighters (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                api_key_hash TEXT NOT NULL UNIQUE,
                persona TEXT NOT NULL DEFAULT '',
                total_battles INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                avg_score REAL NOT NULL DEFAULT 0,
                registered_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_heartbeat TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS challenges (
                id TEXT PRIMARY KEY,
                challenger_id TEXT NOT NULL REFERENCES fighters(id),
                opponent_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                battle_id TEXT REFERENCES battles(id),
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                battle_id TEXT NOT NULL REFERENCES battles(id),
                voted_for_agent_id TEXT NOT NULL,
                voter_fingerprint TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(battle_id, voter_fingerprint)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Battles ───────────────────────────────────────────────────────

    /// Create a battle open for turns; agent1 always holds the first slot.
    pub async fn create_battle(
        &self,
        agent1_id: &str,
        agent2_id: &str,
        topic: &str,
    ) -> Result<Battle, sqlx::Error> {
        let id = new_id("bat");
        sqlx::query_as::<_, Battle>(
            "INSERT INTO battles (id, agent1_id, agent2_id, topic, status, next_turn_agent_id)
             VALUES (?, ?, ?, ?, 'in_progress', ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(agent1_id)
        .bind(agent2_id)
        .bind(topic)
        .bind(agent1_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_battle(&self, id: &str) -> Result<Option<Battle>, sqlx::Error> {
        sqlx::query_as::<_, Battle>("SELECT * FROM battles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Claim a battle for streaming. First claim wins; returns false when the
    /// battle is not `in_progress`.
    pub async fn claim_streaming(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE battles SET status = 'streaming' WHERE id = ? AND status = 'in_progress'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revert a crashed stream so the battle can be re-claimed or finalized.
    pub async fn revert_streaming(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE battles SET status = 'in_progress' WHERE id = ? AND status = 'streaming'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-swap the turn slot from `author` to `next`. Returns false
    /// when `author` does not hold the slot or the battle is not open,
    /// which is how a double submit loses.
    pub async fn claim_turn_slot(
        &self,
        battle_id: &str,
        author_id: &str,
        next_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE battles SET next_turn_agent_id = ?
             WHERE id = ? AND next_turn_agent_id = ?
               AND status IN ('in_progress', 'streaming')",
        )
        .bind(next_id)
        .bind(battle_id)
        .bind(author_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a battle completed with the given winner (None for a draw).
    /// Returns true only for the first caller; the winner, once set, is
    /// never overwritten.
    pub async fn claim_completion(
        &self,
        battle_id: &str,
        winner_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE battles
             SET status = 'completed', winner_id = ?, completed_at = datetime('now'),
                 next_turn_agent_id = NULL
             WHERE id = ? AND status != 'completed'",
        )
        .bind(winner_id)
        .bind(battle_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn active_battles_for(&self, agent_id: &str) -> Result<Vec<Battle>, sqlx::Error> {
        sqlx::query_as::<_, Battle>(
            "SELECT * FROM battles
             WHERE status = 'in_progress' AND (agent1_id = ? OR agent2_id = ?)
             ORDER BY created_at DESC",
        )
        .bind(agent_id)
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn completed_battles_for(
        &self,
        agent_id: &str,
        limit: i64,
    ) -> Result<Vec<Battle>, sqlx::Error> {
        sqlx::query_as::<_, Battle>(
            "SELECT * FROM battles
             WHERE status = 'completed' AND (agent1_id = ? OR agent2_id = ?)
             ORDER BY completed_at DESC LIMIT ?",
        )
        .bind(agent_id)
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    // ── Roasts ────────────────────────────────────────────────────────

    pub async fn create_roast(
        &self,
        battle_id: &str,
        agent_id: &str,
        round: i64,
        text: &str,
        score: i64,
        is_critical: bool,
    ) -> Result<Roast, sqlx::Error> {
        let id = new_id("rst");
        sqlx::query_as::<_, Roast>(
            "INSERT INTO roasts (id, battle_id, agent_id, round, text, score, is_critical)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(battle_id)
        .bind(agent_id)
        .bind(round)
        .bind(text)
        .bind(score)
        .bind(is_critical)
        .fetch_one(&self.pool)
        .await
    }

    /// The authoritative turn sequence: (round, insertion order).
    pub async fn list_roasts(&self, battle_id: &str) -> Result<Vec<Roast>, sqlx::Error> {
        sqlx::query_as::<_, Roast>(
            "SELECT * FROM roasts WHERE battle_id = ? ORDER BY round, created_at, rowid",
        )
        .bind(battle_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_roasts(&self, battle_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM roasts WHERE battle_id = ?")
            .bind(battle_id)
            .fetch_one(&self.pool)
            .await
    }

    // ── Fighters ──────────────────────────────────────────────────────

    pub async fn create_fighter(
        &self,
        name: &str,
        api_key_hash: &str,
        persona: &str,
    ) -> Result<Fighter, sqlx::Error> {
        let id = new_id("ftr");
        sqlx::query_as::<_, Fighter>(
            "INSERT INTO fighters (id, name, api_key_hash, persona)
             VALUES (?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(name)
        .bind(api_key_hash)
        .bind(persona)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_fighter(&self, id: &str) -> Result<Option<Fighter>, sqlx::Error> {
        sqlx::query_as::<_, Fighter>("SELECT * FROM fighters WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_fighter_by_key_hash(
        &self,
        api_key_hash: &str,
    ) -> Result<Option<Fighter>, sqlx::Error> {
        sqlx::query_as::<_, Fighter>("SELECT * FROM fighters WHERE api_key_hash = ?")
            .bind(api_key_hash)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_fighters(&self) -> Result<Vec<Fighter>, sqlx::Error> {
        sqlx::query_as::<_, Fighter>("SELECT * FROM fighters ORDER BY registered_at DESC, id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn touch_heartbeat(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE fighters SET last_heartbeat = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fold one battle into a fighter's running stats in a single atomic
    /// update. All right-hand sides read the pre-update row, so the average
    /// is weighted by the pre-increment total and concurrent finalizers
    /// cannot lose counts.
    pub async fn record_battle_result(
        &self,
        fighter_id: &str,
        won: bool,
        lost: bool,
        battle_avg_score: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE fighters SET
                avg_score = (avg_score * total_battles + ?) / (total_battles + 1),
                total_battles = total_battles + 1,
                wins = wins + ?,
                losses = losses + ?
             WHERE id = ?",
        )
        .bind(battle_avg_score)
        .bind(won as i64)
        .bind(lost as i64)
        .bind(fighter_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Challenges ────────────────────────────────────────────────────

    pub async fn create_challenge(
        &self,
        challenger_id: &str,
        opponent_id: &str,
        topic: &str,
        expires_at: &str,
    ) -> Result<Challenge, sqlx::Error> {
        let id = new_id("chl");
        sqlx::query_as::<_, Challenge>(
            "INSERT INTO challenges (id, challenger_id, opponent_id, topic, expires_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(challenger_id)
        .bind(opponent_id)
        .bind(topic)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_challenge(&self, id: &str) -> Result<Option<Challenge>, sqlx::Error> {
        sqlx::query_as::<_, Challenge>("SELECT * FROM challenges WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// The caller's own outstanding matchmaking-queue entry, if any.
    pub async fn pending_matchmaking_for(
        &self,
        challenger_id: &str,
        now: &str,
    ) -> Result<Option<Challenge>, sqlx::Error> {
        sqlx::query_as::<_, Challenge>(
            "SELECT * FROM challenges
             WHERE challenger_id = ? AND opponent_id = 'any'
               AND status = 'pending' AND expires_at > ?
             LIMIT 1",
        )
        .bind(challenger_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    /// Atomically claim the oldest waiting matchmaking entry from another
    /// challenger: find-and-mark is a single conditional update, so two
    /// near-simultaneous callers cannot match the same entry.
    pub async fn claim_matchmaking_opponent(
        &self,
        excluding_challenger_id: &str,
        now: &str,
    ) -> Result<Option<Challenge>, sqlx::Error> {
        sqlx::query_as::<_, Challenge>(
            "UPDATE challenges SET status = 'matched'
             WHERE id = (
                 SELECT id FROM challenges
                 WHERE opponent_id = 'any' AND status = 'pending'
                   AND challenger_id != ? AND expires_at > ?
                 ORDER BY created_at, rowid LIMIT 1
             )
             RETURNING *",
        )
        .bind(excluding_challenger_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolve a challenge to `accepted` or `matched`, optionally recording
    /// the battle it produced. The `status = ?` guard makes resolution
    /// single-shot: the accept path claims `pending -> accepted` before it
    /// creates the battle, then attaches the battle id, so a lost accept
    /// race never leaves a stray battle behind. Matched matchmaking entries
    /// are already out of `pending` via `claim_matchmaking_opponent`, so
    /// those pass `matched` as `from`.
    pub async fn resolve_challenge(
        &self,
        id: &str,
        from_status: &str,
        to_status: &str,
        battle_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE challenges SET status = ?, battle_id = ? WHERE id = ? AND status = ?")
                .bind(to_status)
                .bind(battle_id)
                .bind(id)
                .bind(from_status)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_challenge_battle(
        &self,
        id: &str,
        battle_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE challenges SET battle_id = ? WHERE id = ?")
            .bind(battle_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Unconditional status write; declining twice is harmless.
    pub async fn set_challenge_status(&self, id: &str, status: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE challenges SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Lazily expire a pending challenge on read.
    pub async fn expire_challenge(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE challenges SET status = 'expired' WHERE id = ? AND status = 'pending'")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Challenges still waiting on `opponent_id`; overdue rows are excluded.
    pub async fn pending_challenges_for(
        &self,
        opponent_id: &str,
        now: &str,
    ) -> Result<Vec<Challenge>, sqlx::Error> {
        sqlx::query_as::<_, Challenge>(
            "SELECT * FROM challenges
             WHERE opponent_id = ? AND status = 'pending' AND expires_at > ?
             ORDER BY created_at, rowid",
        )
        .bind(opponent_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
    }

    /// Lazily sweep overdue pending challenges (direct and queued) into
    /// `expired`. Returns how many rows moved.
    pub async fn expire_stale_challenges(&self, now: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE challenges SET status = 'expired'
             WHERE status = 'pending' AND expires_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ── Votes ─────────────────────────────────────────────────────────

    /// Insert a vote and bump the battle's counter for the backed side.
    /// A duplicate (battle, fingerprint) pair surfaces as a UNIQUE
    /// constraint error for the caller to remap.
    pub async fn cast_vote(
        &self,
        battle_id: &str,
        voted_for_agent_id: &str,
        fingerprint: &str,
    ) -> Result<Battle, sqlx::Error> {
        let id = new_id("vot");
        sqlx::query(
            "INSERT INTO votes (id, battle_id, voted_for_agent_id, voter_fingerprint)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(battle_id)
        .bind(voted_for_agent_id)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, Battle>(
            "UPDATE battles SET
                votes_agent1 = votes_agent1 + (agent1_id = ?),
                votes_agent2 = votes_agent2 + (agent2_id = ?)
             WHERE id = ?
             RETURNING *",
        )
        .bind(voted_for_agent_id)
        .bind(voted_for_agent_id)
        .bind(battle_id)
        .fetch_one(&self.pool)
        .await
    }
}
