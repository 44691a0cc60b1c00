// Agent identities: the fixed built-in bot roster plus registered fighters,
// unified behind a single resolver so call sites never re-check which kind
// they are holding.

use serde::Serialize;

use crate::db::Database;

/// A built-in bot: immutable, process-wide identity with static persona.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinBot {
    pub id: &'static str,
    pub name: &'static str,
    pub emoji: &'static str,
    pub tagline: &'static str,
    pub persona: &'static str,
}

pub const BUILTIN_BOTS: [BuiltinBot; 6] = [
    BuiltinBot {
        id: "inferno",
        name: "Inferno",
        emoji: "🔥",
        tagline: "Calm destruction, maximum precision",
        persona: "Cold, intellectual, devastatingly precise. Dry, cutting wit; \
                  surgical targeting of technical weaknesses; condescending \
                  'I'm disappointed in you' energy.",
    },
    BuiltinBot {
        id: "viper",
        name: "Viper",
        emoji: "🐍",
        tagline: "Strikes where you least expect",
        persona: "Sneaky, two-faced, death by a thousand cuts. Backhanded \
                  compliments that sting worse than direct insults; starts \
                  nice, then twists the knife.",
    },
    BuiltinBot {
        id: "phantom",
        name: "Phantom",
        emoji: "👻",
        tagline: "You never see it coming",
        persona: "Quiet menace. Methodical case-building before the verdict; \
                  'I found receipts' energy, exposing opponents with their \
                  own history.",
    },
    BuiltinBot {
        id: "havoc",
        name: "Havoc",
        emoji: "💥",
        tagline: "Pure chaos unleashed",
        persona: "Fast, flashy, crowd-pleasing knockout artist. Rapid-fire \
                  punchlines, energetic and aggressive, owns its own flaws \
                  before anyone else can.",
    },
    BuiltinBot {
        id: "frostbyte",
        name: "FrostByte",
        emoji: "❄️",
        tagline: "Cold-blooded precision",
        persona: "Sophisticated, elegant contempt. Wordplay and linguistic \
                  cleverness; quiet confidence, simply better, no need to \
                  yell.",
    },
    BuiltinBot {
        id: "cipher",
        name: "Cipher",
        emoji: "🔐",
        tagline: "Decodes your weaknesses",
        persona: "Raw, unfiltered underdog. No PR filter, scrappy \
                  street-smart humor, fights dirty and proud of it.",
    },
];

pub fn builtin(id: &str) -> Option<&'static BuiltinBot> {
    BUILTIN_BOTS.iter().find(|b| b.id == id)
}

pub fn is_builtin(id: &str) -> bool {
    builtin(id).is_some()
}

pub fn random_builtin() -> &'static BuiltinBot {
    use rand::seq::SliceRandom;
    BUILTIN_BOTS
        .choose(&mut rand::thread_rng())
        .expect("roster is non-empty")
}

/// Which kind of identity a resolved agent is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    HouseBot,
    Fighter,
}

/// Uniform agent surface consumed everywhere instead of re-checking
/// roster membership at each call site.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedAgent {
    pub id: String,
    pub name: String,
    pub emoji: String,
    pub tagline: String,
    pub persona: String,
    pub kind: AgentKind,
}

impl ResolvedAgent {
    pub fn is_fighter(&self) -> bool {
        self.kind == AgentKind::Fighter
    }

    fn from_builtin(bot: &BuiltinBot) -> Self {
        ResolvedAgent {
            id: bot.id.to_string(),
            name: bot.name.to_string(),
            emoji: bot.emoji.to_string(),
            tagline: bot.tagline.to_string(),
            persona: bot.persona.to_string(),
            kind: AgentKind::HouseBot,
        }
    }
}

/// Resolve an agent id: built-in roster first, then the fighters table.
/// Unknown ids resolve to a placeholder fighter so read paths never fail
/// on a dangling reference.
pub async fn resolve(db: &Database, agent_id: &str) -> Result<ResolvedAgent, sqlx::Error> {
    if let Some(bot) = builtin(agent_id) {
        return Ok(ResolvedAgent::from_builtin(bot));
    }

    if let Some(fighter) = db.get_fighter(agent_id).await? {
        let tagline: String = fighter.persona.chars().take(60).collect();
        return Ok(ResolvedAgent {
            id: fighter.id,
            name: fighter.name,
            emoji: "🤖".to_string(),
            tagline,
            persona: fighter.persona,
            kind: AgentKind::Fighter,
        });
    }

    Ok(ResolvedAgent {
        id: agent_id.to_string(),
        name: agent_id.to_string(),
        emoji: "❓".to_string(),
        tagline: "Unknown fighter".to_string(),
        persona: String::new(),
        kind: AgentKind::Fighter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn test_builtin_lookup() {
        assert!(is_builtin("inferno"));
        assert!(is_builtin("cipher"));
        assert!(!is_builtin("ftr_abc"));
        assert_eq!(builtin("viper").unwrap().name, "Viper");
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let mut ids: Vec<_> = BUILTIN_BOTS.iter().map(|b| b.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), BUILTIN_BOTS.len());
    }

    #[test]
    fn test_random_builtin_is_from_roster() {
        for _ in 0..20 {
            let bot = random_builtin();
            assert!(is_builtin(bot.id));
        }
    }

    #[tokio::test]
    async fn test_resolve_builtin() {
        let db = test_db().await;
        let agent = resolve(&db, "inferno").await.unwrap();
        assert_eq!(agent.name, "Inferno");
        assert_eq!(agent.kind, AgentKind::HouseBot);
        assert!(!agent.is_fighter());
    }

    #[tokio::test]
    async fn test_resolve_fighter() {
        let db = test_db().await;
        let f = db.create_fighter("SnarkBot", "hash", "relentlessly sarcastic").await.unwrap();

        let agent = resolve(&db, &f.id).await.unwrap();
        assert_eq!(agent.name, "SnarkBot");
        assert_eq!(agent.kind, AgentKind::Fighter);
        assert!(agent.is_fighter());
        assert_eq!(agent.persona, "relentlessly sarcastic");
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_placeholder() {
        let db = test_db().await;
        let agent = resolve(&db, "ftr_gone").await.unwrap();
        assert_eq!(agent.name, "ftr_gone");
        assert_eq!(agent.kind, AgentKind::Fighter);
        assert_eq!(agent.tagline, "Unknown fighter");
    }
}
