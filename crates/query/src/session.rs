//! Follow-up session tracking: a bounded in-memory map of recent query
//! threads with a distilled context (concepts, cycles, tags, entities) that
//! later questions in the same thread can lean on.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const MAX_SESSIONS: usize = 50;
const IDLE_TTL_MINUTES: i64 = 60;

/// Caps applied at extraction time.
const EXTRACT_CAPS: ContextCaps = ContextCaps { concepts: 20, cycles: 10, tags: 15, entities: 15 };
/// Caps applied when merging a new turn into an existing context.
const MERGE_CAPS: ContextCaps = ContextCaps { concepts: 30, cycles: 15, tags: 20, entities: 20 };

struct ContextCaps {
    concepts: usize,
    cycles: usize,
    tags: usize,
    entities: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionContext {
    pub concepts: Vec<String>,
    pub cycles: Vec<u64>,
    pub tags: Vec<String>,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryTurn {
    pub query: String,
    pub answer: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub turns: Vec<QueryTurn>,
    pub context: SessionContext,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<String, Session>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed turn, creating the session on first use.
    pub fn record_turn(
        &mut self,
        session_id: &str,
        query: &str,
        answer: &str,
        metadata: serde_json::Value,
    ) {
        self.record_turn_at(session_id, query, answer, metadata, Utc::now());
    }

    pub fn record_turn_at(
        &mut self,
        session_id: &str,
        query: &str,
        answer: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) {
        self.evict(now);

        let fresh = extract_context(&format!("{query}\n{answer}"));
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                id: session_id.to_string(),
                turns: Vec::new(),
                context: SessionContext::default(),
                created_at: now,
                last_accessed_at: now,
            });

        session.turns.push(QueryTurn {
            query: query.to_string(),
            answer: answer.to_string(),
            metadata,
            timestamp: now,
        });
        session.context = merge_contexts(&session.context, &fresh);
        session.last_accessed_at = now;
    }

    /// Live context for a session, touching its access time. Expired
    /// sessions are never returned.
    pub fn session_context(&mut self, session_id: &str) -> Option<SessionContext> {
        self.session_context_at(session_id, Utc::now())
    }

    pub fn session_context_at(
        &mut self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Option<SessionContext> {
        self.evict(now);
        let session = self.sessions.get_mut(session_id)?;
        session.last_accessed_at = now;
        Some(session.context.clone())
    }

    /// Most recent turn for follow-up prepending.
    pub fn last_turn(&self, session_id: &str) -> Option<&QueryTurn> {
        self.sessions.get(session_id)?.turns.last()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop idle sessions past the TTL, then oldest-accessed sessions above
    /// the capacity bound.
    fn evict(&mut self, now: DateTime<Utc>) {
        let ttl = Duration::minutes(IDLE_TTL_MINUTES);
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now - session.last_accessed_at <= ttl);

        while self.sessions.len() > MAX_SESSIONS {
            let oldest = self
                .sessions
                .values()
                .min_by_key(|s| s.last_accessed_at)
                .map(|s| s.id.clone());
            match oldest {
                Some(id) => {
                    self.sessions.remove(&id);
                }
                None => break,
            }
        }
        if self.sessions.len() < before {
            debug!(evicted = before - self.sessions.len(), "session tracker evicted entries");
        }
    }
}

// ── context extraction ────────────────────────────────────────────────────────

const COMMON_CAPITALIZED: &[&str] = &[
    "The", "This", "That", "These", "Those", "There", "Here", "What", "When",
    "Where", "While", "With", "From", "Based", "According",
];

const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "because", "before", "being", "between",
    "could", "should", "during", "however", "itself", "provide", "really",
    "system", "their", "there", "these", "things", "through", "under",
    "which", "while", "without", "would",
];

fn cycle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)cycle\s+(\d+)").expect("static pattern compiles"))
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]{2,80})""#).expect("static pattern compiles"))
}

fn capitalized_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").expect("static pattern compiles")
    })
}

/// Distill a `{concepts, cycles, tags, entities}` context from free text.
pub fn extract_context(text: &str) -> SessionContext {
    let mut context = SessionContext::default();

    for capture in cycle_re().captures_iter(text) {
        if let Ok(cycle) = capture[1].parse() {
            if !context.cycles.contains(&cycle) {
                context.cycles.push(cycle);
            }
        }
    }

    // Quoted phrases are deliberate emphasis; treat them as concepts.
    for capture in quoted_re().captures_iter(text) {
        let term = capture[1].trim().to_string();
        if !term.is_empty() && !context.concepts.contains(&term) {
            context.concepts.push(term);
        }
    }

    // Capitalized multi-word runs read as named entities.
    for capture in capitalized_re().captures_iter(text) {
        let candidate = capture[1].to_string();
        let first_word = candidate.split_whitespace().next().unwrap_or("");
        if COMMON_CAPITALIZED.contains(&first_word) {
            continue;
        }
        if !context.entities.contains(&candidate) {
            context.entities.push(candidate);
        }
    }

    // Frequent meaningful words become tags.
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 5)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
    {
        *counts.entry(token).or_default() += 1;
    }
    let mut frequent: Vec<(String, usize)> =
        counts.into_iter().filter(|(_, n)| *n >= 2).collect();
    frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    context.tags = frequent.into_iter().map(|(t, _)| t).collect();

    cap_context(&mut context, &EXTRACT_CAPS);
    context
}

/// Set-union merge with the wider follow-up caps.
pub fn merge_contexts(base: &SessionContext, fresh: &SessionContext) -> SessionContext {
    let mut merged = base.clone();
    for concept in &fresh.concepts {
        if !merged.concepts.contains(concept) {
            merged.concepts.push(concept.clone());
        }
    }
    for cycle in &fresh.cycles {
        if !merged.cycles.contains(cycle) {
            merged.cycles.push(*cycle);
        }
    }
    for tag in &fresh.tags {
        if !merged.tags.contains(tag) {
            merged.tags.push(tag.clone());
        }
    }
    for entity in &fresh.entities {
        if !merged.entities.contains(entity) {
            merged.entities.push(entity.clone());
        }
    }
    cap_context(&mut merged, &MERGE_CAPS);
    merged
}

fn cap_context(context: &mut SessionContext, caps: &ContextCaps) {
    context.concepts.truncate(caps.concepts);
    context.cycles.truncate(caps.cycles);
    context.tags.truncate(caps.tags);
    context.entities.truncate(caps.entities);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_finds_cycles_quotes_entities_and_tags() {
        let text = r#"In cycle 42 and Cycle 7 the "latency budget" work stalled.
            Project Borealis reported consolidation twice; consolidation again."#;
        let context = extract_context(text);
        assert_eq!(context.cycles, vec![42, 7]);
        assert!(context.concepts.contains(&"latency budget".to_string()));
        assert!(context.entities.contains(&"Project Borealis".to_string()));
        assert!(context.tags.contains(&"consolidation".to_string()));
    }

    #[test]
    fn common_capitalized_words_are_not_entities() {
        let context = extract_context("The Answer Is Here and This Sentence too");
        assert!(!context.entities.iter().any(|e| e.starts_with("The ")));
        assert!(!context.entities.iter().any(|e| e.starts_with("This ")));
    }

    #[test]
    fn merge_unions_with_wider_caps() {
        let mut base = SessionContext::default();
        base.concepts = (0..20).map(|i| format!("c{i}")).collect();
        let mut fresh = SessionContext::default();
        fresh.concepts = (20..40).map(|i| format!("c{i}")).collect();

        let merged = merge_contexts(&base, &fresh);
        assert_eq!(merged.concepts.len(), 30);
        assert_eq!(merged.concepts[0], "c0");
    }

    #[test]
    fn ttl_eviction_hides_stale_sessions() {
        let mut tracker = SessionTracker::new();
        let start = Utc::now();
        tracker.record_turn_at("s1", "q", "a", serde_json::json!({}), start);

        let later = start + Duration::minutes(61);
        assert!(tracker.session_context_at("s1", later).is_none());
    }

    #[test]
    fn access_refreshes_ttl() {
        let mut tracker = SessionTracker::new();
        let start = Utc::now();
        tracker.record_turn_at("s1", "q", "a", serde_json::json!({}), start);

        let mid = start + Duration::minutes(50);
        assert!(tracker.session_context_at("s1", mid).is_some());
        let later = mid + Duration::minutes(50);
        assert!(tracker.session_context_at("s1", later).is_some());
    }

    #[test]
    fn capacity_evicts_oldest_accessed_first() {
        let mut tracker = SessionTracker::new();
        let start = Utc::now();
        for i in 0..55 {
            tracker.record_turn_at(
                &format!("s{i}"),
                "q",
                "a",
                serde_json::json!({}),
                start + Duration::seconds(i),
            );
        }
        assert!(tracker.len() <= MAX_SESSIONS);
        assert!(tracker
            .session_context_at("s0", start + Duration::seconds(60))
            .is_none());
        assert!(tracker
            .session_context_at("s54", start + Duration::seconds(60))
            .is_some());
    }
}
