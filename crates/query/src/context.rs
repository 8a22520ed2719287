//! Model-aware, mode-aware assembly of the plain-text context handed to the
//! LLM. Every budget here is in characters; tokens are estimated as
//! `ceil(chars / 4)` and the total never exceeds the model's context
//! ceiling.

use tracing::warn;

use cerebra_brain::schema::{BrainState, CoordinatorReview};
use cerebra_brain::{RankedNode, RankedThought, Thought};

use crate::modes::{QueryMode, context_char_ceiling, max_nodes};

/// Carried follow-up context from the previous turn of a session.
#[derive(Debug, Clone)]
pub struct PriorContext {
    pub prev_query: String,
    pub prev_answer: String,
}

#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: String,
    pub content: String,
}

/// Files supplied by the external file collaborator, pre-categorized.
#[derive(Debug, Clone, Default)]
pub struct OutputFileSet {
    pub documents: Vec<OutputFile>,
    pub code_files: Vec<OutputFile>,
    pub execution_outputs: Vec<OutputFile>,
    pub deliverables: Vec<OutputFile>,
}

pub struct ContextRequest<'a> {
    pub state: &'a BrainState,
    /// Ranked nodes, direct hits first, connected expansion flagged.
    pub ranked: &'a [RankedNode],
    pub thoughts: &'a [Thought],
    pub ranked_thoughts: &'a [RankedThought],
    pub review: Option<&'a CoordinatorReview>,
    pub output_files: Option<&'a OutputFileSet>,
    pub prior: Option<&'a PriorContext>,
    pub mode: QueryMode,
    pub model: &'a str,
}

#[derive(Debug)]
pub struct BuiltContext {
    pub text: String,
    pub estimated_tokens: usize,
    pub char_ceiling: usize,
    pub adaptive_limit: usize,
    /// Direct hits that made it into the rendered context.
    pub included: Vec<RankedNode>,
}

const PRIOR_ANSWER_CAP: usize = 50_000;
const PRIOR_TOTAL_WARN: usize = 400_000;
const CONNECTED_CAP: usize = 100;
const CONNECTED_PREVIEW: usize = 300;
const REVIEW_CAP: usize = 15_000;

/// Per-rank character budgets: ranks ≤20 / ≤100 / ≤200 / rest.
const TIER_BUDGETS: [usize; 4] = [2000, 1000, 700, 500];
/// Grounded mode runs slightly tighter at the top tier.
const TIER_BUDGETS_GROUNDED: [usize; 4] = [1600, 1000, 750, 500];

pub fn build_context(request: &ContextRequest<'_>) -> BuiltContext {
    let char_ceiling = context_char_ceiling(request.model);
    let adaptive_limit = adaptive_node_limit(request);
    let selected = select_direct(request, adaptive_limit);

    let mut text = String::new();
    let mut full = false;

    if let Some(prior) = request.prior {
        let answer = truncate_chars(&prior.prev_answer, PRIOR_ANSWER_CAP);
        push_bounded(
            &mut text,
            &format!(
                "PRIOR CONVERSATION:\nPrevious question: {}\nPrevious answer: {}\n\n",
                prior.prev_query, answer
            ),
            char_ceiling,
            &mut full,
        );
    }

    push_bounded(&mut text, &header(request.state), char_ceiling, &mut full);
    render_memories(request, &selected, &mut text, char_ceiling, &mut full);
    render_connected(request, &mut text, char_ceiling, &mut full);
    render_thoughts(request, &mut text, char_ceiling, &mut full);
    render_review(request, &mut text, char_ceiling, &mut full);
    render_output_files(request, &mut text, char_ceiling, &mut full);

    if request.prior.is_some() && text.chars().count() > PRIOR_TOTAL_WARN {
        warn!(
            chars = text.chars().count(),
            "follow-up context exceeds the soft budget"
        );
    }

    let chars = text.chars().count();
    BuiltContext {
        estimated_tokens: chars.div_ceil(4),
        char_ceiling,
        adaptive_limit,
        included: selected,
        text,
    }
}

/// `clamp(max(base_limit, ceil(coverage·hits)), 100, MAX_NODES[model])`,
/// widened ×1.3 for merged multi-source brains.
fn adaptive_node_limit(request: &ContextRequest<'_>) -> usize {
    let profile = request.mode.profile();
    let direct_hits = request
        .ranked
        .iter()
        .filter(|r| !r.via_connection)
        .count();
    let ceiling = max_nodes(request.model);
    let wanted = (profile.target_coverage * direct_hits as f64).ceil() as usize;
    let mut adaptive = profile.base_limit.max(wanted).clamp(100, ceiling);
    if request.state.is_merged() {
        adaptive = ((adaptive as f64 * 1.3) as usize).clamp(100, ceiling);
    }
    adaptive
}

/// Pick the direct hits that enter the context.
///
/// Merged brains sample round-robin across source runs (each source yields
/// its next-best node in turn) so one prolific run cannot crowd out the
/// rest; the final selection is re-sorted by score for presentation.
fn select_direct(request: &ContextRequest<'_>, limit: usize) -> Vec<RankedNode> {
    let direct: Vec<&RankedNode> = request
        .ranked
        .iter()
        .filter(|r| !r.via_connection)
        .collect();

    if !request.state.is_merged() {
        return direct.into_iter().take(limit).cloned().collect();
    }

    let mut groups: Vec<(String, Vec<&RankedNode>)> = Vec::new();
    for ranked in direct {
        let key = request.state.nodes[ranked.index]
            .source_runs
            .as_ref()
            .and_then(|runs| runs.iter().next().cloned())
            .unwrap_or_else(|| "baseline".to_string());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(ranked),
            None => groups.push((key, vec![ranked])),
        }
    }
    groups.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut selected: Vec<RankedNode> = Vec::new();
    let mut cursors = vec![0usize; groups.len()];
    while selected.len() < limit {
        let mut progressed = false;
        for (group_idx, (_, members)) in groups.iter().enumerate() {
            if selected.len() >= limit {
                break;
            }
            if let Some(ranked) = members.get(cursors[group_idx]) {
                selected.push((*ranked).clone());
                cursors[group_idx] += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    selected.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    selected
}

fn header(state: &BrainState) -> String {
    if state.nodes.is_empty() {
        return "BRAIN SNAPSHOT: empty brain (no memories loaded)\n\n".to_string();
    }
    let shape = if state.is_cluster {
        format!(", cluster of {} instances", state.instance_ids().len().max(1))
    } else {
        String::new()
    };
    let merged = if state.is_merged() { ", merged multi-run brain" } else { "" };
    format!(
        "BRAIN SNAPSHOT: {} memories, {} links, cycle {}{shape}{merged}\n\n",
        state.nodes.len(),
        state.edges.len(),
        state.cycle_count,
    )
}

fn render_memories(
    request: &ContextRequest<'_>,
    selected: &[RankedNode],
    text: &mut String,
    ceiling: usize,
    full: &mut bool,
) {
    if selected.is_empty() || *full {
        return;
    }
    let budgets = if request.mode == QueryMode::Grounded {
        &TIER_BUDGETS_GROUNDED
    } else {
        &TIER_BUDGETS
    };

    push_bounded(text, "RELEVANT MEMORIES:\n", ceiling, full);
    for (rank0, ranked) in selected.iter().enumerate() {
        if *full {
            break;
        }
        let rank = rank0 + 1;
        let budget = if rank <= 20 {
            budgets[0]
        } else if rank <= 100 {
            budgets[1]
        } else if rank <= 200 {
            budgets[2]
        } else {
            budgets[3]
        };
        let node = &request.state.nodes[ranked.index];
        let tags: Vec<&str> = node.tags.iter().map(String::as_str).collect();
        let line = format!(
            "[Mem {rank}] ({}, w={:.2}, a={:.2}) {}\n",
            tags.join("/"),
            node.weight,
            node.activation,
            truncate_sentence_aware(&node.concept, budget),
        );
        push_bounded(text, &line, ceiling, full);
    }
    push_bounded(text, "\n", ceiling, full);
}

fn render_connected(
    request: &ContextRequest<'_>,
    text: &mut String,
    ceiling: usize,
    full: &mut bool,
) {
    let connected: Vec<&RankedNode> = request
        .ranked
        .iter()
        .filter(|r| r.via_connection)
        .take(CONNECTED_CAP)
        .collect();
    if connected.is_empty() || *full {
        return;
    }
    push_bounded(text, "CONNECTED CONCEPTS:\n", ceiling, full);
    for ranked in connected {
        if *full {
            break;
        }
        let node = &request.state.nodes[ranked.index];
        let line = format!(
            "- {}: {}\n",
            node.id,
            truncate_chars(&node.concept, CONNECTED_PREVIEW)
        );
        push_bounded(text, &line, ceiling, full);
    }
    push_bounded(text, "\n", ceiling, full);
}

fn render_thoughts(
    request: &ContextRequest<'_>,
    text: &mut String,
    ceiling: usize,
    full: &mut bool,
) {
    let cap = if request.mode == QueryMode::Grounded { 25 } else { 40 };
    let picks: Vec<&RankedThought> = request.ranked_thoughts.iter().take(cap).collect();
    if picks.is_empty() || *full {
        return;
    }
    push_bounded(text, "THOUGHT STREAM:\n", ceiling, full);
    for ranked in picks {
        if *full {
            break;
        }
        let thought = &request.thoughts[ranked.index];
        let instance = thought.instance_id.as_deref().unwrap_or("solo");
        let mut line = format!(
            "Cycle {} [{} · {}] {}\n",
            thought.cycle.unwrap_or(0),
            thought.role,
            instance,
            truncate_chars(&thought.content, 400),
        );
        if let Some(goal) = &thought.goal {
            line.push_str(&format!("  goal: {}\n", truncate_chars(goal, 200)));
        }
        push_bounded(text, &line, ceiling, full);
    }
    push_bounded(text, "\n", ceiling, full);
}

fn render_review(
    request: &ContextRequest<'_>,
    text: &mut String,
    ceiling: usize,
    full: &mut bool,
) {
    if request.mode == QueryMode::Grounded || *full {
        return;
    }
    let Some(review) = request.review else { return };
    push_bounded(
        text,
        &format!(
            "COORDINATOR REVIEW (cycle {}):\n{}\n\n",
            review.cycle,
            truncate_chars(&review.content, REVIEW_CAP)
        ),
        ceiling,
        full,
    );
}

fn render_output_files(
    request: &ContextRequest<'_>,
    text: &mut String,
    ceiling: usize,
    full: &mut bool,
) {
    let Some(files) = request.output_files else { return };
    if *full {
        return;
    }
    push_bounded(text, "OUTPUT FILES:\n", ceiling, full);
    for file in files.deliverables.iter().take(5) {
        let block = format!(
            "[deliverable] {}\n{}\n",
            file.path,
            truncate_chars(&file.content, 1500)
        );
        push_bounded(text, &block, ceiling, full);
    }
    for file in files.documents.iter().take(8) {
        let block = format!(
            "[document] {}\n{}\n",
            file.path,
            truncate_chars(&file.content, 1000)
        );
        push_bounded(text, &block, ceiling, full);
    }
    for file in files.code_files.iter().take(5) {
        let block = format!(
            "[code] {}\n{}\n",
            file.path,
            truncate_chars(&file.content, 500)
        );
        push_bounded(text, &block, ceiling, full);
    }
    for file in files.execution_outputs.iter().take(3) {
        push_bounded(text, &format!("[execution] {}\n", file.path), ceiling, full);
    }
    push_bounded(text, "\n", ceiling, full);
}

// ── truncation primitives ─────────────────────────────────────────────────────

/// Sentence-aware cut: prefer the last `.` or newline past 70% of the
/// budget, then the last space past 80%, then a hard cut.
pub fn truncate_sentence_aware(text: &str, budget: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget {
        return text.to_string();
    }
    let window: String = chars[..budget].iter().collect();

    let sentence_floor = (budget as f64 * 0.7) as usize;
    if let Some(cut) = window
        .char_indices()
        .filter(|(_, c)| *c == '.' || *c == '\n')
        .map(|(i, _)| i)
        .filter(|&i| window[..i].chars().count() >= sentence_floor)
        .next_back()
    {
        return window[..=cut].trim_end().to_string();
    }

    let space_floor = (budget as f64 * 0.8) as usize;
    if let Some(cut) = window
        .char_indices()
        .filter(|(_, c)| *c == ' ')
        .map(|(i, _)| i)
        .filter(|&i| window[..i].chars().count() >= space_floor)
        .next_back()
    {
        return format!("{}…", window[..cut].trim_end());
    }

    format!("{window}…")
}

/// Plain character cap, appending `…` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let cut: String = chars.into_iter().take(max_chars).collect();
    format!("{cut}…")
}

/// Append `chunk`, truncating at the ceiling. Sets `full` once no further
/// content fits so later sections stop rendering.
fn push_bounded(text: &mut String, chunk: &str, ceiling: usize, full: &mut bool) {
    if *full {
        return;
    }
    let current = text.chars().count();
    let remaining = ceiling.saturating_sub(current);
    let chunk_len = chunk.chars().count();
    if chunk_len <= remaining {
        text.push_str(chunk);
        if chunk_len == remaining {
            *full = true;
        }
    } else {
        text.extend(chunk.chars().take(remaining));
        *full = true;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
