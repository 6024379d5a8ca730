//! Prompt assembly
//!
//! Wording is deliberately plain; what matters to the pipeline is the reply
//! shape each prompt asks for, which must match the `Shape`s in
//! [`crate::candidates`], [`crate::utility_filter`] and
//! [`crate::reasoning_chain`].

use foresight_core::sanitize::truncate_chars;
use foresight_core::types::{Candidate, ContextBundle, RelatedFact, Trigger};

use crate::llm::Message;

const SYSTEM: &str = "You are a proactive assistant. You study what a user is doing and \
propose small, concrete, immediately useful next steps. Always answer with JSON only.";

const NO_SNAPSHOT: &str = "No recent screen activity captured.";

/// Characters of each evidence preview
pub const EVIDENCE_PREVIEW_CHARS: usize = 200;
/// Evidence previews included in a prompt
pub const MAX_EVIDENCE_PREVIEWS: usize = 10;

/// Ask for a short search query describing the trigger
pub fn semantic_query(trigger: &Trigger, reasoning_chars: usize) -> Vec<Message> {
    let reasoning = truncate_chars(&trigger.reasoning, reasoning_chars);
    vec![
        Message::system(
            "You turn observations about a user into short keyword search queries. \
             Reply with the query only, no quotes, at most eight words.",
        ),
        Message::user(format!(
            "Observation: {}\nReasoning: {}\n\nSearch query:",
            trigger.text, reasoning
        )),
    ]
}

fn confidence_group<'a>(
    facts: &'a [RelatedFact],
    keep: impl Fn(f64) -> bool,
    limit: usize,
) -> Vec<&'a RelatedFact> {
    facts.iter().filter(|f| keep(f.fact.confidence)).take(limit).collect()
}

/// Render related facts grouped by confidence, evidence previews and the
/// current snapshot
pub fn format_context(bundle: &ContextBundle) -> String {
    let facts = &bundle.related_facts;
    let groups = [
        ("High confidence", confidence_group(facts, |c| c >= 8.0, 3)),
        ("Medium confidence", confidence_group(facts, |c| (5.0..8.0).contains(&c), 3)),
        ("Low confidence", confidence_group(facts, |c| c < 5.0, 2)),
    ];

    let mut out = String::from("RELATED FACTS\n");
    let mut any = false;
    for (label, group) in groups.iter().filter(|(_, g)| !g.is_empty()) {
        any = true;
        out.push_str(&format!("{label}:\n"));
        for related in group {
            out.push_str(&format!(
                "- {} (confidence {:.0}/10)\n",
                related.fact.text, related.fact.confidence
            ));
        }
    }
    if !any {
        out.push_str("- none\n");
    }

    out.push_str("\nRECENT OBSERVATIONS\n");
    if bundle.raw_evidence.is_empty() {
        out.push_str("- none\n");
    }
    for evidence in bundle.raw_evidence.iter().take(MAX_EVIDENCE_PREVIEWS) {
        out.push_str(&format!(
            "- [{}] {}\n",
            evidence.content_type,
            truncate_chars(evidence.content.trim(), EVIDENCE_PREVIEW_CHARS)
        ));
    }

    out.push_str("\nCURRENT SCREEN\n");
    out.push_str(bundle.current_snapshot.as_deref().unwrap_or(NO_SNAPSHOT));
    out.push('\n');
    out
}

/// Ask for `count` candidate suggestions
pub fn candidates(trigger: &Trigger, bundle: &ContextBundle, count: usize) -> Vec<Message> {
    vec![
        Message::system(SYSTEM),
        Message::user(format!(
            "NEW INSIGHT (confidence {:.0}/10): {}\nWHY: {}\n\n{}\n\
             Propose {count} distinct suggestions grounded in the context above.\n\
             Return JSON: {{\"suggestions\": [{{\"title\": \"...\", \"description\": \"...\", \
             \"category\": \"...\", \"rationale\": \"...\", \"priority\": \"high|medium|low\"}}]}}",
            trigger.confidence,
            trigger.text,
            trigger.reasoning,
            format_context(bundle),
        )),
    ]
}

/// Ask for a utility score per candidate
pub fn scoring(trigger: &Trigger, candidates: &[Candidate], bundle: &ContextBundle) -> Vec<Message> {
    let listing: Vec<serde_json::Value> = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| {
            serde_json::json!({
                "index": index,
                "title": c.title,
                "description": c.description,
                "category": c.category,
            })
        })
        .collect();
    let listing = serde_json::to_string_pretty(&listing).unwrap_or_default();

    vec![
        Message::system(
            "You evaluate suggestions by expected value for the user. Always answer with JSON only.",
        ),
        Message::user(format!(
            "USER CONTEXT: {}\n{} related facts, snapshot {}.\n\nSUGGESTIONS:\n{listing}\n\n\
             For each suggestion give benefit, false_positive_cost, false_negative_cost and decay \
             on a 0-10 scale (decay: 10 = stays relevant for weeks, 1 = minutes) and \
             probability_useful, probability_false_positive, probability_false_negative in [0, 1].\n\
             Return JSON: {{\"scored_suggestions\": [{{\"index\": 0, \"benefit\": 8.5, \
             \"false_positive_cost\": 2.0, \"false_negative_cost\": 6.0, \"decay\": 7.0, \
             \"probability_useful\": 0.85, \"probability_false_positive\": 0.15, \
             \"probability_false_negative\": 0.1}}]}}",
            trigger.text,
            bundle.related_facts.len(),
            if bundle.current_snapshot.is_some() { "available" } else { "unavailable" },
        )),
    ]
}

/// One reasoning-chain stage: an instruction, the prior stage outputs and
/// the fields the reply must contain
pub fn chain_stage(
    instruction: &str,
    trigger: &Trigger,
    context: &str,
    prior: &serde_json::Value,
    fields: &[&str],
) -> Vec<Message> {
    let prior = serde_json::to_string_pretty(prior).unwrap_or_default();
    vec![
        Message::system(SYSTEM),
        Message::user(format!(
            "INSIGHT: {}\n\n{context}\nPREVIOUS ANALYSIS:\n{prior}\n\n{instruction}\n\
             Return one JSON object with the fields: {}.",
            trigger.text,
            fields.join(", "),
        )),
    ]
}
