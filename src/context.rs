//! Context assembly: render ranked results into a bounded, attributed text
//! block for the downstream answer-generation step.
//!
//! Results are added whole, in rank order, until the next addition would
//! exceed the character budget; a partially included result is never
//! emitted. When nothing fits (or there are no results) the block is the
//! explicit [`NO_CONTEXT_MARKER`], never an empty string, so generation has
//! a well-defined degraded input.

use crate::models::RankedResult;

/// Emitted instead of an empty context block.
pub const NO_CONTEXT_MARKER: &str = "(no relevant context found)";

/// Render `results` into an attributed block of at most `budget_chars`
/// bytes of UTF-8 text.
///
/// Each included result gets a 1-based index and a source label: the
/// querying tenant's own units are labelled `own knowledge base`, linked
/// units `linked: <tenant>`. Duplicate unit ids are skipped.
pub fn assemble_context(
    source_tenant_id: &str,
    results: &[RankedResult],
    budget_chars: usize,
) -> String {
    let mut out = String::new();
    let mut seen: Vec<&str> = Vec::new();
    let mut index = 1usize;

    for result in results {
        if seen.contains(&result.unit_id.as_str()) {
            continue;
        }

        let block = render_block(source_tenant_id, result, index);
        let cost = if out.is_empty() {
            block.len()
        } else {
            block.len() + 2 // joining blank line
        };
        if out.len() + cost > budget_chars {
            break;
        }

        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&block);
        seen.push(&result.unit_id);
        index += 1;
    }

    if out.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }
    out
}

fn render_block(source_tenant_id: &str, result: &RankedResult, index: usize) -> String {
    let label = if result.is_own(source_tenant_id) {
        "own knowledge base".to_string()
    } else {
        format!("linked: {}", result.origin_tenant_id)
    };

    let header = match &result.title {
        Some(title) => format!("[{}] {} ({})", index, title, label),
        None => format!("[{}] ({})", index, label),
    };

    format!("{}\n{}", header, result.text.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn result(id: &str, origin: &str, text: &str) -> RankedResult {
        RankedResult {
            unit_id: id.to_string(),
            origin_tenant_id: origin.to_string(),
            title: None,
            text: text.to_string(),
            source_type: SourceType::Document,
            raw_similarity: 0.9,
            link_weight: 1.0,
            weighted_score: 0.9,
            updated_at: 0,
        }
    }

    #[test]
    fn test_zero_results_emits_marker() {
        assert_eq!(assemble_context("a", &[], 1000), NO_CONTEXT_MARKER);
    }

    #[test]
    fn test_attribution_labels() {
        let results = vec![result("u1", "a", "own text"), result("u2", "b", "linked text")];
        let block = assemble_context("a", &results, 10_000);
        assert!(block.contains("[1] (own knowledge base)\nown text"));
        assert!(block.contains("[2] (linked: b)\nlinked text"));
    }

    #[test]
    fn test_title_in_header() {
        let mut r = result("u1", "a", "body");
        r.title = Some("Handbook".into());
        let block = assemble_context("a", &[r], 10_000);
        assert!(block.starts_with("[1] Handbook (own knowledge base)\nbody"));
    }

    #[test]
    fn test_whole_results_only_one_fits() {
        // Three identical results; budget admits exactly one rendered block.
        let results = vec![
            result("u1", "a", "0123456789"),
            result("u2", "a", "0123456789"),
            result("u3", "a", "0123456789"),
        ];
        let one = render_block("a", &results[0], 1).len();
        let block = assemble_context("a", &results, one + 5);
        assert!(block.contains("[1]"));
        assert!(!block.contains("[2]"));
        assert_ne!(block, NO_CONTEXT_MARKER);
    }

    #[test]
    fn test_budget_smaller_than_any_result_emits_marker_not_partial() {
        let results = vec![result("u1", "a", "a rather long body of text")];
        let block = assemble_context("a", &results, 5);
        assert_eq!(block, NO_CONTEXT_MARKER);
    }

    #[test]
    fn test_never_exceeds_budget() {
        let results: Vec<RankedResult> = (0..10)
            .map(|i| result(&format!("u{}", i), "a", &"x".repeat(30)))
            .collect();
        for budget in [0, 10, 50, 100, 200, 500] {
            let block = assemble_context("a", &results, budget);
            if block != NO_CONTEXT_MARKER {
                assert!(block.len() <= budget, "budget {} exceeded", budget);
            }
        }
    }

    #[test]
    fn test_duplicates_skipped_and_indices_contiguous() {
        let results = vec![
            result("u1", "a", "first"),
            result("u1", "a", "first again"),
            result("u2", "b", "second"),
        ];
        let block = assemble_context("a", &results, 10_000);
        assert!(block.contains("[1] (own knowledge base)\nfirst"));
        assert!(!block.contains("first again"));
        assert!(block.contains("[2] (linked: b)\nsecond"));
    }

    #[test]
    fn test_rank_order_preserved() {
        let results = vec![result("u1", "a", "alpha"), result("u2", "a", "beta")];
        let block = assemble_context("a", &results, 10_000);
        let a = block.find("alpha").unwrap();
        let b = block.find("beta").unwrap();
        assert!(a < b);
    }
}
