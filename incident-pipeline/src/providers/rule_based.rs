use interfaces::ProviderKind;

use super::{three_section_markdown, truncate_chars, SummaryInput, TLDR_MAX_CHARS};
use crate::types::SummaryResult;

/// Template summary without any external call. Never fails.
pub fn summarize(input: &SummaryInput) -> SummaryResult {
    let mut lines = input.body.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next().unwrap_or("");
    let second = lines.next().unwrap_or("");

    let tl_dr = input.title().unwrap_or(first);

    SummaryResult {
        tl_dr: truncate_chars(tl_dr, TLDR_MAX_CHARS),
        summary_md: three_section_markdown(first, second),
        citations: Vec::new(),
        provider: ProviderKind::RuleBased,
        model: None,
    }
}
