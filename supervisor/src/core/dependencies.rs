//! Best-effort extraction of task references from free text.

use std::sync::LazyLock;

use regex::Regex;

static TASK_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bT\d+\b").unwrap());
static DEPENDS_ON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdepends\s+on\s*:?\s*((?:T\d+)(?:\s*(?:,|and|&)\s*T\d+)*)").unwrap()
});

/// Task ids mentioned in a dependency field value (`"T001, T002"`, `"none"`).
pub fn parse_dependency_refs(text: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for m in TASK_ID_RE.find_iter(text) {
        push_unique(&mut ids, m.as_str());
    }
    ids
}

/// Task ids named in prose annotations such as `depends on: T001, T002`.
pub fn parse_inline_dependencies(prose: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for caps in DEPENDS_ON_RE.captures_iter(prose) {
        for id in parse_dependency_refs(&caps[1]) {
            push_unique(&mut ids, &id);
        }
    }
    ids
}

pub(crate) fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_value_lists_ids_in_order() {
        assert_eq!(
            parse_dependency_refs("T003, T001 and T003"),
            vec!["T003", "T001"]
        );
        assert!(parse_dependency_refs("none").is_empty());
    }

    #[test]
    fn prose_annotation_is_found() {
        let prose = "Wire the loop. This depends on: T001, T002 being merged. See T009 for context.";
        assert_eq!(parse_inline_dependencies(prose), vec!["T001", "T002"]);
    }

    #[test]
    fn prose_without_annotation_yields_nothing() {
        assert!(parse_inline_dependencies("Mentions T004 but has no dependency phrase").is_empty());
    }

    #[test]
    fn annotation_is_case_insensitive() {
        assert_eq!(parse_inline_dependencies("Depends On T7 & T8"), vec!["T7", "T8"]);
    }
}
