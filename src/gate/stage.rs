//! Stage transition rules: stages move forward one at a time.

use super::checkpoint::Finding;
use super::ViolationKind;
use crate::manifest::Stage;

/// Ordering findings for a move from `current` to `target`.
/// `target` must already be a declared stage.
pub fn evaluate(stages: &[Stage], current: Option<&str>, target: &str) -> Vec<Finding> {
    let position = |id: &str| stages.iter().position(|s| s.id == id);
    let (Some(from), Some(to)) = (current.and_then(position), position(target)) else {
        return Vec::new();
    };
    let current = stages[from].id.as_str();

    if to < from {
        return vec![Finding {
            kind: ViolationKind::StageRegression,
            message: format!("cannot move back from stage {} to {}", current, target),
        }];
    }
    if to > from + 1 {
        let skipped: Vec<&str> = stages[from + 1..to].iter().map(|s| s.id.as_str()).collect();
        return vec![Finding {
            kind: ViolationKind::StageSkipped,
            message: format!(
                "stage {} → {} skips {} (next allowed: {})",
                current,
                target,
                skipped.join(", "),
                stages[from + 1].id
            ),
        }];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stages(ids: &[&str]) -> Vec<Stage> {
        ids.iter()
            .map(|id| Stage {
                id: id.to_string(),
                name: None,
                agents: vec![],
            })
            .collect()
    }

    #[test]
    fn test_forward_by_one_and_same_stage_are_allowed() {
        let stages = stages(&["discovery", "design", "delivery"]);
        assert!(evaluate(&stages, Some("discovery"), "design").is_empty());
        assert!(evaluate(&stages, Some("design"), "design").is_empty());
        assert!(evaluate(&stages, None, "delivery").is_empty());
    }

    #[test]
    fn test_backward_and_skipping_moves_are_findings() {
        let stages = stages(&["discovery", "design", "delivery"]);

        let back = evaluate(&stages, Some("delivery"), "discovery");
        assert_eq!(back[0].kind, ViolationKind::StageRegression);

        let skip = evaluate(&stages, Some("discovery"), "delivery");
        assert_eq!(skip[0].kind, ViolationKind::StageSkipped);
        assert_eq!(
            skip[0].message,
            "stage discovery → delivery skips design (next allowed: design)"
        );
    }

    #[test]
    fn test_undeclared_current_stage_allows_any_move() {
        let stages = stages(&["discovery", "design"]);
        assert!(evaluate(&stages, Some("legacy"), "discovery").is_empty());
    }
}
