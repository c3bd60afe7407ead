//! Ordering gate over an approval chain.
//!
//! A step may be approved only when every step with a strictly lower order is
//! approved. Head-approval steps count like any other step here even though
//! requester-facing views hide them.

use crate::domain::course::StepDefinitionId;
use crate::domain::enrollment::ApprovalStepInstance;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    Blocked { waiting_on: Vec<StepDefinitionId> },
    UnknownStep,
}

pub fn evaluate(chain: &[ApprovalStepInstance], step: &StepDefinitionId) -> GateDecision {
    let Some(target) = chain.iter().find(|instance| &instance.step_definition_id == step) else {
        return GateDecision::UnknownStep;
    };

    let waiting_on = chain
        .iter()
        .filter(|instance| instance.step_order < target.step_order && !instance.is_approved())
        .map(|instance| instance.step_definition_id.clone())
        .collect::<Vec<_>>();

    if waiting_on.is_empty() {
        GateDecision::Open
    } else {
        GateDecision::Blocked { waiting_on }
    }
}

pub fn can_approve(chain: &[ApprovalStepInstance], step: &StepDefinitionId) -> bool {
    evaluate(chain, step) == GateDecision::Open
}

/// The lowest-order step still awaiting a decision, or `None` once the chain
/// is fully approved or any step was rejected.
pub fn next_actionable(chain: &[ApprovalStepInstance]) -> Option<&ApprovalStepInstance> {
    if chain.iter().any(ApprovalStepInstance::is_rejected) {
        return None;
    }
    chain.iter().filter(|instance| !instance.is_approved()).min_by_key(|instance| instance.step_order)
}

#[cfg(test)]
mod tests {
    use super::{can_approve, evaluate, next_actionable, GateDecision};
    use crate::domain::course::StepDefinitionId;
    use crate::domain::enrollment::{
        ApprovalStepInstance, EnrollmentId, StepInstanceId, StepState,
    };

    fn instance(id: &str, order: i32, state: StepState) -> ApprovalStepInstance {
        ApprovalStepInstance {
            id: StepInstanceId(format!("STP-{id}")),
            enrollment_id: EnrollmentId("E-1".to_owned()),
            step_definition_id: StepDefinitionId(id.to_owned()),
            step_order: order,
            is_head_approval: order == 1,
            is_final_approval: order == 3,
            required_role_id: None,
            state,
            approved_by: None,
            approved_at: None,
            comments: None,
        }
    }

    fn step(id: &str) -> StepDefinitionId {
        StepDefinitionId(id.to_owned())
    }

    #[test]
    fn first_step_is_always_open() {
        let chain = vec![
            instance("S-1", 1, StepState::Unapproved),
            instance("S-2", 2, StepState::Unapproved),
        ];
        assert!(can_approve(&chain, &step("S-1")));
    }

    #[test]
    fn any_unapproved_predecessor_blocks_every_later_step() {
        for k in 2..=5 {
            let chain = (1..=5)
                .map(|order| {
                    let state =
                        if order == k - 1 { StepState::Unapproved } else { StepState::Approved };
                    instance(&format!("S-{order}"), order, state)
                })
                .collect::<Vec<_>>();

            for target in k..=5 {
                assert_eq!(
                    evaluate(&chain, &step(&format!("S-{target}"))),
                    GateDecision::Blocked { waiting_on: vec![step(&format!("S-{}", k - 1))] },
                    "step {target} must wait for step {}",
                    k - 1
                );
            }
            for target in 1..k {
                assert!(can_approve(&chain, &step(&format!("S-{target}"))));
            }
        }
    }

    #[test]
    fn head_approval_steps_gate_like_any_other() {
        let chain = vec![
            instance("HEAD", 1, StepState::Unapproved),
            instance("S-2", 2, StepState::Unapproved),
        ];
        assert!(chain[0].is_head_approval);
        assert!(!can_approve(&chain, &step("S-2")));
    }

    #[test]
    fn gate_ignores_insertion_order() {
        let chain = vec![
            instance("S-3", 3, StepState::Unapproved),
            instance("S-1", 1, StepState::Approved),
            instance("S-2", 2, StepState::Approved),
        ];
        assert!(can_approve(&chain, &step("S-3")));
    }

    #[test]
    fn unknown_step_is_reported() {
        let chain = vec![instance("S-1", 1, StepState::Unapproved)];
        assert_eq!(evaluate(&chain, &step("S-9")), GateDecision::UnknownStep);
        assert!(!can_approve(&chain, &step("S-9")));
    }

    #[test]
    fn next_actionable_is_lowest_unapproved_until_rejection() {
        let mut chain = vec![
            instance("S-2", 2, StepState::Unapproved),
            instance("S-1", 1, StepState::Approved),
            instance("S-3", 3, StepState::Unapproved),
        ];
        assert_eq!(next_actionable(&chain).map(|s| s.step_order), Some(2));

        chain[0].state = StepState::Rejected;
        assert_eq!(next_actionable(&chain), None);

        let done = vec![instance("S-1", 1, StepState::Approved)];
        assert_eq!(next_actionable(&done), None);
    }
}
