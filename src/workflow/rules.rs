use crate::store::models::EpicStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPermission {
    Allowed,
    /// Forbidden by the table outright.
    Denied(String),
    /// Forbidden only because backward transitions are disabled.
    DeniedBackward(String),
}

/// The one transition the backward policy may relax: restarting an
/// in-progress epic back to Planned. InProgress ↔ OnHold is never
/// considered backward, and nothing leaves a terminal state.
fn is_relaxable_backward(from: EpicStatus, to: EpicStatus) -> bool {
    from == EpicStatus::InProgress && to == EpicStatus::Planned
}

/// Transitions permitted by the table regardless of policy.
fn table_allows(from: EpicStatus, to: EpicStatus) -> bool {
    use EpicStatus::*;

    matches!(
        (from, to),
        (Planned, InProgress)
            | (Planned, OnHold)
            | (Planned, Cancelled)
            | (InProgress, OnHold)
            | (InProgress, Completed)
            | (InProgress, Cancelled)
            | (OnHold, InProgress)
            | (OnHold, Cancelled)
            | (Cancelled, Planned)
    )
}

/// Validate a status transition against the table and the backward policy.
///
/// Transitions to Cancelled are permitted from any non-terminal state no
/// matter the policy; enabling `allow_backward` additionally admits the
/// InProgress → Planned restart and nothing else.
pub fn can_transition(
    from: EpicStatus,
    to: EpicStatus,
    allow_backward: bool,
) -> TransitionPermission {
    if from == to {
        return TransitionPermission::Allowed;
    }

    if table_allows(from, to) {
        return TransitionPermission::Allowed;
    }

    if to == EpicStatus::Cancelled && !from.is_terminal() {
        return TransitionPermission::Allowed;
    }

    if is_relaxable_backward(from, to) {
        if allow_backward {
            return TransitionPermission::Allowed;
        }
        return TransitionPermission::DeniedBackward(format!(
            "backward transition from {} to {} is disabled",
            from, to
        ));
    }

    TransitionPermission::Denied(format!(
        "transition from {} to {} is not allowed",
        from, to
    ))
}
