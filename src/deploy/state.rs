// deploy/state.rs — the deployment state machine.
//
// pending → uploading → analyzing → building → deploying → active
// with `failed` reachable from any non-terminal state and `expired`
// reachable from `active` on TTL. Transitions are one-directional; the
// webhook reconciler and the status poller both advance through the same
// pure function, which makes duplicate delivery a no-op by construction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Uploading,
    Analyzing,
    Building,
    Deploying,
    Active,
    Failed,
    Expired,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Analyzing => "analyzing",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Expired)
    }

    /// Position in the forward progression. Terminal states have no rank.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Uploading => Some(1),
            Self::Analyzing => Some(2),
            Self::Building => Some(3),
            Self::Deploying => Some(4),
            Self::Active => Some(5),
            Self::Failed | Self::Expired => None,
        }
    }

    /// True if moving from `self` to `next` goes forward.
    pub fn can_advance_to(&self, next: DeploymentStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(cur), Some(nxt)) => nxt > cur,
            // Any non-terminal state may terminate.
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "analyzing" => Ok(Self::Analyzing),
            "building" => Ok(Self::Building),
            "deploying" => Ok(Self::Deploying),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown deployment status '{other}'")),
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Build executor event kinds ───────────────────────────────────────────────

/// Status kinds the build executor reports. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildEventStatus {
    Pending,
    Queued,
    Working,
    Success,
    Failure,
    InternalError,
    Timeout,
    Cancelled,
    Expired,
}

impl BuildEventStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "QUEUED" => Some(Self::Queued),
            "WORKING" => Some(Self::Working),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            "INTERNAL_ERROR" => Some(Self::InternalError),
            "TIMEOUT" => Some(Self::Timeout),
            "CANCELLED" => Some(Self::Cancelled),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failure | Self::InternalError | Self::Timeout | Self::Cancelled | Self::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Working => "WORKING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

// ─── Pure transition function ─────────────────────────────────────────────────

/// What a build event means for a deployment in a given state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Apply this transition.
    To(DeploymentStatus),
    /// Terminate with this error message.
    Fail(String),
    /// Duplicate or out-of-order event; acknowledge and do nothing.
    Noop,
    /// Event for a deployment already in a terminal state; log and drop.
    Discard,
}

/// Decide the transition for a build-lifecycle event.
///
/// An event is accepted only if it advances or terminates the current
/// state; duplicates and retrograde events are no-ops. This is the single
/// arbiter shared by the webhook reconciler and the status poller.
pub fn apply_build_event(current: DeploymentStatus, event: BuildEventStatus) -> Advance {
    if current.is_terminal() {
        return Advance::Discard;
    }
    if event.is_failure() {
        return Advance::Fail(format!("build ended with status {}", event.as_str()));
    }
    let target = match event {
        // Queued/working means the executor has the build; anything still
        // upstream of `building` catches up.
        BuildEventStatus::Pending | BuildEventStatus::Queued | BuildEventStatus::Working => {
            DeploymentStatus::Building
        }
        BuildEventStatus::Success => DeploymentStatus::Deploying,
        _ => return Advance::Noop,
    };
    if current.can_advance_to(target) {
        Advance::To(target)
    } else {
        Advance::Noop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::*;

    #[test]
    fn progression_is_one_directional() {
        assert!(Pending.can_advance_to(Uploading));
        assert!(Uploading.can_advance_to(Analyzing));
        assert!(Analyzing.can_advance_to(Building));
        assert!(Building.can_advance_to(Deploying));
        assert!(Deploying.can_advance_to(Active));
        assert!(!Active.can_advance_to(Deploying));
        assert!(!Deploying.can_advance_to(Building));
        assert!(!Building.can_advance_to(Building));
    }

    #[test]
    fn any_non_terminal_state_may_terminate() {
        for s in [Pending, Uploading, Analyzing, Building, Deploying, Active] {
            assert!(s.can_advance_to(Failed));
        }
        assert!(!Failed.can_advance_to(Active));
        assert!(!Expired.can_advance_to(Failed));
    }

    #[test]
    fn success_advances_building_to_deploying() {
        assert_eq!(
            apply_build_event(Building, BuildEventStatus::Success),
            Advance::To(Deploying)
        );
    }

    #[test]
    fn duplicate_success_is_noop() {
        assert_eq!(
            apply_build_event(Deploying, BuildEventStatus::Success),
            Advance::Noop
        );
        assert_eq!(
            apply_build_event(Active, BuildEventStatus::Success),
            Advance::Noop
        );
    }

    #[test]
    fn working_catches_a_lagging_record_up() {
        assert_eq!(
            apply_build_event(Analyzing, BuildEventStatus::Working),
            Advance::To(Building)
        );
        assert_eq!(
            apply_build_event(Building, BuildEventStatus::Working),
            Advance::Noop
        );
    }

    #[test]
    fn failure_terminates_any_non_terminal_state() {
        for s in [Pending, Uploading, Analyzing, Building, Deploying, Active] {
            assert!(matches!(
                apply_build_event(s, BuildEventStatus::Timeout),
                Advance::Fail(_)
            ));
        }
    }

    #[test]
    fn events_for_terminal_states_are_discarded() {
        assert_eq!(
            apply_build_event(Failed, BuildEventStatus::Success),
            Advance::Discard
        );
        assert_eq!(
            apply_build_event(Expired, BuildEventStatus::Failure),
            Advance::Discard
        );
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [Pending, Uploading, Analyzing, Building, Deploying, Active, Failed, Expired] {
            assert_eq!(s.as_str().parse::<DeploymentStatus>().unwrap(), s);
        }
    }
}
