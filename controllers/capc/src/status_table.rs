//! Provider instance status dispatch.
//!
//! One table maps the instance status reported by Contabo (plus the phase
//! the machine is already in) onto the next machine phase, the requeue
//! delay and the side effect the reconciler must perform.

use contabo_client::InstanceStatus;
use std::time::Duration;

/// Machine lifecycle phase, stored as the `InstanceReady` condition reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotCreated,
    Creating,
    Provisioning,
    Installing,
    Booting,
    Bootstrapping,
    Ready,
    Failed,
}

impl Phase {
    pub fn as_reason(&self) -> &'static str {
        match self {
            Phase::NotCreated => "InstanceNotCreated",
            Phase::Creating => "InstanceCreating",
            Phase::Provisioning => "InstanceProvisioning",
            Phase::Installing => "InstanceInstalling",
            Phase::Booting => "InstanceBooting",
            Phase::Bootstrapping => "InstanceBootstrapping",
            Phase::Ready => "InstanceReady",
            Phase::Failed => "InstanceFailed",
        }
    }

    pub fn from_reason(reason: &str) -> Option<Phase> {
        [
            Phase::NotCreated,
            Phase::Creating,
            Phase::Provisioning,
            Phase::Installing,
            Phase::Booting,
            Phase::Bootstrapping,
            Phase::Ready,
            Phase::Failed,
        ]
        .into_iter()
        .find(|p| p.as_reason() == reason)
    }
}

/// Side effect attached to a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Record the phase and requeue
    Wait,
    /// Attach the instance to the cluster and extra private networks
    AttachNetworks,
    /// First `running` observation; give the guest one interval to boot
    Boot,
    /// Clean up routes and check cloud-init over SSH
    Bootstrap,
    /// Power the instance back on
    Start,
    /// Terminal provider state; hand over to failure recovery
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub phase: Phase,
    pub requeue: Duration,
    pub action: StatusAction,
}

const fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Statuses the provider never leaves without operator intervention
pub fn is_terminal(status: InstanceStatus) -> bool {
    matches!(
        status,
        InstanceStatus::Error
            | InstanceStatus::ProductNotAvailable
            | InstanceStatus::VerificationRequired
            | InstanceStatus::PendingPayment
    )
}

/// Phase kept while the provider reports a status that says nothing new;
/// readiness is never kept when the instance is not running
fn held(current: Option<Phase>) -> Phase {
    match current {
        None | Some(Phase::Ready) => Phase::Provisioning,
        Some(phase) => phase,
    }
}

pub fn transition_for(status: InstanceStatus, current: Option<Phase>) -> Transition {
    use InstanceStatus as S;
    use StatusAction as A;

    let (phase, requeue, action) = match status {
        S::Creating => (Phase::Creating, secs(10), A::Wait),
        S::Provisioning => (Phase::Provisioning, secs(15), A::Wait),
        S::Installing => (Phase::Installing, secs(15), A::AttachNetworks),
        S::Running => match current {
            Some(Phase::Booting) | Some(Phase::Bootstrapping) => {
                (Phase::Bootstrapping, secs(5), A::Bootstrap)
            }
            Some(Phase::Ready) => (Phase::Ready, secs(300), A::Wait),
            _ => (Phase::Booting, secs(10), A::Boot),
        },
        // Power-on goes through boot and cloud-init again
        S::Stopped => (Phase::Provisioning, secs(20), A::Start),
        S::Error => (Phase::Failed, secs(60), A::Fail),
        S::ProductNotAvailable | S::VerificationRequired => (Phase::Failed, secs(300), A::Fail),
        S::PendingPayment => (Phase::Failed, secs(300), A::Fail),
        S::ManualProvisioning => (Phase::Provisioning, secs(300), A::Wait),
        S::Rescue => (held(current), secs(60), A::Wait),
        S::ResetPassword => (held(current), secs(30), A::Wait),
        S::Uninstalled => (Phase::Provisioning, secs(30), A::Wait),
        S::Unknown | S::Other => (held(current), secs(60), A::Wait),
    };

    Transition { phase, requeue, action }
}
