//! Product phase state machine.
//!
//! Every product moves through the same phases. Moves are looked up in a
//! transition table keyed by the current phase and an event; some moves are
//! additionally guarded by what the package manager has observed. Anything
//! not in the table is rejected, which keeps products from skipping ahead.

use std::fmt;

use crate::controller::Error;
use crate::crd::StatusPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseEvent {
    /// First reconcile of a product
    Begin,
    /// Product namespace exists and is active
    NamespaceReady,
    /// A subscription for the package is already present
    SubscriptionFound,
    /// Subscription was requested from the package manager
    SubscriptionCreated,
    /// The generated install plan reports `Complete`
    InstallPlanComplete,
    /// Product components were written
    ComponentsCreated,
    /// Product components report ready
    ComponentsReady,
    /// Unrecoverable error
    Failure,
    /// Start over after a failure
    Retry,
    /// The owning installation is being deleted
    DeletionRequested,
    /// Product resources are gone
    CleanupFinished,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseEvent::Begin => "Begin",
            PhaseEvent::NamespaceReady => "NamespaceReady",
            PhaseEvent::SubscriptionFound => "SubscriptionFound",
            PhaseEvent::SubscriptionCreated => "SubscriptionCreated",
            PhaseEvent::InstallPlanComplete => "InstallPlanComplete",
            PhaseEvent::ComponentsCreated => "ComponentsCreated",
            PhaseEvent::ComponentsReady => "ComponentsReady",
            PhaseEvent::Failure => "Failure",
            PhaseEvent::Retry => "Retry",
            PhaseEvent::DeletionRequested => "DeletionRequested",
            PhaseEvent::CleanupFinished => "CleanupFinished",
        };
        write!(f, "{}", name)
    }
}

/// Facts a transition may depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observed {
    pub subscription_exists: bool,
    pub install_plan_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    SubscriptionExists,
    InstallPlanComplete,
}

impl Guard {
    fn check(&self, observed: &Observed) -> Result<(), &'static str> {
        match self {
            Guard::SubscriptionExists if !observed.subscription_exists => {
                Err("no subscription exists for the package")
            }
            Guard::InstallPlanComplete if !observed.install_plan_complete => {
                Err("install plan is not complete")
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct Transition {
    pub from: StatusPhase,
    pub to: StatusPhase,
    pub event: PhaseEvent,
    pub guard: Option<Guard>,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: StatusPhase,
        to: StatusPhase,
        event: PhaseEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            guard: None,
            description,
        }
    }

    fn guarded(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }
}

#[derive(Debug, PartialEq)]
pub enum TransitionResult {
    Success {
        from: StatusPhase,
        to: StatusPhase,
        description: &'static str,
    },
    InvalidTransition {
        current: StatusPhase,
        event: PhaseEvent,
    },
    GuardFailed {
        from: StatusPhase,
        to: StatusPhase,
        reason: &'static str,
    },
}

const PROGRESSING: [StatusPhase; 6] = [
    StatusPhase::None,
    StatusPhase::AwaitingNamespace,
    StatusPhase::CreatingSubscription,
    StatusPhase::AwaitingOperator,
    StatusPhase::CreatingComponents,
    StatusPhase::InProgress,
];

pub struct PhaseMachine {
    transitions: Vec<Transition>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        use PhaseEvent as E;
        use StatusPhase as P;

        let mut transitions = vec![
            Transition::new(P::None, P::AwaitingNamespace, E::Begin, "Product accepted"),
            Transition::new(
                P::AwaitingNamespace,
                P::CreatingSubscription,
                E::NamespaceReady,
                "Namespace is active",
            ),
            Transition::new(
                P::AwaitingNamespace,
                P::AwaitingOperator,
                E::SubscriptionFound,
                "Namespace is active and the subscription already exists",
            )
            .guarded(Guard::SubscriptionExists),
            Transition::new(
                P::CreatingSubscription,
                P::AwaitingOperator,
                E::SubscriptionCreated,
                "Subscription requested",
            ),
            Transition::new(
                P::CreatingSubscription,
                P::CreatingComponents,
                E::InstallPlanComplete,
                "Operator installed",
            )
            .guarded(Guard::InstallPlanComplete),
            Transition::new(
                P::AwaitingOperator,
                P::CreatingComponents,
                E::InstallPlanComplete,
                "Operator installed",
            )
            .guarded(Guard::InstallPlanComplete),
            Transition::new(
                P::CreatingComponents,
                P::InProgress,
                E::ComponentsCreated,
                "Components written",
            ),
            Transition::new(
                P::InProgress,
                P::Completed,
                E::ComponentsReady,
                "Product ready",
            ),
            Transition::new(P::Failed, P::AwaitingNamespace, E::Retry, "Retrying"),
            Transition::new(
                P::Completed,
                P::DeleteInProgress,
                E::DeletionRequested,
                "Installation deleted",
            ),
            Transition::new(
                P::Failed,
                P::DeleteInProgress,
                E::DeletionRequested,
                "Installation deleted",
            ),
            Transition::new(
                P::DeleteInProgress,
                P::Completed,
                E::CleanupFinished,
                "Product removed",
            ),
        ];

        for from in PROGRESSING {
            transitions.push(Transition::new(from, P::Failed, E::Failure, "Product failed"));
            transitions.push(Transition::new(
                from,
                P::DeleteInProgress,
                E::DeletionRequested,
                "Installation deleted",
            ));
        }

        Self { transitions }
    }

    pub fn try_transition(
        &self,
        current: StatusPhase,
        event: PhaseEvent,
        observed: &Observed,
    ) -> TransitionResult {
        let Some(transition) = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        else {
            return TransitionResult::InvalidTransition { current, event };
        };

        if let Some(guard) = transition.guard {
            if let Err(reason) = guard.check(observed) {
                return TransitionResult::GuardFailed {
                    from: transition.from,
                    to: transition.to,
                    reason,
                };
            }
        }

        TransitionResult::Success {
            from: transition.from,
            to: transition.to,
            description: transition.description,
        }
    }

    /// Apply `event`, returning the new phase. A failed guard keeps the
    /// current phase; an event with no transition is an error.
    pub fn fire(
        &self,
        current: StatusPhase,
        event: PhaseEvent,
        observed: &Observed,
    ) -> Result<StatusPhase, Error> {
        match self.try_transition(current, event, observed) {
            TransitionResult::Success { to, .. } => Ok(to),
            TransitionResult::GuardFailed { .. } => Ok(current),
            TransitionResult::InvalidTransition { current, event } => {
                Err(Error::InvalidTransition {
                    from: current,
                    event,
                })
            }
        }
    }

    pub fn valid_events(&self, current: StatusPhase) -> Vec<PhaseEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == current)
            .map(|t| t.event)
            .collect()
    }
}
