//! Observing State Machine
//!
//! Defines the observing states of a device, the triggers that move between
//! them, and a thread-safe machine that rejects undeclared transitions.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Coarse lifecycle phase of a device's data-taking activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObsState {
    Idle,
    Configuring,
    Ready,
    Scanning,
    Aborting,
    Aborted,
    Fault,
}

impl ObsState {
    pub const ALL: [ObsState; 7] = [
        ObsState::Idle,
        ObsState::Configuring,
        ObsState::Ready,
        ObsState::Scanning,
        ObsState::Aborting,
        ObsState::Aborted,
        ObsState::Fault,
    ];

    /// Upper-case name published on the `obsState` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            ObsState::Idle => "IDLE",
            ObsState::Configuring => "CONFIGURING",
            ObsState::Ready => "READY",
            ObsState::Scanning => "SCANNING",
            ObsState::Aborting => "ABORTING",
            ObsState::Aborted => "ABORTED",
            ObsState::Fault => "FAULT",
        }
    }
}

impl fmt::Display for ObsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named events that drive observing state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObsTrigger {
    ConfigureStarted,
    ConfigureSucceeded,
    ConfigureFailed,
    /// Undo a configure whose input was rejected, back to IDLE
    ConfigureRejectedToIdle,
    /// Undo a configure whose input was rejected, back to READY
    ConfigureRejectedToReady,
    EndSucceeded,
    ScanStarted,
    ScanSucceeded,
    ScanFailed,
    ScanRejected,
    AbortStarted,
    AbortSucceeded,
    AbortFailed,
    ResetSucceeded,
    ResetFailed,
    FatalError,
}

impl ObsTrigger {
    /// Snake-case trigger name used in logs
    pub fn name(self) -> &'static str {
        match self {
            ObsTrigger::ConfigureStarted => "configure_started",
            ObsTrigger::ConfigureSucceeded => "configure_succeeded",
            ObsTrigger::ConfigureFailed => "configure_failed",
            ObsTrigger::ConfigureRejectedToIdle => "configure_rejected_to_idle",
            ObsTrigger::ConfigureRejectedToReady => "configure_rejected_to_ready",
            ObsTrigger::EndSucceeded => "end_succeeded",
            ObsTrigger::ScanStarted => "scan_started",
            ObsTrigger::ScanSucceeded => "scan_succeeded",
            ObsTrigger::ScanFailed => "scan_failed",
            ObsTrigger::ScanRejected => "scan_rejected",
            ObsTrigger::AbortStarted => "abort_started",
            ObsTrigger::AbortSucceeded => "abort_succeeded",
            ObsTrigger::AbortFailed => "abort_failed",
            ObsTrigger::ResetSucceeded => "reset_succeeded",
            ObsTrigger::ResetFailed => "reset_failed",
            ObsTrigger::FatalError => "fatal_error",
        }
    }
}

impl fmt::Display for ObsTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors occurring during state transitions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("Undeclared transition: {trigger} from {from}")]
    UndeclaredTransition { from: ObsState, trigger: ObsTrigger },

    #[error("Conflicting transition: {trigger} from {from} declared to both {first} and {second}")]
    ConflictingTransition {
        from: ObsState,
        trigger: ObsTrigger,
        first: ObsState,
        second: ObsState,
    },
}

/// Source side of a transition declaration
#[derive(Debug, Clone, Copy)]
pub enum Source {
    /// Valid from every state
    Any,
    States(&'static [ObsState]),
}

/// One declared transition: source states, trigger and destination
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub source: Source,
    pub trigger: ObsTrigger,
    pub dest: ObsState,
}

const fn from(states: &'static [ObsState], trigger: ObsTrigger, dest: ObsState) -> Transition {
    Transition {
        source: Source::States(states),
        trigger,
        dest,
    }
}

/// Declared transitions of the observing state machine
pub const OBSERVING_TRANSITIONS: &[Transition] = {
    use ObsState::*;
    use ObsTrigger::*;
    &[
        from(&[Idle, Ready], ConfigureStarted, Configuring),
        from(&[Configuring], ConfigureSucceeded, Ready),
        from(&[Configuring], ConfigureFailed, Fault),
        from(&[Configuring], ConfigureRejectedToIdle, Idle),
        from(&[Configuring], ConfigureRejectedToReady, Ready),
        from(&[Ready, Idle], EndSucceeded, Idle),
        from(&[Ready], ScanStarted, Scanning),
        from(&[Scanning], ScanSucceeded, Ready),
        from(&[Scanning], ScanFailed, Fault),
        from(&[Scanning], ScanRejected, Ready),
        from(&[Configuring, Ready, Scanning, Idle], AbortStarted, Aborting),
        from(&[Aborting], AbortSucceeded, Aborted),
        from(&[Aborting], AbortFailed, Fault),
        from(&[Aborted, Fault], ResetSucceeded, Idle),
        from(&[Aborted, Fault], ResetFailed, Fault),
        Transition {
            source: Source::Any,
            trigger: FatalError,
            dest: Fault,
        },
    ]
};

/// Fully expanded `(state, trigger) -> destination` table
#[derive(Debug, Clone)]
pub struct TransitionTable {
    table: HashMap<(ObsState, ObsTrigger), ObsState>,
}

impl TransitionTable {
    /// Expand declarations into a lookup table
    ///
    /// Wildcard sources become one entry per state. A pair declared twice
    /// with different destinations is rejected.
    pub fn build(declarations: &[Transition]) -> Result<Self, StateError> {
        let mut table = HashMap::new();

        for decl in declarations {
            let sources: &[ObsState] = match decl.source {
                Source::Any => &ObsState::ALL,
                Source::States(states) => states,
            };

            for &source in sources {
                match table.insert((source, decl.trigger), decl.dest) {
                    Some(existing) if existing != decl.dest => {
                        return Err(StateError::ConflictingTransition {
                            from: source,
                            trigger: decl.trigger,
                            first: existing,
                            second: decl.dest,
                        });
                    }
                    _ => {}
                }
            }
        }

        Ok(Self { table })
    }

    /// The standard observing transition table
    pub fn observing() -> Result<Self, StateError> {
        Self::build(OBSERVING_TRANSITIONS)
    }

    /// Destination of `trigger` from `from`, if declared
    pub fn destination(&self, from: ObsState, trigger: ObsTrigger) -> Option<ObsState> {
        self.table.get(&(from, trigger)).copied()
    }

    /// All triggers declared from a state
    pub fn triggers_from(&self, from: ObsState) -> Vec<ObsTrigger> {
        self.table
            .keys()
            .filter(|(source, _)| *source == from)
            .map(|(_, trigger)| *trigger)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Callback fired with the new state after every successful transition
pub type StateCallback = Box<dyn Fn(ObsState) + Send + Sync>;

/// Thread-safe observing state machine
///
/// Triggers are serialized; the state-change callback runs while the machine
/// is locked, so it must not fire triggers on the same machine.
pub struct ObservingStateMachine {
    table: TransitionTable,
    state: Mutex<ObsState>,
    callback: Option<StateCallback>,
}

impl fmt::Debug for ObservingStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservingStateMachine")
            .field("state", &*self.state.lock())
            .field("transitions", &self.table.len())
            .finish()
    }
}

impl ObservingStateMachine {
    /// Create a machine in IDLE using the standard observing table
    pub fn new(callback: Option<StateCallback>) -> Result<Self, StateError> {
        Ok(Self::with_table(TransitionTable::observing()?, ObsState::Idle, callback))
    }

    /// Create a machine from an explicit table and initial state
    pub fn with_table(table: TransitionTable, initial: ObsState, callback: Option<StateCallback>) -> Self {
        Self {
            table,
            state: Mutex::new(initial),
            callback,
        }
    }

    /// Get current state
    pub fn state(&self) -> ObsState {
        *self.state.lock()
    }

    /// Fire a trigger, returning the new state
    pub fn trigger(&self, trigger: ObsTrigger) -> Result<ObsState, StateError> {
        self.transition(trigger).map(|(_, dest)| dest)
    }

    /// Fire a trigger, returning `(from, dest)` as seen under one lock
    pub fn transition(&self, trigger: ObsTrigger) -> Result<(ObsState, ObsState), StateError> {
        let mut state = self.state.lock();
        let from = *state;
        let dest = self
            .table
            .destination(from, trigger)
            .ok_or(StateError::UndeclaredTransition { from, trigger })?;

        *state = dest;
        debug!("[OBS] {} -> {} ({})", from, dest, trigger);

        if let Some(callback) = &self.callback {
            callback(dest);
        }

        Ok((from, dest))
    }

    /// Whether `trigger` is declared from the current state
    pub fn may_trigger(&self, trigger: ObsTrigger) -> bool {
        self.table.destination(self.state(), trigger).is_some()
    }

    /// Destination of `trigger` from an arbitrary state
    pub fn destination(&self, from: ObsState, trigger: ObsTrigger) -> Option<ObsState> {
        self.table.destination(from, trigger)
    }

    /// All triggers declared from a state
    pub fn triggers_from(&self, from: ObsState) -> Vec<ObsTrigger> {
        self.table.triggers_from(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_machine() -> (ObservingStateMachine, Arc<Mutex<Vec<ObsState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let fsm = ObservingStateMachine::new(Some(Box::new(move |state| sink.lock().push(state))))
            .expect("observing table is consistent");
        (fsm, seen)
    }

    #[test]
    fn test_initial_state() {
        let (fsm, seen) = counting_machine();
        assert_eq!(fsm.state(), ObsState::Idle);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_normal_observation_flow() {
        let (fsm, seen) = counting_machine();

        assert_eq!(fsm.trigger(ObsTrigger::ConfigureStarted), Ok(ObsState::Configuring));
        assert_eq!(fsm.trigger(ObsTrigger::ConfigureSucceeded), Ok(ObsState::Ready));
        assert_eq!(fsm.trigger(ObsTrigger::ScanStarted), Ok(ObsState::Scanning));
        assert_eq!(fsm.trigger(ObsTrigger::ScanSucceeded), Ok(ObsState::Ready));
        assert_eq!(fsm.trigger(ObsTrigger::EndSucceeded), Ok(ObsState::Idle));

        assert_eq!(
            *seen.lock(),
            vec![
                ObsState::Configuring,
                ObsState::Ready,
                ObsState::Scanning,
                ObsState::Ready,
                ObsState::Idle
            ]
        );
    }

    #[test]
    fn test_every_declared_pair_lands_on_dest() {
        let table = TransitionTable::observing().unwrap();

        for from_state in ObsState::ALL {
            for trigger in table.triggers_from(from_state) {
                let calls = Arc::new(AtomicUsize::new(0));
                let counter = calls.clone();
                let fsm = ObservingStateMachine::with_table(
                    table.clone(),
                    from_state,
                    Some(Box::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })),
                );

                let expected = table.destination(from_state, trigger).unwrap();
                assert_eq!(fsm.trigger(trigger), Ok(expected));
                assert_eq!(fsm.state(), expected);
                assert_eq!(calls.load(Ordering::SeqCst), 1);
            }
        }
    }

    #[test]
    fn test_undeclared_transition_is_error() {
        let (fsm, seen) = counting_machine();

        let result = fsm.trigger(ObsTrigger::ScanStarted);
        assert_eq!(
            result,
            Err(StateError::UndeclaredTransition {
                from: ObsState::Idle,
                trigger: ObsTrigger::ScanStarted
            })
        );
        assert_eq!(fsm.state(), ObsState::Idle);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_fatal_error_from_any_state() {
        let table = TransitionTable::observing().unwrap();
        for state in ObsState::ALL {
            assert_eq!(table.destination(state, ObsTrigger::FatalError), Some(ObsState::Fault));
        }
    }

    #[test]
    fn test_end_from_idle_is_noop_normalization() {
        let (fsm, seen) = counting_machine();
        assert_eq!(fsm.trigger(ObsTrigger::EndSucceeded), Ok(ObsState::Idle));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_transition_reports_source_and_dest() {
        let (fsm, seen) = counting_machine();
        fsm.trigger(ObsTrigger::ConfigureStarted).unwrap();
        fsm.trigger(ObsTrigger::ConfigureSucceeded).unwrap();

        assert_eq!(
            fsm.transition(ObsTrigger::ConfigureStarted),
            Ok((ObsState::Ready, ObsState::Configuring))
        );
        assert_eq!(
            fsm.transition(ObsTrigger::ScanStarted),
            Err(StateError::UndeclaredTransition {
                from: ObsState::Configuring,
                trigger: ObsTrigger::ScanStarted,
            })
        );
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn test_abort_and_reset() {
        let (fsm, _) = counting_machine();
        fsm.trigger(ObsTrigger::ConfigureStarted).unwrap();
        fsm.trigger(ObsTrigger::AbortStarted).unwrap();
        assert!(!fsm.may_trigger(ObsTrigger::ConfigureSucceeded));
        fsm.trigger(ObsTrigger::AbortSucceeded).unwrap();
        assert_eq!(fsm.state(), ObsState::Aborted);
        assert_eq!(fsm.trigger(ObsTrigger::ResetSucceeded), Ok(ObsState::Idle));
    }

    #[test]
    fn test_conflicting_declarations_rejected() {
        let decls = [
            from(&[ObsState::Idle], ObsTrigger::EndSucceeded, ObsState::Idle),
            from(&[ObsState::Idle], ObsTrigger::EndSucceeded, ObsState::Ready),
        ];
        assert!(matches!(
            TransitionTable::build(&decls),
            Err(StateError::ConflictingTransition { .. })
        ));
    }

    #[test]
    fn test_concurrent_triggers_are_serialized() {
        let (fsm, seen) = counting_machine();
        let fsm = Arc::new(fsm);

        // Only one of the racing configure_started calls can succeed from IDLE
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fsm = fsm.clone();
                std::thread::spawn(move || fsm.trigger(ObsTrigger::ConfigureStarted).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(fsm.state(), ObsState::Configuring);
        assert_eq!(seen.lock().len(), 1);
    }
}
