//! Allowed-transition graphs for the state-machine controllers.

use indexmap::{IndexMap, IndexSet};

pub const DISABLED: &str = "Disabled";
pub const DISABLING: &str = "Disabling";
pub const RESETTING: &str = "Resetting";
pub const READY: &str = "Ready";
pub const FAULT: &str = "Fault";

pub const EDITING: &str = "Editing";
pub const EDITABLE: &str = "Editable";
pub const SAVING: &str = "Saving";
pub const REVERTING: &str = "Reverting";
pub const LOADING: &str = "Loading";

pub const CONFIGURING: &str = "Configuring";
pub const ARMED: &str = "Armed";
pub const RUNNING: &str = "Running";
pub const POSTRUN: &str = "PostRun";
pub const PAUSED: &str = "Paused";
pub const SEEKING: &str = "Seeking";
pub const ABORTING: &str = "Aborting";
pub const ABORTED: &str = "Aborted";

/// States in which a block is at rest.
const REST: [&str; 7] = [DISABLED, FAULT, READY, EDITABLE, ARMED, PAUSED, ABORTED];

/// A directed graph of permitted state changes.
///
/// States are kept in insertion order, which is also the order of the
/// `state` attribute's choices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateSet {
    allowed: IndexMap<&'static str, IndexSet<&'static str>>,
}

impl StateSet {
    /// Allow `from -> to` for every target.
    pub fn set_allowed(&mut self, from: &'static str, to: &[&'static str]) {
        self.allowed.entry(from).or_default().extend(to.iter().copied());
        for t in to {
            self.allowed.entry(t).or_default();
        }
    }

    /// The only permission primitive: is there an edge `from -> to`?
    pub fn transition_allowed(&self, from: &str, to: &str) -> bool {
        self.allowed
            .get(from)
            .map(|targets| targets.contains(to))
            .unwrap_or(false)
    }

    /// Every state, in the order they were first mentioned.
    pub fn possible_states(&self) -> Vec<&'static str> {
        self.allowed.keys().copied().collect()
    }

    /// States from which `to` may be entered.
    pub fn sources_of(&self, to: &str) -> Vec<&'static str> {
        self.allowed
            .iter()
            .filter(|(_, targets)| targets.contains(to))
            .map(|(from, _)| *from)
            .collect()
    }

    pub fn is_busy(&self, state: &str) -> bool {
        !REST.contains(&state)
    }

    /// The basic lifecycle: `Disabled -> Resetting -> Ready`, with Fault
    /// and Disabling reachable from everywhere but Disabled.
    pub fn stateful() -> Self {
        let mut ss = StateSet::default();
        ss.set_allowed(RESETTING, &[READY]);
        ss.set_allowed(READY, &[]);
        ss.set_allowed(FAULT, &[RESETTING, DISABLING]);
        ss.set_allowed(DISABLING, &[DISABLED]);
        ss.set_allowed(DISABLED, &[RESETTING]);
        ss.with_fault_and_disable()
    }

    /// Adds design editing and loading.
    pub fn manager() -> Self {
        let mut ss = Self::stateful();
        ss.set_allowed(READY, &[EDITING, LOADING]);
        ss.set_allowed(EDITING, &[EDITABLE]);
        ss.set_allowed(EDITABLE, &[SAVING, REVERTING]);
        ss.set_allowed(SAVING, &[READY, EDITABLE]);
        ss.set_allowed(REVERTING, &[READY, EDITABLE]);
        ss.set_allowed(LOADING, &[READY]);
        ss.with_fault_and_disable()
    }

    /// Adds configure, run, pause and abort.
    pub fn runnable() -> Self {
        let mut ss = Self::manager();
        ss.set_allowed(READY, &[CONFIGURING]);
        ss.set_allowed(CONFIGURING, &[ARMED]);
        ss.set_allowed(ARMED, &[RUNNING, SEEKING, RESETTING]);
        ss.set_allowed(RUNNING, &[POSTRUN, SEEKING]);
        ss.set_allowed(POSTRUN, &[READY, ARMED, SEEKING]);
        ss.set_allowed(SEEKING, &[ARMED, PAUSED]);
        ss.set_allowed(PAUSED, &[RUNNING, SEEKING]);
        ss.set_allowed(ABORTING, &[ABORTED]);
        ss.set_allowed(ABORTED, &[RESETTING]);
        let abortable: Vec<&'static str> = ss
            .possible_states()
            .into_iter()
            .filter(|s| ![DISABLED, DISABLING, ABORTING, ABORTED, FAULT].contains(s))
            .collect();
        for state in abortable {
            ss.set_allowed(state, &[ABORTING]);
        }
        ss.with_fault_and_disable()
    }

    fn with_fault_and_disable(mut self) -> Self {
        for state in self.possible_states() {
            if state != DISABLED {
                let targets = self.allowed.entry(state).or_default();
                if state != FAULT {
                    targets.insert(FAULT);
                }
                if state != DISABLING {
                    targets.insert(DISABLING);
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stateful_graph() {
        let ss = StateSet::stateful();
        assert!(ss.transition_allowed(DISABLED, RESETTING));
        assert!(ss.transition_allowed(RESETTING, READY));
        assert!(ss.transition_allowed(READY, DISABLING));
        assert!(ss.transition_allowed(READY, FAULT));
        assert!(ss.transition_allowed(FAULT, RESETTING));
        assert!(ss.transition_allowed(DISABLING, DISABLED));
        assert!(!ss.transition_allowed(DISABLED, FAULT));
        assert!(!ss.transition_allowed(DISABLED, READY));
        assert!(!ss.transition_allowed(READY, RESETTING));
        assert_eq!(ss.sources_of(RESETTING), vec![FAULT, DISABLED]);
    }

    #[test]
    fn manager_graph() {
        let ss = StateSet::manager();
        assert!(ss.transition_allowed(READY, EDITING));
        assert!(ss.transition_allowed(EDITABLE, SAVING));
        assert!(ss.transition_allowed(SAVING, EDITABLE));
        assert!(ss.transition_allowed(REVERTING, READY));
        assert!(ss.transition_allowed(EDITABLE, FAULT));
        assert!(!ss.transition_allowed(EDITING, SAVING));
    }

    #[test]
    fn runnable_graph() {
        let ss = StateSet::runnable();
        for s in [READY, CONFIGURING, ARMED, RUNNING, POSTRUN, PAUSED, SEEKING] {
            assert!(ss.transition_allowed(s, ABORTING), "{} -> Aborting", s);
        }
        assert!(!ss.transition_allowed(DISABLED, ABORTING));
        assert!(!ss.transition_allowed(ABORTED, RUNNING));
        assert!(ss.transition_allowed(ABORTED, RESETTING));
        assert!(ss.transition_allowed(ABORTING, FAULT));
        assert!(ss.transition_allowed(PAUSED, SEEKING));
        assert!(!ss.transition_allowed(ARMED, PAUSED));
        assert!(!ss.transition_allowed(RUNNING, RUNNING));
        assert!(ss.possible_states().contains(&POSTRUN));
        assert!(ss.is_busy(RUNNING));
        assert!(!ss.is_busy(ARMED));
    }
}
