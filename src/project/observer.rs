//! Publish/subscribe for unit state changes.

use std::sync::Arc;

use super::variables::VariableTable;
use crate::types::{NodeId, ProjectType};

/// Callbacks fired on the owning thread while a project is updated.
///
/// Every method has an empty default so listeners only implement what they
/// care about.
pub trait ProjectListener: Send + Sync {
    fn variables_changed(&self, _unit: NodeId, _old: &VariableTable, _new: &VariableTable) {}

    fn project_type_changed(&self, _unit: NodeId, _old: ProjectType, _new: ProjectType) {}

    /// Fired on every parse-in-progress transition.
    fn pro_file_updated(&self, _unit: NodeId, _valid_parse: bool, _parse_in_progress: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<dyn ProjectListener>)>,
}

impl Listeners {
    pub fn subscribe(&mut self, listener: Arc<dyn ProjectListener>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn variables_changed(&self, unit: NodeId, old: &VariableTable, new: &VariableTable) {
        for (_, listener) in &self.entries {
            listener.variables_changed(unit, old, new);
        }
    }

    pub fn project_type_changed(&self, unit: NodeId, old: ProjectType, new: ProjectType) {
        for (_, listener) in &self.entries {
            listener.project_type_changed(unit, old, new);
        }
    }

    pub fn pro_file_updated(&self, unit: NodeId, valid_parse: bool, parse_in_progress: bool) {
        for (_, listener) in &self.entries {
            listener.pro_file_updated(unit, valid_parse, parse_in_progress);
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("count", &self.len()).finish()
    }
}
