use std::collections::hash_map::Entry;

use ahash::HashMap;

use crate::{
    internal::{arena::ArenaId, id::VariableId},
    qualified::Variable,
};

/// All variables the solver decides are stored in a `VariableMap`. This map is
/// used to keep track of the semantics of a variable, e.g. what a specific
/// [`VariableId`] represents.
///
/// Ids are handed out in the order in which variables are first encountered,
/// which makes them stable across runs on the same input.
#[derive(Default, Clone, Debug)]
pub(crate) struct VariableMap {
    /// The variable of every allocated id.
    variables: Vec<Variable>,

    /// A map from variable to its id.
    ids: HashMap<Variable, VariableId>,
}

impl VariableMap {
    /// Allocate an id for a new variable or reuse an existing one.
    pub fn intern(&mut self, variable: Variable) -> VariableId {
        match self.ids.entry(variable) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let id = VariableId::from_usize(self.variables.len());
                self.variables.push(variable);
                entry.insert(id);
                id
            }
        }
    }

    /// Returns the variable an id stands for.
    pub fn variable(&self, id: VariableId) -> Variable {
        self.variables[id.to_usize()]
    }

    /// Returns all variables indexed by id.
    pub fn as_slice(&self) -> &[Variable] {
        &self.variables
    }
}
