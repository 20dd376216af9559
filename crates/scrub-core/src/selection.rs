use std::collections::BTreeSet;

use crate::category::CategoryCode;
use crate::event::EventRecord;

/// The categories currently enabled for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionSet(BTreeSet<CategoryCode>);

impl SelectionSet {
    pub fn all() -> Self {
        Self(CategoryCode::ALL.into_iter().collect())
    }

    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, category: CategoryCode) -> bool {
        self.0.contains(&category)
    }

    pub fn is_selected(&self, record: &EventRecord) -> bool {
        self.contains(record.category)
    }

    pub fn iter(&self) -> impl Iterator<Item = CategoryCode> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn toggle(&mut self, category: CategoryCode) -> bool {
        if !self.0.remove(&category) {
            self.0.insert(category);
            return true;
        }
        false
    }
}

impl Default for SelectionSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<CategoryCode> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = CategoryCode>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

type Listener = Box<dyn FnMut(&SelectionSet) + Send>;

/// Mutable category selection that notifies one registered listener per change.
pub struct SelectionState {
    set: SelectionSet,
    listener: Option<Listener>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self {
            set: SelectionSet::all(),
            listener: None,
        }
    }

    /// Register the listener, replacing any previous one.
    pub fn on_change(&mut self, listener: impl FnMut(&SelectionSet) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Flip `category`, notify the listener, and return whether it is now selected.
    pub fn toggle(&mut self, category: CategoryCode) -> bool {
        let selected = self.set.toggle(category);
        tracing::debug!(%category, selected, "selection toggled");
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.set);
        }
        selected
    }

    pub fn is_selected(&self, record: &EventRecord) -> bool {
        self.set.is_selected(record)
    }

    pub fn current(&self) -> &SelectionSet {
        &self.set
    }
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::new()
    }
}
