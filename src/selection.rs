//! Robot selection management.
//!
//! Tracks whether the user is selecting one robot or several, and which
//! robots are selected. Multi-select is an entitlement: switching to it
//! goes through an [`Entitlement`] check supplied by the caller.
//!
//! # Usage
//!
//! ```rust,ignore
//! use blocklink::selection::{SelectionMode, SelectionState};
//!
//! let mut sel = SelectionState::new();
//! sel.select("A");
//! sel.set_mode(SelectionMode::Multi, &true)?;
//! sel.select("B");
//! assert_eq!(sel.targets(), vec!["A", "B"]);
//! ```

use crate::error::SelectionError;
use indexmap::IndexSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionMode {
    #[default]
    Single,
    Multi,
}

/// Answers whether the current user may select several robots at once.
pub trait Entitlement {
    /// `Ok(())` if allowed, otherwise the reason shown to the user.
    fn allow_multi_select(&self) -> Result<(), String>;
}

impl Entitlement for bool {
    fn allow_multi_select(&self) -> Result<(), String> {
        if *self {
            Ok(())
        } else {
            Err("license does not include multi-robot control".to_string())
        }
    }
}

/// Entitlement backed by a lookup function, e.g. a license service query.
pub struct EntitlementFn<F: Fn() -> bool>(pub F);

impl<F: Fn() -> bool> Entitlement for EntitlementFn<F> {
    fn allow_multi_select(&self) -> Result<(), String> {
        (self.0)().allow_multi_select()
    }
}

/// The selection state machine.
///
/// Selected serials are kept in insertion order. In single mode at most one
/// serial is selected. Per-robot "selected" flags are always derived from
/// the set, never stored next to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    mode: SelectionMode,
    selected: IndexSet<String>,
}

impl SelectionState {
    /// Single mode, nothing selected.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Single mode replaces the selection; multi mode toggles membership.
    pub fn select(&mut self, serial: &str) {
        match self.mode {
            SelectionMode::Single => {
                self.selected.clear();
                self.selected.insert(serial.to_string());
            }
            SelectionMode::Multi => {
                // `shift_remove` keeps the remaining order stable.
                if !self.selected.shift_remove(serial) {
                    self.selected.insert(serial.to_string());
                }
            }
        }
    }

    /// Switch modes.
    ///
    /// Entering multi mode asks `entitlement` first; on refusal the mode
    /// stays single and the reason is returned. Entering single mode keeps
    /// only the serial that has stayed selected the longest: deselecting a
    /// serial forgets its position, so toggling it off and on again puts it
    /// behind every serial that stayed selected meanwhile.
    pub fn set_mode(
        &mut self,
        mode: SelectionMode,
        entitlement: &dyn Entitlement,
    ) -> Result<(), SelectionError> {
        match mode {
            SelectionMode::Multi => {
                if self.mode == SelectionMode::Multi {
                    return Ok(());
                }
                if let Err(reason) = entitlement.allow_multi_select() {
                    tracing::info!(%reason, "multi-select denied");
                    return Err(SelectionError::MultiModeAuthorizationDenied { reason });
                }
                self.mode = SelectionMode::Multi;
            }
            SelectionMode::Single => {
                self.selected.truncate(1);
                self.mode = SelectionMode::Single;
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Drop serials no longer in the managed device list.
    pub fn retain_known<'a>(&mut self, known: impl IntoIterator<Item = &'a str>) {
        let known: std::collections::HashSet<&str> = known.into_iter().collect();
        self.selected.retain(|s| known.contains(s.as_str()));
    }

    pub fn is_selected(&self, serial: &str) -> bool {
        self.selected.contains(serial)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn count(&self) -> usize {
        self.selected.len()
    }

    /// Selected serials in selection order.
    pub fn targets(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    /// Per-robot selected flags for a device list, in the list's order.
    pub fn flags<'a>(&self, serials: impl IntoIterator<Item = &'a str>) -> Vec<(&'a str, bool)> {
        serials
            .into_iter()
            .map(|s| (s, self.is_selected(s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi() -> SelectionState {
        let mut sel = SelectionState::new();
        sel.set_mode(SelectionMode::Multi, &true).unwrap();
        sel
    }

    #[test]
    fn test_selection_new_is_empty() {
        let sel = SelectionState::new();
        assert!(sel.is_empty());
        assert_eq!(sel.mode(), SelectionMode::Single);
    }

    #[test]
    fn test_single_select_replaces() {
        let mut sel = SelectionState::new();
        sel.select("A");
        sel.select("B");
        assert_eq!(sel.targets(), vec!["B".to_string()]);
        sel.select("B");
        assert_eq!(sel.count(), 1);
    }

    #[test]
    fn test_multi_select_toggles() {
        let mut sel = multi();
        sel.select("A");
        sel.select("B");
        assert_eq!(sel.count(), 2);
        sel.select("A");
        assert_eq!(sel.targets(), vec!["B".to_string()]);
    }

    #[test]
    fn test_multi_denied_keeps_single() {
        let mut sel = SelectionState::new();
        sel.select("A");
        let err = sel.set_mode(SelectionMode::Multi, &false).unwrap_err();
        assert!(matches!(err, SelectionError::MultiModeAuthorizationDenied { .. }));
        assert_eq!(sel.mode(), SelectionMode::Single);
        assert_eq!(sel.targets(), vec!["A".to_string()]);
    }

    #[test]
    fn test_closure_entitlement() {
        let mut sel = SelectionState::new();
        let licensed = EntitlementFn(|| true);
        assert!(sel.set_mode(SelectionMode::Multi, &licensed).is_ok());
        assert_eq!(sel.mode(), SelectionMode::Multi);
    }

    #[test]
    fn test_single_collapses_to_first_selected() {
        let mut sel = multi();
        sel.select("C");
        sel.select("A");
        sel.select("B");
        sel.set_mode(SelectionMode::Single, &false).unwrap();
        assert_eq!(sel.targets(), vec!["C".to_string()]);
    }

    #[test]
    fn test_single_collapse_of_empty_stays_empty() {
        let mut sel = multi();
        sel.set_mode(SelectionMode::Single, &false).unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn test_flags_follow_selection() {
        let mut sel = multi();
        sel.select("B");
        let flags = sel.flags(["A", "B", "C"]);
        assert_eq!(flags, vec![("A", false), ("B", true), ("C", false)]);
        sel.select("B");
        assert!(sel.flags(["B"]).iter().all(|(_, f)| !f));
    }

    #[test]
    fn test_retain_known_drops_missing() {
        let mut sel = multi();
        sel.select("A");
        sel.select("B");
        sel.retain_known(["B", "C"]);
        assert_eq!(sel.targets(), vec!["B".to_string()]);
    }
}
