use blocklink::error::SelectionError;
use blocklink::selection::{SelectionMode, SelectionState};

#[test]
fn test_toggle_twice_restores_selection() {
    let mut sel = SelectionState::new();
    sel.set_mode(SelectionMode::Multi, &true).unwrap();
    sel.select("A");
    sel.select("B");
    let before = sel.clone();
    for serial in ["C", "A", "B"] {
        sel.select(serial);
        sel.select(serial);
        assert_eq!(sel.is_selected(serial), before.is_selected(serial));
        assert_eq!(sel.count(), before.count());
    }
}

#[test]
fn test_single_mode_never_holds_more_than_one() {
    let mut sel = SelectionState::new();
    for serial in ["A", "B", "C", "B", "A"] {
        sel.select(serial);
        assert!(sel.count() <= 1);
    }
    assert_eq!(sel.targets(), vec!["A".to_string()]);

    sel.set_mode(SelectionMode::Multi, &true).unwrap();
    sel.select("B");
    sel.select("C");
    sel.set_mode(SelectionMode::Single, &true).unwrap();
    assert_eq!(sel.count(), 1);
    sel.select("D");
    assert_eq!(sel.targets(), vec!["D".to_string()]);
}

#[test]
fn test_denied_multi_mode_reports_reason() {
    let mut sel = SelectionState::new();
    match sel.set_mode(SelectionMode::Multi, &false) {
        Err(SelectionError::MultiModeAuthorizationDenied { reason }) => {
            assert!(reason.contains("license"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(sel.mode(), SelectionMode::Single);
}

#[test]
fn test_single_collapse_keeps_longest_selected() {
    let mut sel = SelectionState::new();
    sel.set_mode(SelectionMode::Multi, &true).unwrap();
    sel.select("A");
    sel.select("B");
    sel.select("A");
    sel.select("A");
    assert_eq!(sel.targets(), vec!["B".to_string(), "A".to_string()]);

    sel.set_mode(SelectionMode::Single, &true).unwrap();
    assert_eq!(sel.targets(), vec!["B".to_string()]);
}
