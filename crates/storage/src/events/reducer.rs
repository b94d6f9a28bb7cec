//! The finite-state reduction applied to one path's batched raw events
//! before dispatch.

use super::{RawFileEvent, RawKind};

/// Rewrites adjacent event pairs until fixpoint:
///
/// * `Delete, CloseWrite` -> `CloseWrite` (recreated in place: a modify)
/// * `CloseWrite, Delete` -> nothing (created and removed within the window)
/// * `MovedTo, CloseWrite` -> `MovedTo`
/// * `CloseWrite, MovedTo` -> `MovedTo`
///
/// Rename events keep their cookie through a rewrite.
pub(crate) fn reduce(events: &mut Vec<RawFileEvent>) {
    loop {
        let mut rewrote = false;
        let mut i = 0;
        while i + 1 < events.len() {
            match (events[i].kind, events[i + 1].kind) {
                (RawKind::Delete, RawKind::CloseWrite) => {
                    events.remove(i);
                    rewrote = true;
                }
                (RawKind::CloseWrite, RawKind::Delete) => {
                    events.drain(i..i + 2);
                    rewrote = true;
                }
                (RawKind::MovedTo, RawKind::CloseWrite) => {
                    events.remove(i + 1);
                    rewrote = true;
                }
                (RawKind::CloseWrite, RawKind::MovedTo) => {
                    events.remove(i);
                    rewrote = true;
                }
                _ => i += 1,
            }
        }
        if !rewrote {
            return;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn ev(kind: RawKind) -> RawFileEvent {
        RawFileEvent {
            path: PathBuf::from("x"),
            kind,
            cookie: if matches!(kind, RawKind::MovedFrom | RawKind::MovedTo) {
                Some(7)
            } else {
                None
            },
        }
    }

    fn reduced(kinds: &[RawKind]) -> Vec<RawKind> {
        let mut events: Vec<_> = kinds.iter().copied().map(ev).collect();
        reduce(&mut events);
        events.into_iter().map(|e| e.kind).collect()
    }

    #[test]
    fn delete_then_write_is_a_modify() {
        assert_eq!(
            reduced(&[RawKind::Delete, RawKind::CloseWrite]),
            vec![RawKind::CloseWrite]
        );
    }

    #[test]
    fn write_then_delete_cancels_out() {
        assert_eq!(reduced(&[RawKind::CloseWrite, RawKind::Delete]), vec![]);
    }

    #[test]
    fn moves_absorb_writes_on_either_side() {
        assert_eq!(
            reduced(&[RawKind::MovedTo, RawKind::CloseWrite]),
            vec![RawKind::MovedTo]
        );
        assert_eq!(
            reduced(&[RawKind::CloseWrite, RawKind::MovedTo]),
            vec![RawKind::MovedTo]
        );
    }

    #[test]
    fn reduction_runs_to_fixpoint() {
        // Write, delete, write, delete: both pairs cancel.
        assert_eq!(
            reduced(&[
                RawKind::CloseWrite,
                RawKind::Delete,
                RawKind::CloseWrite,
                RawKind::Delete,
            ]),
            vec![]
        );
        // Delete, write, moved-to: the repaired write is absorbed by the move.
        assert_eq!(
            reduced(&[RawKind::Delete, RawKind::CloseWrite, RawKind::MovedTo]),
            vec![RawKind::MovedTo]
        );
    }

    #[test]
    fn cookies_survive_reduction() {
        let mut events = vec![ev(RawKind::CloseWrite), ev(RawKind::MovedTo)];
        reduce(&mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].cookie, Some(7));
    }

    #[test]
    fn unrelated_sequences_are_untouched() {
        assert_eq!(
            reduced(&[RawKind::Delete, RawKind::MovedFrom]),
            vec![RawKind::Delete, RawKind::MovedFrom]
        );
    }
}
