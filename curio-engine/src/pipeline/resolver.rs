//! Pipeline graph resolver
//!
//! Reconstructs the ordered pipeline topology from loosely-connected
//! stage records. Stages carry a forward pointer (`next_stage_id`) along
//! the main chain and, for transient stages, a termination pointer into
//! a sink. The stored ordering fields are ignored: the resolved order is
//! derived purely from the connection pointers, so stale priority data
//! can never corrupt the layout.
//!
//! Pure and deterministic: same input, same output, no side effects.

use curio_common::db::models::{StageRecord, StageRole};
use curio_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Position offset for stages unreached by traversal, so they sort
/// after every connected stage without perturbing their positions.
pub const ORPHAN_POSITION_BASE: u32 = 1000;

/// A stage with its resolved pipeline placement
///
/// The output `Vec` order is the pipeline order. `position` is the
/// layout column: a dense 0..k-1 index over the reached sink/terminal
/// stages, inherited by each transient that terminates into a sink, so
/// a transient and its sink render in the same visual column.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedStage {
    pub stage: StageRecord,
    pub position: u32,
    /// Count of reached sink/terminal stages, attached to every stage
    /// including orphans
    pub total_positions: u32,
}

/// Resolve the ordered pipeline from a set of stage records.
///
/// Soft-deleted stages are excluded. Multiple `source` stages produce
/// independent chains concatenated in `created_at` order (ties broken
/// by id). A termination pointer to a missing or non-sink stage is
/// ignored. A `next_stage_id` looping back into the chain currently
/// being walked is a data-integrity error; converging into a chain
/// already consumed by an earlier source merely ends the current chain.
pub fn resolve(stages: &[StageRecord]) -> Result<Vec<OrderedStage>> {
    let live: Vec<&StageRecord> = stages.iter().filter(|s| s.deleted_at.is_none()).collect();
    let by_id: HashMap<Uuid, &StageRecord> = live.iter().map(|s| (s.id, *s)).collect();

    let mut sources: Vec<&StageRecord> = live
        .iter()
        .copied()
        .filter(|s| s.role == StageRole::Source)
        .collect();
    sources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut visited: HashSet<Uuid> = HashSet::with_capacity(live.len());
    let mut reached: Vec<&StageRecord> = Vec::with_capacity(live.len());

    for source in sources {
        // Explicit work-list walk along next pointers; bounded by the
        // visited set, no recursion on untrusted depth.
        let mut path: HashSet<Uuid> = HashSet::new();
        let mut cursor = Some(source.id);

        while let Some(id) = cursor {
            if path.contains(&id) {
                return Err(Error::DataIntegrity(format!(
                    "stage chain loops back to {id}"
                )));
            }
            if visited.contains(&id) {
                // Converged into a chain an earlier source already
                // walked; this chain ends here.
                break;
            }
            let Some(stage) = by_id.get(&id).copied() else {
                debug!(stage_id = %id, "next pointer references unknown stage, ending chain");
                break;
            };

            visited.insert(id);
            path.insert(id);
            reached.push(stage);

            // Interleaving rule: a transient's sink is positioned
            // directly after the transient, not at the end of the chain.
            if stage.role == StageRole::Transient {
                if let Some(term_id) = stage.termination_id {
                    match by_id.get(&term_id).copied() {
                        Some(sink) if sink.role == StageRole::Sink => {
                            if visited.insert(sink.id) {
                                reached.push(sink);
                            }
                        }
                        _ => {
                            // Dangling or mistyped termination: treated
                            // as absent, not an error.
                            debug!(
                                stage_id = %stage.id,
                                termination_id = %term_id,
                                "ignoring termination pointer to missing or non-sink stage"
                            );
                        }
                    }
                }
            }

            cursor = stage.next_stage_id;
        }
    }

    let orphans: Vec<&StageRecord> = live
        .iter()
        .copied()
        .filter(|s| !visited.contains(&s.id))
        .collect();

    // Dense renumber over the reached sink/terminal stages; transients
    // that terminate into a reached sink inherit the sink's column.
    let mut column_of_sink: HashMap<Uuid, u32> = HashMap::new();
    let mut next_column: u32 = 0;
    for stage in &reached {
        if matches!(stage.role, StageRole::Sink | StageRole::Terminal) {
            column_of_sink.insert(stage.id, next_column);
            next_column += 1;
        }
    }
    let total_positions = next_column;

    let mut resolved = Vec::with_capacity(reached.len() + orphans.len());
    for (index, stage) in reached.iter().enumerate() {
        let position = match stage.role {
            StageRole::Sink | StageRole::Terminal => column_of_sink[&stage.id],
            StageRole::Transient => stage
                .termination_id
                .and_then(|term| column_of_sink.get(&term).copied())
                .unwrap_or(index as u32),
            StageRole::Source => index as u32,
        };
        resolved.push(OrderedStage {
            stage: (*stage).clone(),
            position,
            total_positions,
        });
    }

    for (n, stage) in orphans.iter().enumerate() {
        resolved.push(OrderedStage {
            stage: (*stage).clone(),
            position: ORPHAN_POSITION_BASE + n as u32,
            total_positions,
        });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn stage(n: u128, role: StageRole, next: Option<u128>, term: Option<u128>) -> StageRecord {
        StageRecord {
            id: id(n),
            name: format!("stage-{n}"),
            role,
            next_stage_id: next.map(id),
            termination_id: term.map(id),
            group_id: id(999),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, n as u32 % 60).unwrap(),
            deleted_at: None,
        }
    }

    fn order_ids(resolved: &[OrderedStage]) -> Vec<Uuid> {
        resolved.iter().map(|s| s.stage.id).collect()
    }

    fn find<'a>(resolved: &'a [OrderedStage], n: u128) -> &'a OrderedStage {
        resolved.iter().find(|s| s.stage.id == id(n)).unwrap()
    }

    #[test]
    fn test_single_chain_with_interleaved_sink() {
        // source -> transient(term sink) -> transient -> terminal
        let stages = vec![
            stage(1, StageRole::Source, Some(2), None),
            stage(2, StageRole::Transient, Some(4), Some(3)),
            stage(3, StageRole::Sink, None, None),
            stage(4, StageRole::Transient, Some(5), None),
            stage(5, StageRole::Terminal, None, None),
        ];

        let resolved = resolve(&stages).unwrap();
        assert_eq!(order_ids(&resolved), vec![id(1), id(2), id(3), id(4), id(5)]);

        // Sink and terminal renumbered densely among themselves
        assert_eq!(find(&resolved, 3).position, 0);
        assert_eq!(find(&resolved, 5).position, 1);
        // Transient inherits its sink's column
        assert_eq!(find(&resolved, 2).position, 0);
        // Everyone carries the sink/terminal count
        assert!(resolved.iter().all(|s| s.total_positions == 2));
    }

    #[test]
    fn test_transient_and_sink_share_column() {
        let stages = vec![
            stage(1, StageRole::Source, Some(2), None),
            stage(2, StageRole::Transient, Some(7), Some(3)), // next dangles
            stage(3, StageRole::Sink, None, None),
        ];

        let resolved = resolve(&stages).unwrap();
        assert_eq!(order_ids(&resolved), vec![id(1), id(2), id(3)]);
        assert_eq!(find(&resolved, 2).position, 0);
        assert_eq!(find(&resolved, 3).position, 0);
        assert!(resolved.iter().all(|s| s.total_positions == 1));
    }

    #[test]
    fn test_multiple_sources_ordered_by_created_at() {
        // Source 20 created later than source 10
        let mut early = stage(10, StageRole::Source, Some(11), None);
        early.created_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut late = stage(20, StageRole::Source, Some(21), None);
        late.created_at = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        // Input order deliberately reversed
        let stages = vec![
            late,
            stage(21, StageRole::Terminal, None, None),
            early,
            stage(11, StageRole::Terminal, None, None),
        ];

        let resolved = resolve(&stages).unwrap();
        assert_eq!(order_ids(&resolved), vec![id(10), id(11), id(20), id(21)]);
        assert_eq!(find(&resolved, 11).position, 0);
        assert_eq!(find(&resolved, 21).position, 1);
    }

    #[test]
    fn test_orphan_appended_with_offset() {
        let stages = vec![
            stage(1, StageRole::Source, Some(2), None),
            stage(2, StageRole::Terminal, None, None),
            stage(9, StageRole::Transient, None, None), // unconnected
        ];

        let resolved = resolve(&stages).unwrap();
        assert_eq!(order_ids(&resolved), vec![id(1), id(2), id(9)]);

        let orphan = find(&resolved, 9);
        assert!(orphan.position >= ORPHAN_POSITION_BASE);
        assert_eq!(orphan.total_positions, 1);

        // Connected stages keep their positions
        assert_eq!(find(&resolved, 2).position, 0);
    }

    #[test]
    fn test_orphans_keep_discovery_order() {
        let stages = vec![
            stage(8, StageRole::Sink, None, None),
            stage(1, StageRole::Source, None, None),
            stage(9, StageRole::Transient, None, None),
        ];

        let resolved = resolve(&stages).unwrap();
        assert_eq!(order_ids(&resolved), vec![id(1), id(8), id(9)]);
        assert_eq!(find(&resolved, 8).position, ORPHAN_POSITION_BASE);
        assert_eq!(find(&resolved, 9).position, ORPHAN_POSITION_BASE + 1);
        // Orphan sink is not part of the dense renumbering
        assert_eq!(find(&resolved, 8).total_positions, 0);
    }

    #[test]
    fn test_invalid_termination_ignored() {
        let stages = vec![
            stage(1, StageRole::Source, Some(2), None),
            // Termination points at a terminal, not a sink
            stage(2, StageRole::Transient, Some(3), Some(3)),
            stage(3, StageRole::Terminal, None, None),
        ];

        let resolved = resolve(&stages).unwrap();
        assert_eq!(order_ids(&resolved), vec![id(1), id(2), id(3)]);
        // No inherited column: the transient keeps its traversal index
        assert_eq!(find(&resolved, 2).position, 1);

        // Termination to a missing stage behaves the same
        let stages = vec![
            stage(1, StageRole::Source, Some(2), None),
            stage(2, StageRole::Transient, None, Some(77)),
        ];
        let resolved = resolve(&stages).unwrap();
        assert_eq!(order_ids(&resolved), vec![id(1), id(2)]);
    }

    #[test]
    fn test_cycle_is_integrity_error() {
        let stages = vec![
            stage(1, StageRole::Source, Some(2), None),
            stage(2, StageRole::Transient, Some(3), None),
            stage(3, StageRole::Transient, Some(2), None), // loops back
        ];

        let err = resolve(&stages).unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[test]
    fn test_convergence_truncates_second_chain() {
        // Two sources sharing a tail is not a cycle: the second chain
        // simply ends where the first one already walked.
        let mut a = stage(1, StageRole::Source, Some(3), None);
        a.created_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut b = stage(2, StageRole::Source, Some(3), None);
        b.created_at = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        let stages = vec![a, b, stage(3, StageRole::Terminal, None, None)];
        let resolved = resolve(&stages).unwrap();
        assert_eq!(order_ids(&resolved), vec![id(1), id(3), id(2)]);
    }

    #[test]
    fn test_soft_deleted_stage_excluded() {
        let mut gone = stage(2, StageRole::Transient, Some(3), None);
        gone.deleted_at = Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());

        let stages = vec![
            stage(1, StageRole::Source, Some(2), None),
            gone,
            stage(3, StageRole::Terminal, None, None),
        ];

        let resolved = resolve(&stages).unwrap();
        // Chain ends at the deleted stage; the terminal becomes an orphan
        assert_eq!(order_ids(&resolved), vec![id(1), id(3)]);
        assert!(find(&resolved, 3).position >= ORPHAN_POSITION_BASE);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let stages = vec![
            stage(1, StageRole::Source, Some(2), None),
            stage(2, StageRole::Transient, Some(4), Some(3)),
            stage(3, StageRole::Sink, None, None),
            stage(4, StageRole::Terminal, None, None),
            stage(9, StageRole::Transient, None, None),
        ];

        let first = resolve(&stages).unwrap();
        let second = resolve(&stages).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input() {
        let resolved = resolve(&[]).unwrap();
        assert!(resolved.is_empty());
    }
}
