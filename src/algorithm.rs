use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::{
    ops::Range,
    sync::atomic::{self, AtomicI64},
};

use crate::{
    config::MIN_REVISIONS,
    rows::{DetectionMethod, EventRow, EventType, RevisionRow},
    utils::{has_revert_keyword, parse_timestamp},
};

/// Hands out vandalism group ids, unique across a run.
///
/// Callers reserve a contiguous range per page, so the ids a page receives do not depend on
/// how many threads are classifying pages concurrently as long as reservations happen in a
/// fixed page order.
#[derive(Debug, Default)]
pub struct GroupIdAllocator {
    next: AtomicI64,
}

impl GroupIdAllocator {
    pub fn new(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    /// Reserves `count` consecutive ids and returns them.
    pub fn reserve(&self, count: usize) -> Range<i64> {
        let count = count as i64;
        let start = self.next.fetch_add(count, atomic::Ordering::Relaxed);
        start..start + count
    }

    /// Number of ids handed out so far, when started at zero.
    pub fn allocated(&self) -> i64 {
        self.next.load(atomic::Ordering::Relaxed)
    }
}

/// One revert cycle: the revision at `restoration` restores the content of the revision at
/// `base`; everything in between is vandalism. Indices point into [`PageHistory::revisions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertGroup {
    pub base: usize,
    pub restoration: usize,
    pub method: DetectionMethod,
}

impl RevertGroup {
    pub fn vandalism(&self) -> Range<usize> {
        self.base + 1..self.restoration
    }
}

fn content_hash(revision: &RevisionRow) -> Option<&str> {
    revision.text_sha1.as_deref().filter(|hash| !hash.is_empty())
}

/// The full edit history of one page, in chronological order.
#[derive(Debug, Clone)]
pub struct PageHistory {
    revisions: Vec<RevisionRow>,
    timestamps: Vec<Option<DateTime<Utc>>>,
}

impl PageHistory {
    /// Sorts by timestamp, then revision id. Revisions whose timestamp can't be parsed come
    /// first, ordered by the raw string.
    pub fn new(revisions: Vec<RevisionRow>) -> Self {
        let mut timed: Vec<(Option<DateTime<Utc>>, RevisionRow)> = revisions
            .into_iter()
            .map(|revision| {
                let timestamp = revision.timestamp.as_deref().and_then(parse_timestamp);
                (timestamp, revision)
            })
            .collect();

        timed.sort_by(|(ts_a, a), (ts_b, b)| {
            let raw = |ts: &Option<DateTime<Utc>>, row: &RevisionRow| match ts {
                Some(_) => None,
                None => row.timestamp.clone(),
            };
            ts_a.cmp(ts_b)
                .then_with(|| raw(ts_a, a).cmp(&raw(ts_b, b)))
                .then_with(|| a.revision_id.cmp(&b.revision_id))
        });

        let (timestamps, revisions) = timed.into_iter().unzip();
        Self {
            revisions,
            timestamps,
        }
    }

    pub fn revisions(&self) -> &[RevisionRow] {
        &self.revisions
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Whether the revisions strictly between `base` and `restoration` only changed metadata,
    /// i.e. every one of them that carries a hash carries `hash`.
    fn only_metadata_between(&self, base: usize, restoration: usize, hash: &str) -> bool {
        self.revisions[base + 1..restoration]
            .iter()
            .filter_map(content_hash)
            .all(|other| other == hash)
    }

    /// Replays the history and returns every revert cycle in discovery order.
    ///
    /// Pages with fewer than three revisions have none.
    pub fn find_reverts(&self) -> Vec<RevertGroup> {
        let mut groups = Vec::new();
        if self.revisions.len() < MIN_REVISIONS {
            return groups;
        }

        // content hash -> index of its most recent occurrence
        let mut last_seen: FxHashMap<&str, usize> = FxHashMap::default();

        for (i, revision) in self.revisions.iter().enumerate() {
            let Some(hash) = content_hash(revision) else {
                continue;
            };

            if let Some(&base) = last_seen.get(hash) {
                let adjacent = base + 1 == i;
                if !adjacent && !self.only_metadata_between(base, i, hash) {
                    let method = if has_revert_keyword(revision.comment.as_deref()) {
                        DetectionMethod::Both
                    } else {
                        DetectionMethod::Sha1Revert
                    };
                    groups.push(RevertGroup {
                        base,
                        restoration: i,
                        method,
                    });
                }
            }

            last_seen.insert(hash, i);
        }

        groups
    }

    /// Seconds from `from` to `to`, `None` if either timestamp is unparseable.
    fn seconds_between(&self, from: usize, to: usize) -> Option<f64> {
        let (from, to) = (self.timestamps[from]?, self.timestamps[to]?);
        Some((to - from).num_milliseconds() as f64 / 1000.0)
    }

    /// Expands `groups` into event rows; group `k` receives id `group_ids.start + k`.
    pub fn events(
        &self,
        groups: &[RevertGroup],
        group_ids: Range<i64>,
        party_group: &str,
    ) -> Vec<EventRow> {
        debug_assert_eq!(group_ids.end - group_ids.start, groups.len() as i64);

        let mut events = Vec::new();
        for (group, group_id) in groups.iter().zip(group_ids) {
            for index in group.vandalism() {
                events.push(EventRow {
                    revision: self.revisions[index].clone(),
                    event_type: EventType::Vandalism,
                    vandalism_group_id: group_id,
                    restored_to_revision_id: None,
                    restoration_time_seconds: self.seconds_between(index, group.restoration),
                    detection_method: group.method,
                    party_group: party_group.into(),
                });
            }

            events.push(EventRow {
                revision: self.revisions[group.restoration].clone(),
                event_type: EventType::Restoration,
                vandalism_group_id: group_id,
                restored_to_revision_id: self.revisions[group.base].revision_id,
                restoration_time_seconds: None,
                detection_method: group.method,
                party_group: party_group.into(),
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::prelude::*;

    fn history(revisions: &[(i64, Option<&str>, i64, &str)]) -> PageHistory {
        PageHistory::new(
            revisions
                .iter()
                .map(|&(id, sha1, seconds, comment)| {
                    revision_row("Page", id, sha1, &timestamp_at(seconds), comment)
                })
                .collect(),
        )
    }

    fn detect(history: &PageHistory, first_id: i64) -> Vec<EventRow> {
        let groups = history.find_reverts();
        let ids = first_id..first_id + groups.len() as i64;
        history.events(&groups, ids, "Other")
    }

    #[test]
    fn revert_with_keyword() {
        let history = history(&[
            (1, Some("A"), 0, ""),
            (2, Some("B"), 60, ""),
            (3, Some("A"), 120, "revert vandalism"),
            (4, Some("C"), 180, ""),
        ]);

        let events = detect(&history, 7);
        assert_eq!(events.len(), 2);

        let vandalism = &events[0];
        assert_eq!(vandalism.revision.revision_id, Some(2));
        assert_eq!(vandalism.event_type, EventType::Vandalism);
        assert_eq!(vandalism.vandalism_group_id, 7);
        assert_eq!(vandalism.detection_method, DetectionMethod::Both);
        assert_eq!(vandalism.restored_to_revision_id, None);
        assert_eq!(vandalism.restoration_time_seconds, Some(60.0));
        assert_eq!(vandalism.party_group, "Other");

        let restoration = &events[1];
        assert_eq!(restoration.revision.revision_id, Some(3));
        assert_eq!(restoration.event_type, EventType::Restoration);
        assert_eq!(restoration.vandalism_group_id, 7);
        assert_eq!(restoration.restored_to_revision_id, Some(1));
        assert_eq!(restoration.restoration_time_seconds, None);
        assert_eq!(restoration.detection_method, DetectionMethod::Both);
    }

    #[test]
    fn revert_without_keyword() {
        let history = history(&[
            (1, Some("A"), 0, ""),
            (2, Some("B"), 60, "expand"),
            (3, Some("C"), 120, ""),
            (4, Some("A"), 600, "fix"),
        ]);

        let events = detect(&history, 0);
        let kinds: Vec<_> = events
            .iter()
            .map(|e| (e.revision.revision_id, e.event_type, e.restoration_time_seconds))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (Some(2), EventType::Vandalism, Some(540.0)),
                (Some(3), EventType::Vandalism, Some(480.0)),
                (Some(4), EventType::Restoration, None),
            ]
        );
        assert!(events
            .iter()
            .all(|e| e.detection_method == DetectionMethod::Sha1Revert));
    }

    #[test]
    fn too_few_revisions() {
        let history = history(&[(1, Some("A"), 0, ""), (2, Some("A"), 60, "rvv")]);
        assert!(history.find_reverts().is_empty());
    }

    #[test]
    fn adjacent_duplicates_are_not_reverts() {
        let history = history(&[
            (1, Some("A"), 0, ""),
            (2, Some("A"), 60, "revert"),
            (3, Some("A"), 120, "revert"),
            (4, Some("B"), 180, ""),
        ]);
        assert!(history.find_reverts().is_empty());
    }

    #[test]
    fn hashless_intermediates_are_metadata_only() {
        let history = history(&[
            (1, Some("A"), 0, ""),
            (2, None, 60, "moved page"),
            (3, None, 120, ""),
            (4, Some("A"), 180, ""),
            (5, Some("B"), 240, ""),
        ]);
        assert!(history.find_reverts().is_empty());
    }

    #[test]
    fn hashless_revision_inside_revert_is_vandalism() {
        let history = history(&[
            (1, Some("A"), 0, ""),
            (2, Some("B"), 60, ""),
            (3, None, 120, ""),
            (4, Some("A"), 180, "rvv"),
        ]);

        let events = detect(&history, 0);
        let ids: Vec<_> = events.iter().map(|e| e.revision.revision_id).collect();
        assert_eq!(ids, vec![Some(2), Some(3), Some(4)]);
        assert_eq!(events[1].event_type, EventType::Vandalism);
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let history = history(&[
            (4, Some("C"), 180, ""),
            (3, Some("A"), 120, "revert vandalism"),
            (1, Some("A"), 0, ""),
            (2, Some("B"), 60, ""),
        ]);
        let ids: Vec<_> = history.revisions().iter().map(|r| r.revision_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(history.find_reverts().len(), 1);
    }

    #[test]
    fn timestamp_ties_break_by_revision_id() {
        let history = history(&[
            (3, Some("A"), 0, ""),
            (2, Some("B"), 0, ""),
            (1, Some("A"), 0, ""),
        ]);
        let ids: Vec<_> = history.revisions().iter().map(|r| r.revision_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn unparseable_timestamps_sort_first() {
        let mut rows = vec![
            revision_row("Page", 1, Some("A"), &timestamp_at(0), ""),
            revision_row("Page", 2, Some("B"), "garbage", ""),
            revision_row("Page", 3, Some("C"), &timestamp_at(60), ""),
        ];
        rows[0].timestamp = None;
        let history = PageHistory::new(rows);
        let ids: Vec<_> = history.revisions().iter().map(|r| r.revision_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn negative_latency_is_kept() {
        // skewed history as it arrives from a source with clock drift
        let rows = vec![
            revision_row("Page", 1, Some("A"), &timestamp_at(100), ""),
            revision_row("Page", 2, Some("B"), &timestamp_at(200), ""),
            revision_row("Page", 3, Some("A"), &timestamp_at(150), ""),
        ];
        let history = PageHistory {
            timestamps: rows
                .iter()
                .map(|r| r.timestamp.as_deref().and_then(parse_timestamp))
                .collect(),
            revisions: rows,
        };

        let events = detect(&history, 0);
        assert_eq!(events[0].revision.revision_id, Some(2));
        assert_eq!(events[0].restoration_time_seconds, Some(-50.0));
    }

    #[test]
    fn missing_timestamp_gives_null_latency() {
        let mut rows = vec![
            revision_row("Page", 1, Some("A"), &timestamp_at(0), ""),
            revision_row("Page", 2, Some("B"), &timestamp_at(60), ""),
            revision_row("Page", 3, Some("A"), &timestamp_at(120), ""),
        ];
        rows[1].timestamp = Some("not a date".into());
        let history = PageHistory::new(rows);

        let events = detect(&history, 0);
        let vandalism = events
            .iter()
            .find(|e| e.event_type == EventType::Vandalism)
            .unwrap();
        assert_eq!(vandalism.revision.revision_id, Some(2));
        assert_eq!(vandalism.restoration_time_seconds, None);
    }

    #[test]
    fn nested_and_repeated_groups() {
        let history = history(&[
            (1, Some("A"), 0, ""),
            (2, Some("B"), 60, ""),
            (3, Some("C"), 120, ""),
            (4, Some("B"), 180, "undo"),
            (5, Some("A"), 240, "rollback"),
            (6, Some("D"), 300, ""),
            (7, Some("A"), 360, ""),
        ]);

        let groups = history.find_reverts();
        assert_eq!(
            groups,
            vec![
                RevertGroup {
                    base: 1,
                    restoration: 3,
                    method: DetectionMethod::Sha1Revert
                },
                RevertGroup {
                    base: 0,
                    restoration: 4,
                    method: DetectionMethod::Both
                },
                RevertGroup {
                    base: 4,
                    restoration: 6,
                    method: DetectionMethod::Sha1Revert
                },
            ]
        );

        let events = history.events(&groups, 10..13, "Democrat");
        let restored: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::Restoration)
            .map(|e| (e.vandalism_group_id, e.restored_to_revision_id))
            .collect();
        assert_eq!(restored, vec![(10, Some(2)), (11, Some(1)), (12, Some(5))]);
    }

    #[test]
    fn allocator_reserves_contiguous_ranges() {
        let allocator = GroupIdAllocator::new(0);
        assert_eq!(allocator.reserve(3), 0..3);
        assert_eq!(allocator.reserve(0), 3..3);
        assert_eq!(allocator.reserve(2), 3..5);
        assert_eq!(allocator.allocated(), 5);
    }

    #[test]
    fn allocator_is_unique_across_threads() {
        use rayon::prelude::*;

        let allocator = GroupIdAllocator::default();
        let mut ids: Vec<i64> = (0..1000usize)
            .into_par_iter()
            .flat_map_iter(|i| allocator.reserve(i % 4))
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(allocator.allocated(), total as i64);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 2000,
            .. ProptestConfig::default()
        })]

        #[test]
        fn input_order_does_not_change_events(rows in proptest_support::page_history("Page", 24)) {
            let forward = PageHistory::new(rows.clone());
            let mut reversed_rows = rows;
            reversed_rows.reverse();
            let reversed = PageHistory::new(reversed_rows);

            prop_assert_eq!(detect(&forward, 0), detect(&reversed, 0));
        }

        #[test]
        fn groups_are_complete(rows in proptest_support::page_history("Page", 24)) {
            let history = PageHistory::new(rows);
            let groups = history.find_reverts();
            let events = history.events(&groups, 0..groups.len() as i64, "Other");

            for (group_id, group) in groups.iter().enumerate() {
                let members: Vec<_> = events
                    .iter()
                    .filter(|e| e.vandalism_group_id == group_id as i64)
                    .collect();
                let restorations: Vec<_> = members
                    .iter()
                    .filter(|e| e.event_type == EventType::Restoration)
                    .collect();
                prop_assert_eq!(restorations.len(), 1);
                prop_assert!(members.len() >= 2);
                prop_assert_eq!(
                    restorations[0].restored_to_revision_id,
                    history.revisions()[group.base].revision_id
                );
                prop_assert_eq!(
                    &history.revisions()[group.base].text_sha1,
                    &restorations[0].revision.text_sha1
                );
            }
        }

        #[test]
        fn adjacent_and_metadata_runs_never_group(rows in proptest_support::page_history("Page", 24)) {
            let history = PageHistory::new(rows);
            for group in history.find_reverts() {
                prop_assert!(group.restoration > group.base + 1);
                let intermediate_hashes: Vec<_> = history.revisions()[group.vandalism()]
                    .iter()
                    .filter_map(|r| r.text_sha1.as_deref())
                    .collect();
                prop_assert!(!intermediate_hashes.is_empty());
            }
        }
    }
}
