use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::select;
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ImageCatalog;
use crate::events::{AspectResolved, CatalogEvent, ResolveAspect};
use crate::model::{
    ImageId, ImageRecord, OwnerId, PreferenceSet, PreferenceUpdate, Slide, SlideshowState,
};
use crate::ordering::{SeedContext, order};
use crate::pairing::pair;
use crate::settings::SettingsStore;

/// Single-writer state machine behind the slideshow. Every mutation keeps
/// the partition invariant (slides flatten back to the working set) and the
/// cursor bound `current_index < max(1, slides.len())`.
pub(crate) struct Reconciler {
    working: Vec<ImageRecord>,
    aspects: HashMap<ImageId, f32>,
    preferences: PreferenceSet,
    slides: Vec<Slide>,
    current_index: usize,
}

impl Reconciler {
    pub(crate) fn new(preferences: PreferenceSet) -> Self {
        Self {
            working: Vec::new(),
            aspects: HashMap::new(),
            preferences,
            slides: Vec::new(),
            current_index: 0,
        }
    }

    pub(crate) fn records(&self) -> &[ImageRecord] {
        &self.working
    }

    pub(crate) fn has_aspect(&self, id: &ImageId) -> bool {
        self.aspects.contains_key(id)
    }

    pub(crate) fn slide_count(&self) -> usize {
        self.slides.len()
    }

    pub(crate) fn interval(&self) -> Duration {
        self.preferences.interval
    }

    /// Replace the working set with a freshly ordered catalog snapshot.
    pub(crate) fn load_snapshot(&mut self, records: Vec<ImageRecord>, seed: &SeedContext) {
        self.working = order(&records, self.preferences.policy, seed);
        self.current_index = 0;
        self.rebuild();
    }

    /// A new record becomes visible: prepend it and jump the cursor to it.
    //
    // TODO: confirm with product whether the jump-to-front should stay
    // unconditional; today it applies under every ordering policy, matching
    // the long-observed behavior, even though e.g. `oldest` would file the
    // new record elsewhere on the next reorder.
    pub(crate) fn insert(&mut self, record: ImageRecord) -> bool {
        if self.working.iter().any(|r| r.id == record.id) {
            return false;
        }
        self.working.insert(0, record);
        self.current_index = 0;
        self.rebuild();
        true
    }

    /// Remove by id. Unknown ids are a no-op, which also covers a delete
    /// arriving before the record ever showed up in a snapshot.
    pub(crate) fn remove(&mut self, id: &ImageId) -> bool {
        let Some(pos) = self.working.iter().position(|r| r.id == *id) else {
            return false;
        };
        self.working.remove(pos);
        self.rebuild();
        true
    }

    /// Record a resolved ratio. Each id is written at most once; entries are
    /// never removed, so a re-inserted record keeps its known aspect.
    pub(crate) fn resolve_aspect(&mut self, resolved: AspectResolved) -> bool {
        if self.aspects.contains_key(&resolved.id) {
            return false;
        }
        self.aspects.insert(resolved.id, resolved.ratio);
        self.rebuild();
        true
    }

    /// Merge a preference delta and react to the fields that moved.
    pub(crate) fn apply_preferences(&mut self, update: &PreferenceUpdate, seed: &SeedContext) {
        let previous = self.preferences.clone();
        self.preferences.apply(update);

        if self.preferences.policy != previous.policy {
            self.reorder(seed);
        } else if self.preferences.pairing_enabled != previous.pairing_enabled {
            self.rebuild();
        }
        // An interval change is picked up by the rotation timer; fit mode is
        // carried through to the snapshot untouched.
    }

    /// Re-run the ordering engine under the current policy, with the
    /// stability heuristic: an unchanged first record means the visible
    /// sequence would not noticeably move, so the old order is kept —
    /// unless the new policy is a random family, where a fresh permutation
    /// is the whole point.
    fn reorder(&mut self, seed: &SeedContext) {
        let reordered = order(&self.working, self.preferences.policy, seed);
        let first_changed =
            reordered.first().map(|r| &r.id) != self.working.first().map(|r| &r.id);
        if first_changed {
            self.working = reordered;
            self.current_index = 0;
            self.rebuild();
        } else if self.preferences.policy.is_random_family() {
            self.working = reordered;
            self.rebuild();
        }
    }

    /// Timer tick: advance the cursor, wrapping over the slide count.
    pub(crate) fn advance(&mut self) {
        let n = self.slides.len();
        if n > 1 {
            self.current_index = (self.current_index + 1) % n;
        }
    }

    fn rebuild(&mut self) {
        self.slides = pair(
            &self.working,
            &self.aspects,
            self.preferences.pairing_enabled,
        );
        if self.slides.is_empty() {
            self.current_index = 0;
        } else if self.current_index >= self.slides.len() {
            self.current_index = self.slides.len() - 1;
        }
    }

    pub(crate) fn state(&self) -> SlideshowState {
        SlideshowState {
            ordered: self.working.clone(),
            slides: self.slides.clone(),
            current_index: self.current_index,
            preferences: self.preferences.clone(),
        }
    }
}

/// Ask the resolver for every visible record whose ratio is still unknown,
/// at most once per id for the engine's lifetime.
fn request_missing_aspects(
    reconciler: &Reconciler,
    requested: &mut HashSet<ImageId>,
    resolve_tx: &UnboundedSender<ResolveAspect>,
) {
    for record in reconciler.records() {
        if !reconciler.has_aspect(&record.id) && requested.insert(record.id.clone()) {
            let _ = resolve_tx.send(ResolveAspect(record.clone()));
        }
    }
}

fn rearm_rotation(
    timer: &mut Option<Interval>,
    armed: &mut Option<(usize, Duration)>,
    slide_count: usize,
    every: Duration,
) {
    // Rotation is suspended with zero or one slide; otherwise the timer is
    // rebuilt whenever the slide count or the interval changes.
    let want = (slide_count > 1).then_some((slide_count, every));
    if *armed == want {
        return;
    }
    *armed = want;
    *timer = want.map(|(_, every)| {
        let mut t = interval_at(Instant::now() + every, every);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        t
    });
}

async fn rotation_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Slideshow engine task: the one writer of [`SlideshowState`].
///
/// Catalog events, settings deltas, aspect resolutions, and rotation ticks
/// are arms of a single select loop; each applies one atomic state step and
/// publishes a complete snapshot. Collaborator subscriptions are released
/// when this task returns.
pub async fn run(
    catalog: Arc<dyn ImageCatalog>,
    settings: Arc<dyn SettingsStore>,
    owner: OwnerId,
    resolve_tx: UnboundedSender<ResolveAspect>,
    mut aspect_rx: Receiver<AspectResolved>,
    state_tx: watch::Sender<SlideshowState>,
    cancel: CancellationToken,
) -> Result<()> {
    let preferences = match settings.current(&owner) {
        Ok(prefs) => prefs,
        Err(err) => {
            warn!("failed to load preferences, using defaults: {err}");
            PreferenceSet::default()
        }
    };

    let (mut catalog_rx, _catalog_sub) = catalog
        .subscribe(&owner)
        .context("subscribing to catalog events")?;
    let (mut settings_rx, _settings_sub) = settings
        .subscribe(&owner)
        .context("subscribing to settings events")?;

    let mut reconciler = Reconciler::new(preferences);
    let mut requested: HashSet<ImageId> = HashSet::new();

    // Initial full fetch. A transient failure starts the show empty; live
    // catalog events can still fill it in.
    match catalog.list_owned(&owner) {
        Ok(snapshot) => {
            info!(count = snapshot.len(), "catalog snapshot loaded");
            reconciler.load_snapshot(snapshot, &SeedContext::current());
        }
        Err(err) => warn!("catalog snapshot failed, starting empty: {err}"),
    }
    request_missing_aspects(&reconciler, &mut requested, &resolve_tx);

    let mut timer: Option<Interval> = None;
    let mut armed: Option<(usize, Duration)> = None;
    rearm_rotation(
        &mut timer,
        &mut armed,
        reconciler.slide_count(),
        reconciler.interval(),
    );
    state_tx.send_replace(reconciler.state());

    loop {
        let mut dirty = false;
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting slideshow engine");
                break;
            }

            Some(event) = catalog_rx.recv() => match event {
                CatalogEvent::RecordAdded(record) => {
                    let id = record.id.clone();
                    if reconciler.insert(record) {
                        debug!(image = %id, "record added; showing immediately");
                        request_missing_aspects(&reconciler, &mut requested, &resolve_tx);
                        dirty = true;
                    } else {
                        debug!(image = %id, "duplicate add ignored");
                    }
                }
                CatalogEvent::RecordRemoved(id) => {
                    if reconciler.remove(&id) {
                        debug!(image = %id, "record removed");
                        dirty = true;
                    } else {
                        debug!(image = %id, "remove for unknown record ignored");
                    }
                }
            },

            Some(update) = settings_rx.recv() => {
                debug!(?update, "preferences changed");
                reconciler.apply_preferences(&update, &SeedContext::current());
                dirty = true;
            }

            Some(resolved) = aspect_rx.recv() => {
                if reconciler.resolve_aspect(resolved) {
                    dirty = true;
                }
            }

            _ = rotation_tick(&mut timer) => {
                reconciler.advance();
                state_tx.send_replace(reconciler.state());
            }
        }

        if dirty {
            rearm_rotation(
                &mut timer,
                &mut armed,
                reconciler.slide_count(),
                reconciler.interval(),
            );
            state_tx.send_replace(reconciler.state());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FitMode, OrderingPolicy};
    use chrono::{TimeZone, Utc};

    fn record(id: &str, created_at: &str) -> ImageRecord {
        ImageRecord {
            id: id.into(),
            display_name: id.to_owned(),
            tag_text: String::new(),
            created_at: created_at.to_owned(),
            file_ref: format!("/photos/{id}.jpg"),
            owner: OwnerId::from("owner"),
        }
    }

    fn seed() -> SeedContext {
        SeedContext::at(Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap())
    }

    fn prefs(policy: OrderingPolicy, pairing: bool) -> PreferenceSet {
        PreferenceSet {
            policy,
            pairing_enabled: pairing,
            ..Default::default()
        }
    }

    fn ids(reconciler: &Reconciler) -> Vec<&str> {
        reconciler.records().iter().map(|r| r.id.as_str()).collect()
    }

    fn flattened(reconciler: &Reconciler) -> Vec<&str> {
        reconciler
            .slides
            .iter()
            .flat_map(|s| s.member_ids())
            .map(ImageId::as_str)
            .collect()
    }

    #[test]
    fn snapshot_is_ordered_by_policy() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.load_snapshot(
            vec![
                record("old", "2024-01-01 00:00:00.000Z"),
                record("new", "2024-03-01 00:00:00.000Z"),
            ],
            &seed(),
        );
        assert_eq!(ids(&reconciler), ["new", "old"]);
        assert_eq!(reconciler.current_index, 0);
    }

    #[test]
    fn insert_prepends_and_resets_cursor_under_any_policy() {
        for policy in [OrderingPolicy::Newest, OrderingPolicy::Oldest] {
            let mut reconciler = Reconciler::new(prefs(policy, false));
            reconciler.load_snapshot(
                vec![
                    record("a", "2024-01-01 00:00:00.000Z"),
                    record("b", "2024-01-02 00:00:00.000Z"),
                ],
                &seed(),
            );
            reconciler.advance();
            assert_eq!(reconciler.current_index, 1);

            assert!(reconciler.insert(record("c", "2024-01-03 00:00:00.000Z")));
            assert_eq!(reconciler.records()[0].id, ImageId::from("c"));
            assert_eq!(reconciler.current_index, 0);
        }
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.load_snapshot(vec![record("a", "2024-01-01 00:00:00.000Z")], &seed());
        assert!(!reconciler.insert(record("a", "2024-01-01 00:00:00.000Z")));
        assert_eq!(reconciler.records().len(), 1);
    }

    #[test]
    fn remove_clamps_the_cursor() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.load_snapshot(
            vec![
                record("c", "2024-01-03 00:00:00.000Z"),
                record("b", "2024-01-02 00:00:00.000Z"),
                record("a", "2024-01-01 00:00:00.000Z"),
            ],
            &seed(),
        );
        reconciler.advance();
        reconciler.advance();
        assert_eq!(reconciler.current_index, 2);

        assert!(reconciler.remove(&ImageId::from("a")));
        assert_eq!(reconciler.slide_count(), 2);
        assert_eq!(reconciler.current_index, 1);
    }

    #[test]
    fn remove_before_first_fetch_is_a_noop() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        assert!(!reconciler.remove(&ImageId::from("ghost")));
        assert_eq!(reconciler.slide_count(), 0);
        assert_eq!(reconciler.current_index, 0);
    }

    #[test]
    fn removing_a_pair_member_regroups_the_neighbor() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, true));
        reconciler.load_snapshot(
            vec![
                record("a", "2024-01-03 00:00:00.000Z"),
                record("b", "2024-01-02 00:00:00.000Z"),
            ],
            &seed(),
        );
        reconciler.resolve_aspect(AspectResolved {
            id: "a".into(),
            ratio: 0.7,
        });
        reconciler.resolve_aspect(AspectResolved {
            id: "b".into(),
            ratio: 0.8,
        });
        assert_eq!(reconciler.slide_count(), 1);
        assert!(reconciler.slides[0].is_pair());

        assert!(reconciler.remove(&ImageId::from("a")));
        assert_eq!(reconciler.slides, vec![Slide::Single(ImageId::from("b"))]);
    }

    #[test]
    fn aspect_resolution_pairs_retroactively_and_clamps() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, true));
        reconciler.load_snapshot(
            vec![
                record("a", "2024-01-03 00:00:00.000Z"),
                record("b", "2024-01-02 00:00:00.000Z"),
            ],
            &seed(),
        );
        reconciler.resolve_aspect(AspectResolved {
            id: "a".into(),
            ratio: 0.7,
        });
        assert_eq!(reconciler.slide_count(), 2);
        reconciler.advance();
        assert_eq!(reconciler.current_index, 1);

        assert!(reconciler.resolve_aspect(AspectResolved {
            id: "b".into(),
            ratio: 0.6,
        }));
        assert_eq!(
            reconciler.slides,
            vec![Slide::Pair(ImageId::from("a"), ImageId::from("b"))]
        );
        assert_eq!(reconciler.current_index, 0);
    }

    #[test]
    fn aspect_entries_are_write_once() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, true));
        reconciler.load_snapshot(vec![record("a", "2024-01-01 00:00:00.000Z")], &seed());
        assert!(reconciler.resolve_aspect(AspectResolved {
            id: "a".into(),
            ratio: 0.7,
        }));
        assert!(!reconciler.resolve_aspect(AspectResolved {
            id: "a".into(),
            ratio: 1.5,
        }));
        assert_eq!(reconciler.aspects[&ImageId::from("a")], 0.7);
    }

    #[test]
    fn policy_change_with_same_first_record_keeps_the_view() {
        // Equal timestamps: newest and oldest agree on the (stable) order,
        // so flipping between them should not disturb the cursor.
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.load_snapshot(
            vec![
                record("x", "2024-01-01 00:00:00.000Z"),
                record("y", "2024-01-01 00:00:00.000Z"),
            ],
            &seed(),
        );
        reconciler.advance();
        assert_eq!(reconciler.current_index, 1);

        reconciler.apply_preferences(
            &PreferenceUpdate {
                policy: Some(OrderingPolicy::Oldest),
                ..Default::default()
            },
            &seed(),
        );
        assert_eq!(ids(&reconciler), ["x", "y"]);
        assert_eq!(reconciler.current_index, 1);
    }

    #[test]
    fn policy_change_with_new_first_record_resets_cursor() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.load_snapshot(
            vec![
                record("new", "2024-03-01 00:00:00.000Z"),
                record("old", "2024-01-01 00:00:00.000Z"),
            ],
            &seed(),
        );
        reconciler.advance();

        reconciler.apply_preferences(
            &PreferenceUpdate {
                policy: Some(OrderingPolicy::Oldest),
                ..Default::default()
            },
            &seed(),
        );
        assert_eq!(ids(&reconciler), ["old", "new"]);
        assert_eq!(reconciler.current_index, 0);
    }

    #[test]
    fn switching_into_a_random_policy_always_applies_the_shuffle() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        let records: Vec<_> = (0..10)
            .map(|i| {
                record(
                    &format!("img{i:02}"),
                    &format!("2024-01-{:02} 00:00:00.000Z", 10 - i),
                )
            })
            .collect();
        reconciler.load_snapshot(records, &seed());
        let before = reconciler.records().to_vec();
        let expected = order(&before, OrderingPolicy::RandomDaily, &seed());

        reconciler.apply_preferences(
            &PreferenceUpdate {
                policy: Some(OrderingPolicy::RandomDaily),
                ..Default::default()
            },
            &seed(),
        );
        // The deterministic shuffle of the pre-switch order was applied even
        // if its first element happened to stay put.
        assert_eq!(
            ids(&reconciler),
            expected.iter().map(|r| r.id.as_str()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn interval_change_leaves_cursor_and_order_alone() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.load_snapshot(
            vec![
                record("b", "2024-01-02 00:00:00.000Z"),
                record("a", "2024-01-01 00:00:00.000Z"),
            ],
            &seed(),
        );
        reconciler.advance();
        let before = ids(&reconciler)
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();

        reconciler.apply_preferences(
            &PreferenceUpdate {
                interval: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            &seed(),
        );
        assert_eq!(reconciler.interval(), Duration::from_secs(5));
        assert_eq!(reconciler.current_index, 1);
        assert_eq!(
            ids(&reconciler)
                .into_iter()
                .map(str::to_owned)
                .collect::<Vec<_>>(),
            before
        );
    }

    #[test]
    fn pairing_toggle_rebuilds_slides() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.load_snapshot(
            vec![
                record("a", "2024-01-02 00:00:00.000Z"),
                record("b", "2024-01-01 00:00:00.000Z"),
            ],
            &seed(),
        );
        reconciler.resolve_aspect(AspectResolved {
            id: "a".into(),
            ratio: 0.7,
        });
        reconciler.resolve_aspect(AspectResolved {
            id: "b".into(),
            ratio: 0.8,
        });
        assert_eq!(reconciler.slide_count(), 2);

        reconciler.apply_preferences(
            &PreferenceUpdate {
                pairing_enabled: Some(true),
                ..Default::default()
            },
            &seed(),
        );
        assert_eq!(reconciler.slide_count(), 1);
        assert!(reconciler.slides[0].is_pair());
    }

    #[test]
    fn fit_mode_is_carried_into_snapshots() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.apply_preferences(
            &PreferenceUpdate {
                fit_mode: Some(FitMode::Contain),
                ..Default::default()
            },
            &seed(),
        );
        assert_eq!(reconciler.state().preferences.fit_mode, FitMode::Contain);
    }

    #[test]
    fn advance_wraps_and_suspends_on_small_sets() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, false));
        reconciler.load_snapshot(
            vec![
                record("a", "2024-01-03 00:00:00.000Z"),
                record("b", "2024-01-02 00:00:00.000Z"),
                record("c", "2024-01-01 00:00:00.000Z"),
            ],
            &seed(),
        );
        let mut seen = vec![reconciler.current_index];
        for _ in 0..3 {
            reconciler.advance();
            seen.push(reconciler.current_index);
        }
        assert_eq!(seen, [0, 1, 2, 0]);

        reconciler.remove(&ImageId::from("a"));
        reconciler.remove(&ImageId::from("b"));
        reconciler.advance();
        assert_eq!(reconciler.current_index, 0);
    }

    #[test]
    fn slides_always_partition_the_working_set() {
        let mut reconciler = Reconciler::new(prefs(OrderingPolicy::Newest, true));
        reconciler.load_snapshot(
            vec![
                record("a", "2024-01-05 00:00:00.000Z"),
                record("b", "2024-01-04 00:00:00.000Z"),
                record("c", "2024-01-03 00:00:00.000Z"),
            ],
            &seed(),
        );
        reconciler.resolve_aspect(AspectResolved {
            id: "b".into(),
            ratio: 0.5,
        });
        reconciler.resolve_aspect(AspectResolved {
            id: "c".into(),
            ratio: 0.5,
        });
        reconciler.insert(record("d", "2024-01-06 00:00:00.000Z"));
        reconciler.remove(&ImageId::from("a"));
        assert_eq!(flattened(&reconciler), ids(&reconciler));
    }
}
