use std::time::Duration;

use serde::Deserialize;

/// Backend identifier of a catalog image record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

/// Identifier of the account whose images the slideshow displays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId(pub String);

impl From<&str> for OwnerId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

/// One catalog image. Immutable once observed; edits in the source system
/// surface as delete + insert of a fresh record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: ImageId,
    pub display_name: String,
    pub tag_text: String,
    /// Fixed-width ISO-8601-like timestamp; lexical order is creation order.
    pub created_at: String,
    /// Opaque reference resolvable by the dimension loader (path or URL).
    pub file_ref: String,
    pub owner: OwnerId,
}

/// Active ordering rule for the slide sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingPolicy {
    #[default]
    Newest,
    Oldest,
    Random,
    RandomDaily,
    RandomHourly,
}

impl OrderingPolicy {
    /// Policies whose reorder is expected to produce a fresh permutation.
    pub fn is_random_family(self) -> bool {
        matches!(self, Self::Random | Self::RandomDaily | Self::RandomHourly)
    }
}

/// How the rendering boundary should fit a single image to the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMode {
    #[default]
    Cover,
    Contain,
}

/// One display unit: a lone image or a paired portrait duo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slide {
    Single(ImageId),
    Pair(ImageId, ImageId),
}

impl Slide {
    pub fn member_ids(&self) -> impl Iterator<Item = &ImageId> {
        let (first, second) = match self {
            Slide::Single(a) => (a, None),
            Slide::Pair(a, b) => (a, Some(b)),
        };
        std::iter::once(first).chain(second)
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Slide::Pair(..))
    }
}

/// The live display preferences the engine honors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PreferenceSet {
    /// Dwell time per slide.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub fit_mode: FitMode,
    pub policy: OrderingPolicy,
    pub pairing_enabled: bool,
}

impl Default for PreferenceSet {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fit_mode: FitMode::default(),
            policy: OrderingPolicy::default(),
            pairing_enabled: false,
        }
    }
}

/// Field-level delta applied onto a [`PreferenceSet`]. Absent fields keep
/// their previous value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceUpdate {
    pub interval: Option<Duration>,
    pub fit_mode: Option<FitMode>,
    pub policy: Option<OrderingPolicy>,
    pub pairing_enabled: Option<bool>,
}

impl PreferenceUpdate {
    pub fn is_empty(&self) -> bool {
        self.interval.is_none()
            && self.fit_mode.is_none()
            && self.policy.is_none()
            && self.pairing_enabled.is_none()
    }
}

impl PreferenceSet {
    /// Merge a delta in place; unset fields retain their previous value.
    pub fn apply(&mut self, update: &PreferenceUpdate) {
        if let Some(interval) = update.interval {
            self.interval = interval;
        }
        if let Some(fit_mode) = update.fit_mode {
            self.fit_mode = fit_mode;
        }
        if let Some(policy) = update.policy {
            self.policy = policy;
        }
        if let Some(pairing) = update.pairing_enabled {
            self.pairing_enabled = pairing;
        }
    }

    /// Delta from `previous` to `self`, carrying only the changed fields.
    pub fn diff_from(&self, previous: &Self) -> PreferenceUpdate {
        PreferenceUpdate {
            interval: (self.interval != previous.interval).then_some(self.interval),
            fit_mode: (self.fit_mode != previous.fit_mode).then_some(self.fit_mode),
            policy: (self.policy != previous.policy).then_some(self.policy),
            pairing_enabled: (self.pairing_enabled != previous.pairing_enabled)
                .then_some(self.pairing_enabled),
        }
    }
}

/// Read-only snapshot published to the rendering boundary. Always internally
/// consistent: `slides` partitions `ordered` and the cursor is in range.
#[derive(Debug, Clone, Default)]
pub struct SlideshowState {
    pub ordered: Vec<ImageRecord>,
    pub slides: Vec<Slide>,
    pub current_index: usize,
    pub preferences: PreferenceSet,
}

impl SlideshowState {
    /// The slide under the cursor, if any.
    pub fn current_slide(&self) -> Option<&Slide> {
        self.slides.get(self.current_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_keeps_absent_fields() {
        let mut prefs = PreferenceSet::default();
        prefs.apply(&PreferenceUpdate {
            policy: Some(OrderingPolicy::Oldest),
            ..Default::default()
        });
        assert_eq!(prefs.policy, OrderingPolicy::Oldest);
        assert_eq!(prefs.interval, Duration::from_secs(30));
        assert_eq!(prefs.fit_mode, FitMode::Cover);
        assert!(!prefs.pairing_enabled);
    }

    #[test]
    fn diff_only_carries_changes() {
        let old = PreferenceSet::default();
        let new = PreferenceSet {
            pairing_enabled: true,
            ..old.clone()
        };
        let delta = new.diff_from(&old);
        assert_eq!(delta.pairing_enabled, Some(true));
        assert!(delta.interval.is_none());
        assert!(delta.policy.is_none());
        assert!(delta.fit_mode.is_none());
    }

    #[test]
    fn slide_member_ids_preserve_order() {
        let pair = Slide::Pair(ImageId::from("a"), ImageId::from("b"));
        let ids: Vec<_> = pair.member_ids().map(ImageId::as_str).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
