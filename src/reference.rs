// 🗂️ Reference Resolver - free-text labels → reference table ids
//
// A reference set is a small lookup table (field of work, startup stage)
// mapping human labels to stable record ids. Labels typed into the
// spreadsheet are resolved by normalized exact match; the first entry in
// store order wins when several entries normalize to the same label.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::normalize::normalize;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Record id of a reference row (opaque to the resolver)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(pub i64);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which reference table a label is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceSet {
    FieldOfWork,
    StartupStage,
}

impl ReferenceSet {
    pub const ALL: [ReferenceSet; 2] = [ReferenceSet::FieldOfWork, ReferenceSet::StartupStage];

    pub fn name(&self) -> &'static str {
        match self {
            ReferenceSet::FieldOfWork => "field-of-work",
            ReferenceSet::StartupStage => "startup-stage",
        }
    }
}

impl fmt::Display for ReferenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `(id, label)` row of a reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub id: ReferenceId,
    pub label: String,
}

impl ReferenceEntry {
    pub fn new(id: i64, label: &str) -> Self {
        ReferenceEntry {
            id: ReferenceId(id),
            label: label.to_string(),
        }
    }
}

/// Read-only access to reference tables
///
/// Entries must come back in the store's natural order; the resolver's
/// first-match rule depends on it.
pub trait ReferenceStore {
    fn fetch_reference_set(&self, set: ReferenceSet) -> Result<Vec<ReferenceEntry>>;
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Resolve a label against a reference set by normalized equality.
///
/// Returns the id of the first entry whose normalized label equals the
/// normalized query, or `None` when the label is absent or nothing matches.
pub fn resolve(label: Option<&str>, reference_set: &[ReferenceEntry]) -> Option<ReferenceId> {
    let wanted = normalize(label)?;

    reference_set
        .iter()
        .find(|entry| normalize(Some(&entry.label)).as_deref() == Some(wanted.as_str()))
        .map(|entry| entry.id)
}

// ============================================================================
// BATCH SNAPSHOT
// ============================================================================

/// Entry with its label normalized once up front
#[derive(Debug, Clone)]
struct NormalizedEntry {
    id: ReferenceId,
    key: Option<String>,
}

/// Reference sets loaded once per batch
///
/// Resolution is a linear scan over pre-normalized labels, so every row
/// sees the same reference data and the store is hit once per set.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    field_of_work: Vec<NormalizedEntry>,
    startup_stage: Vec<NormalizedEntry>,
}

impl ReferenceSnapshot {
    /// Build from already-fetched entries (kept in the given order)
    pub fn from_entries(field_of_work: &[ReferenceEntry], startup_stage: &[ReferenceEntry]) -> Self {
        ReferenceSnapshot {
            field_of_work: Self::prepare(field_of_work),
            startup_stage: Self::prepare(startup_stage),
        }
    }

    /// Fetch every reference set from the store
    ///
    /// On failure the offending set is returned alongside the error so the
    /// caller can report which lookup broke.
    pub fn load<S: ReferenceStore + ?Sized>(
        store: &S,
    ) -> std::result::Result<Self, (ReferenceSet, anyhow::Error)> {
        let mut snapshot = ReferenceSnapshot::default();

        for set in ReferenceSet::ALL {
            let entries = store.fetch_reference_set(set).map_err(|e| (set, e))?;
            log::debug!("Loaded {} entries for reference set {}", entries.len(), set);
            *snapshot.entries_mut(set) = Self::prepare(&entries);
        }

        Ok(snapshot)
    }

    fn prepare(entries: &[ReferenceEntry]) -> Vec<NormalizedEntry> {
        entries
            .iter()
            .map(|entry| NormalizedEntry {
                id: entry.id,
                key: normalize(Some(&entry.label)),
            })
            .collect()
    }

    fn entries(&self, set: ReferenceSet) -> &[NormalizedEntry] {
        match set {
            ReferenceSet::FieldOfWork => &self.field_of_work,
            ReferenceSet::StartupStage => &self.startup_stage,
        }
    }

    fn entries_mut(&mut self, set: ReferenceSet) -> &mut Vec<NormalizedEntry> {
        match set {
            ReferenceSet::FieldOfWork => &mut self.field_of_work,
            ReferenceSet::StartupStage => &mut self.startup_stage,
        }
    }

    /// Number of entries held for a set
    pub fn len(&self, set: ReferenceSet) -> usize {
        self.entries(set).len()
    }

    /// Same contract as [`resolve`], against the snapshot
    pub fn resolve(&self, set: ReferenceSet, label: Option<&str>) -> Option<ReferenceId> {
        let wanted = normalize(label)?;

        self.entries(set)
            .iter()
            .find(|entry| entry.key.as_deref() == Some(wanted.as_str()))
            .map(|entry| entry.id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sectors() -> Vec<ReferenceEntry> {
        vec![
            ReferenceEntry::new(1, "FinTech"),
            ReferenceEntry::new(2, "HealthTech"),
            ReferenceEntry::new(3, "Fin Tech"),
            ReferenceEntry::new(4, "Agri\u{00A0}Tech"),
        ]
    }

    #[test]
    fn test_resolve_absent_label() {
        assert_eq!(resolve(None, &sectors()), None);
        assert_eq!(resolve(None, &[]), None);
        assert_eq!(resolve(Some(""), &sectors()), None);
        assert_eq!(resolve(Some("   "), &sectors()), None);
    }

    #[test]
    fn test_resolve_normalized_match() {
        let set = vec![ReferenceEntry::new(1, "FinTech"), ReferenceEntry::new(2, "HealthTech")];

        assert_eq!(resolve(Some(" fintech "), &set), Some(ReferenceId(1)));
        assert_eq!(resolve(Some("HEALTHTECH"), &set), Some(ReferenceId(2)));
        assert_eq!(resolve(Some("agri tech"), &sectors()), Some(ReferenceId(4)));
    }

    #[test]
    fn test_resolve_first_match_wins() {
        let set = vec![
            ReferenceEntry::new(7, "Fin Tech"),
            ReferenceEntry::new(3, "fin  tech"),
            ReferenceEntry::new(9, "FIN TECH"),
        ];

        assert_eq!(resolve(Some(" fin   tech "), &set), Some(ReferenceId(7)));
        assert_eq!(resolve(Some(" fin   tech "), &sectors()), Some(ReferenceId(3)));
    }

    #[test]
    fn test_inner_space_is_significant() {
        // "fin tech" and "fintech" are different labels after normalization
        let set = vec![ReferenceEntry::new(1, "FinTech"), ReferenceEntry::new(2, "HealthTech")];

        assert_eq!(resolve(Some(" fin   tech "), &set), None);
        assert_eq!(resolve(Some(" fintech "), &set), Some(ReferenceId(1)));
    }

    #[test]
    fn test_resolve_no_match() {
        assert_eq!(resolve(Some("SpaceTech"), &sectors()), None);
        assert_eq!(resolve(Some("fintech"), &[]), None);
    }

    #[test]
    fn test_snapshot_agrees_with_resolve() {
        let stages = vec![
            ReferenceEntry::new(10, "Ideation"),
            ReferenceEntry::new(11, "Early Traction"),
        ];
        let snapshot = ReferenceSnapshot::from_entries(&sectors(), &stages);

        for label in ["fin tech", "FinTech", "healthtech", "nothing", "", "AGRI TECH"] {
            assert_eq!(
                snapshot.resolve(ReferenceSet::FieldOfWork, Some(label)),
                resolve(Some(label), &sectors()),
                "snapshot disagrees for {:?}",
                label
            );
        }

        assert_eq!(
            snapshot.resolve(ReferenceSet::StartupStage, Some("early\ntraction")),
            Some(ReferenceId(11))
        );
        assert_eq!(snapshot.resolve(ReferenceSet::StartupStage, Some("FinTech")), None);
    }

    struct CountingStore {
        calls: Cell<usize>,
        fail_on: Option<ReferenceSet>,
    }

    impl ReferenceStore for CountingStore {
        fn fetch_reference_set(&self, set: ReferenceSet) -> Result<Vec<ReferenceEntry>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_on == Some(set) {
                anyhow::bail!("permission denied");
            }
            Ok(match set {
                ReferenceSet::FieldOfWork => vec![ReferenceEntry::new(1, "FinTech")],
                ReferenceSet::StartupStage => vec![ReferenceEntry::new(5, "Scale Up")],
            })
        }
    }

    #[test]
    fn test_snapshot_loads_each_set_once() {
        let store = CountingStore { calls: Cell::new(0), fail_on: None };
        let snapshot = ReferenceSnapshot::load(&store).unwrap();

        assert_eq!(store.calls.get(), 2);
        assert_eq!(snapshot.len(ReferenceSet::FieldOfWork), 1);
        assert_eq!(snapshot.resolve(ReferenceSet::StartupStage, Some("scale up")), Some(ReferenceId(5)));
    }

    #[test]
    fn test_snapshot_reports_failing_set() {
        let store = CountingStore {
            calls: Cell::new(0),
            fail_on: Some(ReferenceSet::StartupStage),
        };

        let (set, err) = ReferenceSnapshot::load(&store).unwrap_err();
        assert_eq!(set, ReferenceSet::StartupStage);
        assert!(err.to_string().contains("permission denied"));
    }
}
