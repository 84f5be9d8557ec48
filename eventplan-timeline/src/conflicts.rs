use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::dependencies::DependencyViolation;
use crate::model::{ItemStatus, ItemType, TimelineItem};

/// Item types every complete event plan is expected to contain.
pub const CRITICAL_ITEM_TYPES: [ItemType; 3] =
    [ItemType::Setup, ItemType::Arrival, ItemType::Cleanup];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Overlap,
}

/// Two items whose planned windows intersect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub item1_id: Uuid,
    pub item1_title: String,
    pub item2_id: Uuid,
    pub item2_title: String,
    pub overlap_minutes: i64,
    pub message: String,
}

impl Conflict {
    pub fn involves(&self, item_id: Uuid) -> bool {
        self.item1_id == item_id || self.item2_id == item_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MissingCritical,
    CriticalSkipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub kind: WarningKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<ValidationWarning>,
    pub dependency_violations: Vec<DependencyViolation>,
    pub total_items: usize,
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    /// Validity depends on overlaps only; warnings and violations are advisory.
    pub fn build(items: &[TimelineItem], dependency_violations: Vec<DependencyViolation>) -> Self {
        let conflicts = detect_conflicts(items);
        let warnings = collect_warnings(items);
        Self {
            is_valid: conflicts.is_empty(),
            conflicts,
            warnings,
            dependency_violations,
            total_items: items.len(),
            validated_at: Utc::now(),
        }
    }
}

/// Finds every pair of items with intersecting `[start, end)` windows.
///
/// Items are swept in start order while a list of still-open windows is kept,
/// so an item spanning several later ones is reported against each of them.
pub fn detect_conflicts(items: &[TimelineItem]) -> Vec<Conflict> {
    let mut windows: Vec<(i64, i64, &TimelineItem)> = items
        .iter()
        .map(|item| {
            let (start, end) = item.window();
            (start, end, item)
        })
        .collect();
    windows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut open: Vec<(i64, &TimelineItem)> = Vec::new();
    let mut conflicts = Vec::new();

    for (start, end, item) in windows {
        open.retain(|(open_end, _)| *open_end > start);
        for (open_end, earlier) in &open {
            let overlap = (*open_end).min(end) - start;
            if overlap <= 0 {
                continue;
            }
            conflicts.push(Conflict {
                kind: ConflictKind::Overlap,
                item1_id: earlier.id,
                item1_title: earlier.title.clone(),
                item2_id: item.id,
                item2_title: item.title.clone(),
                overlap_minutes: overlap,
                message: format!(
                    "'{}' overlaps with '{}' by {} minutes",
                    earlier.title, item.title, overlap
                ),
            });
        }
        open.push((end, item));
    }

    debug!(items = items.len(), conflicts = conflicts.len(), "computed timeline conflicts");
    conflicts
}

/// Advisory findings: missing critical item types and skipped critical items.
pub fn collect_warnings(items: &[TimelineItem]) -> Vec<ValidationWarning> {
    let mut warnings: Vec<ValidationWarning> = CRITICAL_ITEM_TYPES
        .iter()
        .filter(|kind| !items.iter().any(|item| item.item_type == **kind))
        .map(|kind| ValidationWarning {
            kind: WarningKind::MissingCritical,
            message: format!("no {kind} item in timeline"),
            item_type: Some(*kind),
            item_id: None,
        })
        .collect();

    warnings.extend(
        items
            .iter()
            .filter(|item| item.is_critical && item.status == ItemStatus::Skipped)
            .map(|item| ValidationWarning {
                kind: WarningKind::CriticalSkipped,
                message: format!("critical item '{}' was skipped", item.title),
                item_type: Some(item.item_type),
                item_id: Some(item.id),
            }),
    );
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn item(title: &str, start: (u32, u32), minutes: i32) -> TimelineItem {
        let start = NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap();
        TimelineItem::new(Uuid::nil(), title, start, minutes)
    }

    #[test]
    fn overlapping_pair_is_reported_once() {
        let a = item("A", (10, 0), 60);
        let b = item("B", (10, 30), 60);
        let conflicts = detect_conflicts(&[b.clone(), a.clone()]);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Overlap);
        assert!(conflict.involves(a.id) && conflict.involves(b.id));
        assert_eq!(conflict.item1_title, "A");
        assert_eq!(conflict.overlap_minutes, 30);
    }

    #[test]
    fn back_to_back_items_do_not_conflict() {
        let a = item("A", (10, 0), 60);
        let b = item("B", (11, 0), 60);
        assert!(detect_conflicts(&[a, b]).is_empty());
    }

    #[test]
    fn spanning_item_conflicts_with_everything_it_covers() {
        let band = item("Live band", (18, 0), 240);
        let dinner = item("Dinner", (18, 30), 60);
        let speech = item("Speech", (20, 0), 15);
        let cake = item("Cake", (21, 0), 30);
        let after = item("Fireworks", (22, 0), 15);
        let conflicts = detect_conflicts(&[band.clone(), dinner, speech, cake, after.clone()]);

        assert_eq!(conflicts.len(), 3);
        assert!(conflicts.iter().all(|conflict| conflict.involves(band.id)));
        assert!(!conflicts.iter().any(|conflict| conflict.involves(after.id)));
    }

    #[test]
    fn overnight_item_conflicts_past_midnight() {
        let party = item("After party", (23, 0), 120);
        let late = item("Last call", (23, 45), 30);
        let conflicts = detect_conflicts(&[party, late]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].overlap_minutes, 30);
    }

    #[test]
    fn warnings_cover_missing_types_and_skipped_critical_items() {
        let mut setup = item("Setup", (8, 0), 60);
        setup.item_type = ItemType::Setup;
        let mut vows = item("Vows", (15, 0), 30);
        vows.is_critical = true;
        vows.status = ItemStatus::Skipped;

        let warnings = collect_warnings(&[setup, vows.clone()]);
        let missing: Vec<_> = warnings
            .iter()
            .filter(|w| w.kind == WarningKind::MissingCritical)
            .filter_map(|w| w.item_type)
            .collect();
        assert_eq!(missing, vec![ItemType::Arrival, ItemType::Cleanup]);
        assert!(warnings
            .iter()
            .any(|w| w.kind == WarningKind::CriticalSkipped && w.item_id == Some(vows.id)));
    }

    #[test]
    fn report_validity_ignores_warnings() {
        let report = ValidationReport::build(&[item("Solo", (9, 0), 30)], Vec::new());
        assert!(report.is_valid);
        assert_eq!(report.total_items, 1);
        assert_eq!(report.warnings.len(), 3);
    }
}
