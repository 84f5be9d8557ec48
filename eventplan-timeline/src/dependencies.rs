use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use eventplan_core::errors::{PlannerError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::model::{Dependency, DependencyType, TimelineItem};

/// An edge whose constraint is not met by the current planned windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyViolation {
    pub dependency_id: Uuid,
    pub dependency_type: DependencyType,
    pub item_id: Uuid,
    pub item_title: String,
    pub depends_on_id: Uuid,
    pub depends_on_title: String,
    pub lag_minutes: i32,
    /// Minutes past the required point, always positive.
    pub shortfall_minutes: i64,
    pub message: String,
}

/// Whether adding `item_id -> depends_on_id` would close a cycle.
pub fn would_create_cycle(existing: &[Dependency], item_id: Uuid, depends_on_id: Uuid) -> bool {
    if item_id == depends_on_id {
        return true;
    }
    let mut prerequisites: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for dep in existing {
        prerequisites
            .entry(dep.item_id)
            .or_default()
            .push(dep.depends_on_id);
    }

    let mut stack = vec![depends_on_id];
    let mut visited = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == item_id {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = prerequisites.get(&node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

/// Orders items so every prerequisite precedes its dependents.
///
/// Ties keep the incoming item order. Edges naming unknown items are ignored.
pub fn topological_order(items: &[TimelineItem], deps: &[Dependency]) -> Result<Vec<Uuid>> {
    let position: HashMap<Uuid, usize> = items
        .iter()
        .enumerate()
        .map(|(index, item)| (item.id, index))
        .collect();

    let mut indegree = vec![0usize; items.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for dep in deps {
        let (Some(&from), Some(&to)) = (position.get(&dep.depends_on_id), position.get(&dep.item_id))
        else {
            continue;
        };
        dependents[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse(index))
        .collect();

    let mut ordered = Vec::with_capacity(items.len());
    while let Some(Reverse(index)) = ready.pop() {
        ordered.push(items[index].id);
        for &next in &dependents[index] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if ordered.len() != items.len() {
        return Err(PlannerError::invalid(
            "timeline dependencies contain a cycle",
        ));
    }
    Ok(ordered)
}

/// Evaluates every edge against planned windows, reporting dependents in topological order.
pub fn check_dependencies(
    items: &[TimelineItem],
    deps: &[Dependency],
) -> Result<Vec<DependencyViolation>> {
    let order = topological_order(items, deps)?;
    let by_id: HashMap<Uuid, &TimelineItem> = items.iter().map(|item| (item.id, item)).collect();
    let rank: HashMap<Uuid, usize> = order
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, index))
        .collect();

    let mut edges: Vec<&Dependency> = deps
        .iter()
        .filter(|dep| by_id.contains_key(&dep.item_id) && by_id.contains_key(&dep.depends_on_id))
        .collect();
    edges.sort_by_key(|dep| rank.get(&dep.item_id).copied().unwrap_or(usize::MAX));

    let mut violations = Vec::new();
    for dep in edges {
        let (Some(item), Some(prerequisite)) = (by_id.get(&dep.item_id), by_id.get(&dep.depends_on_id))
        else {
            continue;
        };
        let (item_start, item_end) = item.window();
        let (pre_start, pre_end) = prerequisite.window();
        let lag = i64::from(dep.lag_minutes);

        let (actual, required, rule) = match dep.dependency_type {
            DependencyType::FinishToStart => (item_start, pre_end + lag, "start after the end of"),
            DependencyType::StartToStart => (item_start, pre_start + lag, "start after the start of"),
            DependencyType::FinishToFinish => (item_end, pre_end + lag, "end after the end of"),
            DependencyType::StartToFinish => (item_end, pre_start + lag, "end after the start of"),
        };

        if actual < required {
            violations.push(DependencyViolation {
                dependency_id: dep.id,
                dependency_type: dep.dependency_type,
                item_id: item.id,
                item_title: item.title.clone(),
                depends_on_id: prerequisite.id,
                depends_on_title: prerequisite.title.clone(),
                lag_minutes: dep.lag_minutes,
                shortfall_minutes: required - actual,
                message: format!(
                    "'{}' must {} '{}' (lag {} min)",
                    item.title, rule, prerequisite.title, dep.lag_minutes
                ),
            });
        }
    }

    debug!(edges = deps.len(), violations = violations.len(), "checked timeline dependencies");
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};

    fn item(title: &str, hour: u32, minutes: i32) -> TimelineItem {
        let start = NaiveTime::from_hms_opt(hour, 0, 0).unwrap();
        TimelineItem::new(Uuid::nil(), title, start, minutes)
    }

    fn edge(item: &TimelineItem, on: &TimelineItem, kind: DependencyType, lag: i32) -> Dependency {
        Dependency {
            id: Uuid::new_v4(),
            item_id: item.id,
            depends_on_id: on.id,
            dependency_type: kind,
            lag_minutes: lag,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn detects_cycles_through_chains() {
        let a = item("A", 9, 30);
        let b = item("B", 10, 30);
        let c = item("C", 11, 30);
        let deps = vec![
            edge(&b, &a, DependencyType::FinishToStart, 0),
            edge(&c, &b, DependencyType::FinishToStart, 0),
        ];
        assert!(would_create_cycle(&deps, a.id, c.id));
        assert!(would_create_cycle(&deps, a.id, a.id));
        assert!(!would_create_cycle(&deps, c.id, a.id));
    }

    #[test]
    fn topological_order_puts_prerequisites_first() {
        let a = item("A", 9, 30);
        let b = item("B", 10, 30);
        let c = item("C", 11, 30);
        let deps = vec![edge(&a, &c, DependencyType::FinishToStart, 0)];
        let order = topological_order(&[a.clone(), b.clone(), c.clone()], &deps).unwrap();
        assert_eq!(order, vec![b.id, c.id, a.id]);
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let a = item("A", 9, 30);
        let b = item("B", 10, 30);
        let deps = vec![
            edge(&a, &b, DependencyType::FinishToStart, 0),
            edge(&b, &a, DependencyType::FinishToStart, 0),
        ];
        assert!(matches!(
            topological_order(&[a, b], &deps),
            Err(PlannerError::Validation(_))
        ));
    }

    #[test]
    fn finish_to_start_honours_lag() {
        let setup = item("Setup", 9, 60);
        let doors = item("Doors", 10, 30);
        let ok = check_dependencies(
            &[setup.clone(), doors.clone()],
            &[edge(&doors, &setup, DependencyType::FinishToStart, 0)],
        )
        .unwrap();
        assert!(ok.is_empty());

        let late = check_dependencies(
            &[setup.clone(), doors.clone()],
            &[edge(&doors, &setup, DependencyType::FinishToStart, 15)],
        )
        .unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].shortfall_minutes, 15);
        assert_eq!(late[0].depends_on_title, "Setup");
    }

    #[test]
    fn other_constraint_kinds() {
        let a = item("A", 9, 120);
        let b = item("B", 10, 30);
        let items = [a.clone(), b.clone()];

        let ss = check_dependencies(&items, &[edge(&b, &a, DependencyType::StartToStart, 0)]).unwrap();
        assert!(ss.is_empty());

        let ff = check_dependencies(&items, &[edge(&b, &a, DependencyType::FinishToFinish, 0)]).unwrap();
        assert_eq!(ff.len(), 1);
        assert_eq!(ff[0].shortfall_minutes, 30);

        let sf = check_dependencies(&items, &[edge(&b, &a, DependencyType::StartToFinish, -120)]).unwrap();
        assert!(sf.is_empty());
    }
}
