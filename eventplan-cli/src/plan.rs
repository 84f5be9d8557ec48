use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveTime, Utc};
use colored::*;
use eventplan_core::errors::PlannerError;
use eventplan_core::serde_utils::{from_json_str, to_pretty_json};
use eventplan_timeline::conflicts::ValidationReport;
use eventplan_timeline::dependencies::would_create_cycle;
use eventplan_timeline::model::{Dependency, DependencyType, ItemStatus, Timeline, TimelineItem};
use eventplan_timeline::progress::TimelineProgress;
use eventplan_timeline::requests::NewTimelineItem;
use eventplan_timeline::store::sort_items;
use eventplan_timeline::time_of_day;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Plan(#[from] PlannerError),
    #[error("{0}")]
    Validation(String),
    #[error("timeline has {0} conflicting item pair(s)")]
    Conflicts(usize),
}

/// Hand-editable timeline document. Dependencies refer to items by `key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    pub title: String,
    #[serde(
        default,
        with = "time_of_day::flexible_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<NaiveTime>,
    #[serde(
        default,
        with = "time_of_day::flexible_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub items: Vec<PlanItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PlanDependency>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(flatten)]
    pub item: NewTimelineItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDependency {
    pub item: String,
    pub depends_on: String,
    #[serde(default)]
    pub dependency_type: DependencyType,
    #[serde(default)]
    pub lag_minutes: i32,
}

/// A plan file resolved into engine types.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub timeline: Timeline,
    pub items: Vec<TimelineItem>,
    pub dependencies: Vec<Dependency>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(from_json_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        fs::write(path, self.to_json()?).map_err(|source| CliError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, CliError> {
        Ok(to_pretty_json(self)?)
    }

    /// Plan document for already materialized items, keyed `item-1`, `item-2`, ...
    pub fn from_items(
        title: impl Into<String>,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
        items: &[TimelineItem],
    ) -> Self {
        let items = items
            .iter()
            .enumerate()
            .map(|(position, item)| PlanItem {
                key: Some(format!("item-{}", position + 1)),
                status: item.status,
                item: NewTimelineItem {
                    title: item.title.clone(),
                    description: item.description.clone(),
                    item_type: Some(item.item_type),
                    start_time: Some(item.start_time),
                    end_time: item.end_time,
                    duration_minutes: Some(item.duration_minutes),
                    buffer_minutes: Some(item.buffer_minutes),
                    order_index: Some(item.order_index),
                    is_critical: item.is_critical,
                    is_flexible: Some(item.is_flexible),
                    requirements: item.requirements.clone(),
                    notes: item.notes.clone(),
                    location: item.location.clone(),
                    assigned_to: item.assigned_to,
                    task_id: item.task_id,
                },
            })
            .collect();

        Self {
            title: title.into(),
            start_time,
            end_time,
            items,
            dependencies: Vec::new(),
        }
    }

    pub fn build(self) -> Result<LoadedPlan, CliError> {
        let mut timeline = Timeline::new(Uuid::nil(), Uuid::nil(), self.title);
        timeline.start_time = self.start_time;
        timeline.end_time = self.end_time;

        let mut keys: HashMap<String, Uuid> = HashMap::new();
        let mut items = Vec::with_capacity(self.items.len());
        for (position, entry) in self.items.into_iter().enumerate() {
            let mut item = entry.item.into_item(timeline.id, position as i32)?;
            item.status = entry.status;
            if let Some(key) = entry.key {
                if keys.insert(key.clone(), item.id).is_some() {
                    return Err(CliError::Validation(format!("duplicate item key '{key}'")));
                }
            }
            items.push(item);
        }
        sort_items(&mut items);

        let lookup = |key: &str| {
            keys.get(key)
                .copied()
                .ok_or_else(|| CliError::Validation(format!("unknown item key '{key}'")))
        };
        let mut dependencies: Vec<Dependency> = Vec::with_capacity(self.dependencies.len());
        for link in self.dependencies {
            let item_id = lookup(&link.item)?;
            let depends_on_id = lookup(&link.depends_on)?;
            if item_id == depends_on_id {
                return Err(CliError::Validation(format!(
                    "item '{}' cannot depend on itself",
                    link.item
                )));
            }
            if would_create_cycle(&dependencies, item_id, depends_on_id) {
                return Err(CliError::Validation(format!(
                    "dependency '{}' -> '{}' would create a cycle",
                    link.item, link.depends_on
                )));
            }
            dependencies.push(Dependency {
                id: Uuid::new_v4(),
                item_id,
                depends_on_id,
                dependency_type: link.dependency_type,
                lag_minutes: link.lag_minutes,
                created_at: Utc::now(),
            });
        }

        timeline.total_duration_minutes = items.iter().map(|item| item.duration_minutes).sum();
        Ok(LoadedPlan {
            timeline,
            items,
            dependencies,
        })
    }
}

fn clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn item_line(item: &TimelineItem) -> String {
    format!(
        "{}-{} {} [{}]",
        clock(item.start_time),
        clock(item.planned_end()),
        item.title,
        item.status
    )
}

pub fn print_validation(plan: &LoadedPlan, report: &ValidationReport) {
    let headline = if report.is_valid {
        "✔ Timeline is valid:".green().bold()
    } else {
        "✘ Timeline has conflicts:".red().bold()
    };
    println!("{} {}", headline, plan.timeline.title.bold());
    println!("  Items: {}", report.total_items);
    println!("  Total duration: {} min", plan.timeline.total_duration_minutes);

    for conflict in &report.conflicts {
        println!("  {} {}", "conflict".red(), conflict.message);
    }
    for violation in &report.dependency_violations {
        println!("  {} {}", "dependency".yellow(), violation.message);
    }
    for warning in &report.warnings {
        println!("  {} {}", "warning".yellow(), warning.message);
    }
}

pub fn print_progress(
    plan: &LoadedPlan,
    progress: &TimelineProgress,
    overdue: &[TimelineItem],
    upcoming: &[TimelineItem],
    now: NaiveTime,
) {
    let stats = &progress.statistics;
    println!(
        "{} {} at {}",
        "Timeline progress:".green().bold(),
        plan.timeline.title.bold(),
        clock(now)
    );
    println!(
        "  Completed: {}/{} ({:.2}%)",
        stats.completed_items, stats.total_items, stats.completion_percentage
    );
    println!(
        "  In progress: {}  Pending: {}  Overdue: {}",
        stats.in_progress_items, stats.pending_items, stats.overdue_items
    );
    println!("  Time elapsed: {:.2}%", progress.time_progress_percentage);
    let schedule = if progress.is_on_schedule {
        "on schedule".green()
    } else {
        "behind schedule".red()
    };
    println!("  Status: {schedule}");

    if let Some(current) = &progress.current_item {
        println!("  Now: {}", item_line(current));
    }
    for item in &progress.next_items {
        println!("  Next: {}", item_line(item));
    }
    for item in overdue {
        println!("  {} {}", "overdue".red(), item_line(item));
    }
    for item in upcoming {
        println!("  {} {}", "upcoming".cyan(), item_line(item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventplan_timeline::conflicts::detect_conflicts;
    use eventplan_timeline::model::ItemType;
    use tempfile::tempdir;

    const PLAN: &str = r#"{
        "title": "Garden party",
        "start_time": "14:00",
        "end_time": "18:00",
        "items": [
            { "key": "setup", "title": "Setup", "item_type": "setup", "start_time": "14:00", "duration_minutes": 60, "status": "completed" },
            { "key": "welcome", "title": "Welcome drinks", "start_time": "14:45", "duration_minutes": 45 },
            { "key": "cleanup", "title": "Cleanup", "item_type": "cleanup", "start_time": "17:30", "duration_minutes": 30 }
        ],
        "dependencies": [
            { "item": "welcome", "depends_on": "setup" }
        ]
    }"#;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn loads_plan_from_disk() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("plan.json");
        fs::write(&path, PLAN).expect("write plan");

        let plan = PlanFile::load(&path).expect("load").build().expect("build");
        assert_eq!(plan.timeline.title, "Garden party");
        assert_eq!(plan.timeline.start_time, Some(hm(14, 0)));
        assert_eq!(plan.timeline.total_duration_minutes, 135);
        assert_eq!(plan.items.len(), 3);
        assert_eq!(plan.items[0].status, ItemStatus::Completed);
        assert_eq!(plan.items[1].end_time, Some(hm(15, 30)));
        assert_eq!(plan.dependencies.len(), 1);
        assert_eq!(plan.dependencies[0].depends_on_id, plan.items[0].id);

        let conflicts = detect_conflicts(&plan.items);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].overlap_minutes, 15);
    }

    #[test]
    fn unknown_dependency_keys_are_rejected() {
        let mut plan: PlanFile = from_json_str(PLAN).unwrap();
        plan.dependencies.push(PlanDependency {
            item: "cleanup".into(),
            depends_on: "dessert".into(),
            dependency_type: DependencyType::default(),
            lag_minutes: 0,
        });
        assert!(matches!(plan.build(), Err(CliError::Validation(message)) if message.contains("dessert")));
    }

    #[test]
    fn cyclic_dependencies_are_rejected() {
        let mut plan: PlanFile = from_json_str(PLAN).unwrap();
        plan.dependencies.push(PlanDependency {
            item: "setup".into(),
            depends_on: "welcome".into(),
            dependency_type: DependencyType::default(),
            lag_minutes: 0,
        });
        assert!(matches!(plan.build(), Err(CliError::Validation(message)) if message.contains("cycle")));
    }

    #[test]
    fn saved_item_plans_reload_unchanged() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("generated.json");
        let timeline_id = Uuid::new_v4();
        let items = vec![
            TimelineItem::new(timeline_id, "Setup", hm(9, 0), 60),
            TimelineItem::new(timeline_id, "Talk", hm(10, 0), 45),
        ];

        PlanFile::from_items("Conference", Some(hm(9, 0)), None, &items)
            .save(&path)
            .expect("save");
        let reloaded = PlanFile::load(&path).expect("load");
        assert_eq!(reloaded.items[1].key.as_deref(), Some("item-2"));

        let plan = reloaded.build().expect("build");
        let starts: Vec<NaiveTime> = plan.items.iter().map(|item| item.start_time).collect();
        assert_eq!(starts, vec![hm(9, 0), hm(10, 0)]);
        assert_eq!(plan.items[1].item_type, ItemType::Activity);
        assert_eq!(plan.items[1].end_time, Some(hm(10, 45)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = PlanFile::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
