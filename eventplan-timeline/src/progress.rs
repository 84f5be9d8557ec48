use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::model::{ItemStatus, Timeline, TimelineItem};
use crate::time_of_day::{minutes_between, MINUTES_PER_DAY};

pub const NEXT_ITEMS_LIMIT: usize = 3;
pub const DEFAULT_UPCOMING_WINDOW_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineStatistics {
    pub total_items: usize,
    pub completed_items: usize,
    pub in_progress_items: usize,
    pub pending_items: usize,
    pub overdue_items: usize,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineProgress {
    #[serde(flatten)]
    pub statistics: TimelineStatistics,
    pub time_progress_percentage: f64,
    pub is_on_schedule: bool,
    pub current_item: Option<TimelineItem>,
    pub next_items: Vec<TimelineItem>,
    pub timeline_start: Option<NaiveTime>,
    pub timeline_end: Option<NaiveTime>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

pub fn compute_statistics(items: &[TimelineItem], now: NaiveTime) -> TimelineStatistics {
    let count = |status: ItemStatus| items.iter().filter(|item| item.status == status).count();
    let completed_items = count(ItemStatus::Completed);
    TimelineStatistics {
        total_items: items.len(),
        completed_items,
        in_progress_items: count(ItemStatus::InProgress),
        pending_items: count(ItemStatus::Pending),
        overdue_items: items.iter().filter(|item| item.is_overdue(now)).count(),
        completion_percentage: percentage(completed_items, items.len()),
    }
}

/// Elapsed share of the `start -> end` window, clamped to `[0, 100]`.
///
/// An `end` before `start` spans midnight. Outside the window the result snaps
/// to whichever bound `now` is closer to.
pub fn time_progress(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> f64 {
    let seconds = |from: NaiveTime, to: NaiveTime| {
        let delta = (to - from).num_seconds();
        if delta < 0 {
            delta + MINUTES_PER_DAY * 60
        } else {
            delta
        }
    };
    let total = seconds(start, end);
    if total == 0 {
        return 0.0;
    }
    let elapsed = seconds(start, now);
    if elapsed <= total {
        return round2(elapsed as f64 / total as f64 * 100.0);
    }
    let until_start = seconds(now, start);
    let since_end = elapsed - total;
    if until_start < since_end {
        0.0
    } else {
        100.0
    }
}

/// Items are expected in plan order.
pub fn compute_progress(timeline: &Timeline, items: &[TimelineItem], now: NaiveTime) -> TimelineProgress {
    let statistics = compute_statistics(items, now);
    let time_progress_percentage = match (timeline.start_time, timeline.end_time) {
        (Some(start), Some(end)) => time_progress(start, end, now),
        _ => 0.0,
    };
    let current_item = items
        .iter()
        .find(|item| item.status == ItemStatus::InProgress)
        .cloned();
    let next_items = items
        .iter()
        .filter(|item| item.status == ItemStatus::Pending)
        .take(NEXT_ITEMS_LIMIT)
        .cloned()
        .collect();

    TimelineProgress {
        is_on_schedule: statistics.completion_percentage >= time_progress_percentage,
        statistics,
        time_progress_percentage,
        current_item,
        next_items,
        timeline_start: timeline.start_time,
        timeline_end: timeline.end_time,
    }
}

pub fn overdue_items(items: &[TimelineItem], now: NaiveTime) -> Vec<TimelineItem> {
    items
        .iter()
        .filter(|item| item.is_overdue(now))
        .cloned()
        .collect()
}

/// Pending items starting within `within_minutes` from `now`, soonest first.
pub fn upcoming_items(items: &[TimelineItem], now: NaiveTime, within_minutes: i64) -> Vec<TimelineItem> {
    let mut upcoming: Vec<(i64, &TimelineItem)> = items
        .iter()
        .filter(|item| item.status == ItemStatus::Pending)
        .filter_map(|item| {
            let until = minutes_between(now, item.start_time);
            (until <= within_minutes).then_some((until, item))
        })
        .collect();
    upcoming.sort_by_key(|(until, _)| *until);
    upcoming.into_iter().map(|(_, item)| item.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn item(title: &str, start: NaiveTime, status: ItemStatus) -> TimelineItem {
        let mut item = TimelineItem::new(Uuid::nil(), title, start, 60);
        item.status = status;
        item
    }

    #[test]
    fn empty_timeline_reports_zero() {
        let stats = compute_statistics(&[], hm(12, 0));
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.completion_percentage, 0.0);
    }

    #[test]
    fn completion_and_overdue_counts() {
        let items = [
            item("Setup", hm(8, 0), ItemStatus::Completed),
            item("Doors", hm(9, 0), ItemStatus::Skipped),
            item("Talk", hm(10, 0), ItemStatus::InProgress),
            item("Lunch", hm(12, 0), ItemStatus::Pending),
        ];
        let stats = compute_statistics(&items, hm(11, 30));
        assert_eq!(stats.completed_items, 1);
        assert_eq!(stats.in_progress_items, 1);
        assert_eq!(stats.pending_items, 1);
        assert_eq!(stats.overdue_items, 1);
        assert_eq!(stats.completion_percentage, 25.0);
    }

    #[test]
    fn percentages_round_to_two_decimals() {
        let items = [
            item("A", hm(8, 0), ItemStatus::Completed),
            item("B", hm(9, 0), ItemStatus::Pending),
            item("C", hm(10, 0), ItemStatus::Pending),
        ];
        assert_eq!(compute_statistics(&items, hm(7, 0)).completion_percentage, 33.33);
    }

    #[test]
    fn time_progress_is_clamped() {
        assert_eq!(time_progress(hm(10, 0), hm(12, 0), hm(11, 0)), 50.0);
        assert_eq!(time_progress(hm(10, 0), hm(12, 0), hm(9, 0)), 0.0);
        assert_eq!(time_progress(hm(10, 0), hm(12, 0), hm(13, 0)), 100.0);
        assert_eq!(time_progress(hm(22, 0), hm(2, 0), hm(0, 0)), 50.0);
        assert_eq!(time_progress(hm(10, 0), hm(10, 0), hm(10, 30)), 0.0);
    }

    #[test]
    fn next_items_skip_nothing() {
        let timeline = Timeline::new(Uuid::nil(), Uuid::nil(), "Conference");
        let items = [
            item("Registration", hm(8, 0), ItemStatus::Completed),
            item("Keynote", hm(9, 0), ItemStatus::InProgress),
            item("Panel", hm(10, 0), ItemStatus::Pending),
            item("Coffee", hm(11, 0), ItemStatus::Delayed),
            item("Workshop", hm(12, 0), ItemStatus::Pending),
            item("Lunch", hm(13, 0), ItemStatus::Pending),
            item("Closing", hm(14, 0), ItemStatus::Pending),
        ];
        let progress = compute_progress(&timeline, &items, hm(9, 30));
        assert_eq!(progress.current_item.map(|item| item.title).as_deref(), Some("Keynote"));
        let next: Vec<_> = progress.next_items.iter().map(|item| item.title.as_str()).collect();
        assert_eq!(next, ["Panel", "Workshop", "Lunch"]);
        assert_eq!(progress.time_progress_percentage, 0.0);
        assert!(progress.is_on_schedule);
    }

    #[test]
    fn behind_schedule_when_time_outpaces_completion() {
        let mut timeline = Timeline::new(Uuid::nil(), Uuid::nil(), "Wedding");
        timeline.start_time = Some(hm(14, 0));
        timeline.end_time = Some(hm(18, 0));
        let items = [
            item("Ceremony", hm(14, 0), ItemStatus::Completed),
            item("Photos", hm(15, 0), ItemStatus::Pending),
            item("Reception", hm(16, 0), ItemStatus::Pending),
            item("Dance", hm(17, 0), ItemStatus::Pending),
        ];
        let progress = compute_progress(&timeline, &items, hm(17, 0));
        assert_eq!(progress.time_progress_percentage, 75.0);
        assert!(!progress.is_on_schedule);
    }

    #[test]
    fn upcoming_items_are_sorted_by_start() {
        let items = [
            item("Late", hm(20, 0), ItemStatus::Pending),
            item("Soon", hm(12, 30), ItemStatus::Pending),
            item("Done", hm(13, 0), ItemStatus::Completed),
            item("Morning", hm(8, 0), ItemStatus::Pending),
        ];
        let within_two_hours: Vec<_> = upcoming_items(&items, hm(12, 0), 120)
            .into_iter()
            .map(|item| item.title)
            .collect();
        assert_eq!(within_two_hours, ["Soon"]);

        let all_day: Vec<_> = upcoming_items(&items, hm(12, 0), DEFAULT_UPCOMING_WINDOW_MINUTES)
            .into_iter()
            .map(|item| item.title)
            .collect();
        assert_eq!(all_day, ["Soon", "Late", "Morning"]);
    }
}
