//! Snapshot reconciliation.
//!
//! [`merge`] combines the local snapshot with one received from a peer into
//! a new snapshot. It is a pure function: no I/O, no clock, and neither
//! input is modified.
//!
//! Rules:
//! - **Tasks**: union by id. On collision the remote task replaces the local
//!   one only if its instant is strictly later (see [`MergePolicy`]).
//! - **Categories**: union by id. On collision local always wins.
//! - **Settings**: the whole object from the snapshot with the larger
//!   snapshot timestamp; remote on a tie.
//! - **Timestamp**: the larger of the two.
//! - **Version**: always the local one.
//!
//! Output order follows the local side, with remote-only entries appended
//! in remote order.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskflow_sync_types::{Category, Snapshot, Task};

/// Which task instant decides a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Compare `createdAt`. Only resolves creation-time races: an edit never
    /// bumps `createdAt`, so edits on either side are invisible to it.
    /// Wire-compatible with every existing peer.
    #[default]
    CreatedAt,
    /// Compare `updatedAt`, falling back to `createdAt` when unset.
    /// Resolves edit races, but peers running `CreatedAt` will disagree
    /// with the outcome.
    LastModified,
}

impl MergePolicy {
    fn instant_of<'a>(&self, task: &'a Task) -> &'a str {
        match self {
            MergePolicy::CreatedAt => &task.created_at,
            MergePolicy::LastModified => task.updated_at.as_deref().unwrap_or(&task.created_at),
        }
    }

    /// Whether `remote` should replace `local` for the same task id.
    ///
    /// An instant that does not parse never wins.
    pub fn remote_wins(&self, local: &Task, remote: &Task) -> bool {
        match (
            parse_instant(self.instant_of(local)),
            parse_instant(self.instant_of(remote)),
        ) {
            (Some(l), Some(r)) => r > l,
            _ => false,
        }
    }
}

/// Merge with the default [`MergePolicy::CreatedAt`] rule.
pub fn merge(local: &Snapshot, remote: &Snapshot) -> Snapshot {
    merge_with(local, remote, MergePolicy::CreatedAt)
}

/// Merge two snapshots using the given task policy.
pub fn merge_with(local: &Snapshot, remote: &Snapshot, policy: MergePolicy) -> Snapshot {
    let settings = if local.timestamp > remote.timestamp {
        local.settings.clone()
    } else {
        remote.settings.clone()
    };

    Snapshot {
        tasks: merge_tasks(&local.tasks, &remote.tasks, policy),
        categories: merge_categories(&local.categories, &remote.categories),
        settings,
        timestamp: local.timestamp.max(remote.timestamp),
        version: local.version.clone(),
    }
}

fn merge_tasks(local: &[Task], remote: &[Task], policy: MergePolicy) -> Vec<Task> {
    let mut merged: Vec<Task> = Vec::with_capacity(local.len() + remote.len());
    let mut index: HashMap<&str, usize> = HashMap::new();

    for task in local {
        upsert(&mut merged, &mut index, task);
    }

    for task in remote {
        match index.get(task.id.as_str()) {
            Some(&i) => {
                if policy.remote_wins(&merged[i], task) {
                    merged[i] = task.clone();
                }
            }
            None => upsert(&mut merged, &mut index, task),
        }
    }

    merged
}

fn merge_categories(local: &[Category], remote: &[Category]) -> Vec<Category> {
    let mut merged: Vec<Category> = Vec::with_capacity(local.len() + remote.len());
    let mut index: HashMap<&str, usize> = HashMap::new();

    for category in local {
        match index.get(category.id.as_str()) {
            Some(&i) => merged[i] = category.clone(),
            None => {
                index.insert(&category.id, merged.len());
                merged.push(category.clone());
            }
        }
    }

    for category in remote {
        if !index.contains_key(category.id.as_str()) {
            index.insert(&category.id, merged.len());
            merged.push(category.clone());
        }
    }

    merged
}

/// Insert or overwrite in place, keeping the first position of an id.
fn upsert<'a>(merged: &mut Vec<Task>, index: &mut HashMap<&'a str, usize>, task: &'a Task) {
    match index.get(task.id.as_str()) {
        Some(&i) => merged[i] = task.clone(),
        None => {
            index.insert(&task.id, merged.len());
            merged.push(task.clone());
        }
    }
}

/// Parse an ISO instant. Accepts RFC 3339 and bare `YYYY-MM-DD` (UTC midnight).
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use taskflow_sync_types::Settings;

    fn task(id: &str, title: &str, created_at: &str) -> Task {
        Task::new(id, title, created_at)
    }

    fn snapshot(tasks: Vec<Task>, categories: Vec<Category>, timestamp: i64) -> Snapshot {
        Snapshot {
            tasks,
            categories,
            settings: Settings::default(),
            timestamp,
            version: "1.0.0".into(),
        }
    }

    fn settings_with_color(color: &str) -> Settings {
        Settings {
            primary_color: color.into(),
            ..Settings::default()
        }
    }

    // ===========================================
    // Task Rules
    // ===========================================

    #[test]
    fn later_created_remote_task_wins() {
        let local = snapshot(vec![task("t1", "A", "2024-01-01T00:00:00Z")], vec![], 100);
        let remote = snapshot(vec![task("t1", "B", "2024-01-02T00:00:00Z")], vec![], 100);

        let merged = merge(&local, &remote);
        assert_eq!(merged.tasks.len(), 1);
        assert_eq!(merged.tasks[0].title, "B");
    }

    #[test]
    fn earlier_created_remote_task_loses() {
        let local = snapshot(vec![task("t1", "A", "2024-01-02T00:00:00Z")], vec![], 100);
        let remote = snapshot(vec![task("t1", "B", "2024-01-01T00:00:00Z")], vec![], 100);

        let merged = merge(&local, &remote);
        assert_eq!(merged.tasks[0].title, "A");
    }

    #[test]
    fn later_created_task_wins_from_either_side() {
        let a = snapshot(vec![task("t1", "A", "2024-01-01T00:00:00Z")], vec![], 100);
        let b = snapshot(vec![task("t1", "B", "2024-01-02T00:00:00Z")], vec![], 100);

        assert_eq!(merge(&a, &b).tasks[0].title, "B");
        assert_eq!(merge(&b, &a).tasks[0].title, "B");
    }

    #[test]
    fn equal_created_at_keeps_local() {
        let local = snapshot(vec![task("t1", "A", "2024-01-01T00:00:00Z")], vec![], 100);
        let remote = snapshot(vec![task("t1", "B", "2024-01-01T00:00:00Z")], vec![], 999);

        assert_eq!(merge(&local, &remote).tasks[0].title, "A");
    }

    #[test]
    fn instants_compare_by_time_not_text() {
        // Same instant written with an offset: not later, so local stays.
        let local = snapshot(vec![task("t1", "A", "2024-01-01T02:00:00+02:00")], vec![], 0);
        let remote = snapshot(vec![task("t1", "B", "2024-01-01T00:00:00Z")], vec![], 0);
        assert_eq!(merge(&local, &remote).tasks[0].title, "A");

        // Later instant with fractional seconds.
        let remote = snapshot(vec![task("t1", "C", "2024-01-01T00:00:00.001Z")], vec![], 0);
        assert_eq!(merge(&local, &remote).tasks[0].title, "C");
    }

    #[test]
    fn unparseable_instant_never_wins() {
        let local = snapshot(vec![task("t1", "A", "not a date")], vec![], 0);
        let remote = snapshot(vec![task("t1", "B", "2030-01-01T00:00:00Z")], vec![], 0);
        assert_eq!(merge(&local, &remote).tasks[0].title, "A");

        let local = snapshot(vec![task("t1", "A", "2020-01-01T00:00:00Z")], vec![], 0);
        let remote = snapshot(vec![task("t1", "B", "garbage")], vec![], 0);
        assert_eq!(merge(&local, &remote).tasks[0].title, "A");
    }

    #[test]
    fn date_only_instants_parse() {
        let local = snapshot(vec![task("t1", "A", "2024-01-01")], vec![], 0);
        let remote = snapshot(vec![task("t1", "B", "2024-01-01T00:00:01Z")], vec![], 0);
        assert_eq!(merge(&local, &remote).tasks[0].title, "B");
    }

    #[test]
    fn tasks_present_on_one_side_are_kept() {
        let local = snapshot(vec![task("l1", "local only", "2024-01-01T00:00:00Z")], vec![], 0);
        let remote = snapshot(vec![task("r1", "remote only", "2024-01-01T00:00:00Z")], vec![], 0);

        let merged = merge(&local, &remote);
        let ids: Vec<&str> = merged.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["l1", "r1"]);
    }

    #[test]
    fn replaced_task_keeps_local_position() {
        let local = snapshot(
            vec![
                task("a", "A", "2024-01-01T00:00:00Z"),
                task("b", "B", "2024-01-01T00:00:00Z"),
            ],
            vec![],
            0,
        );
        let remote = snapshot(
            vec![
                task("c", "C", "2024-01-01T00:00:00Z"),
                task("a", "A2", "2024-02-01T00:00:00Z"),
            ],
            vec![],
            0,
        );

        let merged = merge(&local, &remote);
        let titles: Vec<&str> = merged.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A2", "B", "C"]);
    }

    #[test]
    fn edit_is_invisible_to_created_at_policy() {
        let mut edited = task("t1", "edited remotely", "2024-01-01T00:00:00Z");
        edited.updated_at = Some("2024-03-01T00:00:00Z".into());

        let local = snapshot(vec![task("t1", "original", "2024-01-01T00:00:00Z")], vec![], 0);
        let remote = snapshot(vec![edited], vec![], 0);

        assert_eq!(merge(&local, &remote).tasks[0].title, "original");
        assert_eq!(
            merge_with(&local, &remote, MergePolicy::LastModified).tasks[0].title,
            "edited remotely"
        );
    }

    #[test]
    fn last_modified_falls_back_to_created_at() {
        let local = snapshot(vec![task("t1", "A", "2024-01-01T00:00:00Z")], vec![], 0);
        let remote = snapshot(vec![task("t1", "B", "2024-01-05T00:00:00Z")], vec![], 0);

        assert_eq!(
            merge_with(&local, &remote, MergePolicy::LastModified).tasks[0].title,
            "B"
        );
    }

    // ===========================================
    // Category Rules
    // ===========================================

    #[test]
    fn local_category_wins_on_collision() {
        let local = snapshot(vec![], vec![Category::new("c1", "Work", "#111111")], 0);
        let remote = snapshot(vec![], vec![Category::new("c1", "Job", "#222222")], 999);

        let merged = merge(&local, &remote);
        assert_eq!(merged.categories, vec![Category::new("c1", "Work", "#111111")]);
    }

    #[test]
    fn remote_only_categories_are_appended() {
        let local = snapshot(vec![], vec![Category::new("c1", "Work", "#111111")], 0);
        let remote = snapshot(vec![], vec![Category::new("c2", "Home", "#222222")], 0);

        let merged = merge(&local, &remote);
        let ids: Vec<&str> = merged.categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    // ===========================================
    // Snapshot-Level Rules
    // ===========================================

    #[test]
    fn settings_follow_larger_timestamp() {
        let mut local = snapshot(vec![], vec![], 100);
        local.settings = settings_with_color("red");
        let mut remote = snapshot(vec![], vec![], 200);
        remote.settings = settings_with_color("green");

        let merged = merge(&local, &remote);
        assert_eq!(merged.settings.primary_color, "green");
        assert_eq!(merged.timestamp, 200);

        let merged = merge(&remote, &local);
        assert_eq!(merged.settings.primary_color, "green");
        assert_eq!(merged.timestamp, 200);
    }

    #[test]
    fn settings_tie_goes_to_remote() {
        let mut local = snapshot(vec![], vec![], 100);
        local.settings = settings_with_color("red");
        let mut remote = snapshot(vec![], vec![], 100);
        remote.settings = settings_with_color("green");

        assert_eq!(merge(&local, &remote).settings.primary_color, "green");
    }

    #[test]
    fn version_is_always_local() {
        let mut local = snapshot(vec![], vec![], 100);
        local.version = "1.0.0".into();
        let mut remote = snapshot(vec![], vec![], 500);
        remote.version = "2.0.0".into();

        assert_eq!(merge(&local, &remote).version, "1.0.0");
    }

    #[test]
    fn inputs_are_untouched() {
        let local = snapshot(vec![task("t1", "A", "2024-01-01T00:00:00Z")], vec![], 1);
        let remote = snapshot(vec![task("t1", "B", "2024-01-02T00:00:00Z")], vec![], 2);
        let (local_before, remote_before) = (local.clone(), remote.clone());

        let _ = merge(&local, &remote);

        assert_eq!(local, local_before);
        assert_eq!(remote, remote_before);
    }

    // ===========================================
    // Properties
    // ===========================================

    fn arb_categories() -> impl Strategy<Value = Vec<Category>> {
        prop::collection::hash_map("[a-f]{1,2}", ("[A-Z][a-z]{0,5}", "#[0-9a-f]{6}"), 0..12)
            .prop_map(|m| {
                m.into_iter()
                    .map(|(id, (name, color))| Category { id, name, color })
                    .collect()
            })
    }

    fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
        prop::collection::hash_map("[a-f]{1,2}", ("[a-z]{1,6}", 1u32..28), 0..12).prop_map(|m| {
            m.into_iter()
                .map(|(id, (title, day))| {
                    Task::new(&id, &title, &format!("2024-01-{:02}T00:00:00Z", day))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn category_union_keeps_every_id_once_with_local_precedence(
            local in arb_categories(),
            remote in arb_categories(),
        ) {
            let merged = merge(&snapshot(vec![], local.clone(), 0), &snapshot(vec![], remote.clone(), 0));

            let expected: HashSet<&str> = local.iter().chain(remote.iter()).map(|c| c.id.as_str()).collect();
            let seen: Vec<&str> = merged.categories.iter().map(|c| c.id.as_str()).collect();
            let unique: HashSet<&str> = seen.iter().copied().collect();

            prop_assert_eq!(seen.len(), unique.len());
            prop_assert_eq!(unique, expected);
            for l in &local {
                prop_assert_eq!(merged.category(&l.id), Some(l));
            }
        }

        #[test]
        fn task_winner_does_not_depend_on_which_side_is_local(
            a in arb_tasks(),
            b in arb_tasks(),
        ) {
            let sa = snapshot(a.clone(), vec![], 0);
            let sb = snapshot(b.clone(), vec![], 0);
            let ab = merge(&sa, &sb);
            let ba = merge(&sb, &sa);

            for t in &ab.tasks {
                let other = ba.task(&t.id).unwrap();
                // Equal instants keep local, so only strictly ordered pairs must agree.
                if t.created_at != other.created_at {
                    prop_assert!(false, "winner differs for {}", t.id);
                }
            }
            prop_assert_eq!(ab.tasks.len(), ba.tasks.len());
        }

        #[test]
        fn merge_result_timestamp_is_max(lt in 0i64..1_000_000, rt in 0i64..1_000_000) {
            let merged = merge(&snapshot(vec![], vec![], lt), &snapshot(vec![], vec![], rt));
            prop_assert_eq!(merged.timestamp, lt.max(rt));
        }
    }
}
