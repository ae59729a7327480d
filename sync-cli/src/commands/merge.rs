//! Offline merge of two snapshot files.

use anyhow::Result;
use std::path::Path;
use taskflow_sync_core::{merge_with, MergePolicy};
use taskflow_sync_types::Snapshot;

use crate::config::{read_snapshot, write_snapshot};

/// Run the merge command.
///
/// Prints the merged snapshot to stdout unless `out` is given.
pub async fn run(
    local: &Path,
    remote: &Path,
    policy: MergePolicy,
    out: Option<&Path>,
) -> Result<Snapshot> {
    let local_snapshot = read_snapshot(local).await?;
    let remote_snapshot = read_snapshot(remote).await?;

    let merged = merge_with(&local_snapshot, &remote_snapshot, policy);
    tracing::info!(
        ?policy,
        local_tasks = local_snapshot.tasks.len(),
        remote_tasks = remote_snapshot.tasks.len(),
        merged_tasks = merged.tasks.len(),
        "merged snapshots"
    );

    match out {
        Some(path) => {
            write_snapshot(path, &merged).await?;
            println!("Merged snapshot written to {}", path.display());
        }
        None => println!("{}", merged.to_json_pretty()?),
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_sync_types::{Category, Task};
    use tempfile::tempdir;

    async fn write(dir: &Path, name: &str, snapshot: &Snapshot) -> std::path::PathBuf {
        let path = dir.join(name);
        write_snapshot(&path, snapshot).await.unwrap();
        path
    }

    fn edited(mut task: Task, title: &str, updated_at: &str) -> Task {
        task.title = title.into();
        task.updated_at = Some(updated_at.into());
        task
    }

    #[tokio::test]
    async fn merge_writes_output_file() {
        let dir = tempdir().unwrap();

        let mut local = Snapshot::empty_at(100);
        local.tasks.push(Task::new("t1", "A", "2024-01-01T00:00:00Z"));
        local.categories.push(Category::new("c1", "Work", "#ff0000"));

        let mut remote = Snapshot::empty_at(200);
        remote.tasks.push(Task::new("t1", "B", "2024-01-02T00:00:00Z"));
        remote.tasks.push(Task::new("t2", "C", "2024-01-03T00:00:00Z"));
        remote.categories.push(Category::new("c1", "Work", "#00ff00"));

        let local_path = write(dir.path(), "local.json", &local).await;
        let remote_path = write(dir.path(), "remote.json", &remote).await;
        let out = dir.path().join("merged.json");

        let merged = run(&local_path, &remote_path, MergePolicy::CreatedAt, Some(&out))
            .await
            .unwrap();

        let written = read_snapshot(&out).await.unwrap();
        assert_eq!(written, merged);
        assert_eq!(merged.task("t1").unwrap().title, "B");
        assert!(merged.task("t2").is_some());
        assert_eq!(merged.category("c1").unwrap().color, "#ff0000");
        assert_eq!(merged.timestamp, 200);
    }

    #[tokio::test]
    async fn policy_decides_edit_races() {
        let dir = tempdir().unwrap();
        let base = Task::new("t1", "Draft", "2024-01-01T00:00:00Z");

        let mut local = Snapshot::empty_at(100);
        local.tasks.push(edited(base.clone(), "Local edit", "2024-03-01T00:00:00Z"));
        let mut remote = Snapshot::empty_at(100);
        remote.tasks.push(edited(base, "Remote edit", "2024-04-01T00:00:00Z"));

        let local_path = write(dir.path(), "local.json", &local).await;
        let remote_path = write(dir.path(), "remote.json", &remote).await;

        let by_created = run(&local_path, &remote_path, MergePolicy::CreatedAt, None)
            .await
            .unwrap();
        assert_eq!(by_created.task("t1").unwrap().title, "Local edit");

        let by_modified = run(&local_path, &remote_path, MergePolicy::LastModified, None)
            .await
            .unwrap();
        assert_eq!(by_modified.task("t1").unwrap().title, "Remote edit");
    }

    #[tokio::test]
    async fn merge_fails_on_missing_input() {
        let dir = tempdir().unwrap();
        let local_path = write(dir.path(), "local.json", &Snapshot::empty_at(1)).await;

        let result = run(
            &local_path,
            &dir.path().join("absent.json"),
            MergePolicy::CreatedAt,
            None,
        )
        .await;
        assert!(result.is_err());
    }
}
