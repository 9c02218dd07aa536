//! Workspace lifecycle against real git repositories: creation, removal,
//! dirty-tree refusal, stale tracking cleanup and merging back.

use std::fs;

use hive::io::process::SystemRunner;
use hive::io::workspace::{MergeResult, WorkspaceError, WorkspaceManager};
use hive::merge::{
    AssistOptions, AssistOutcome, MergeAssist, inspect_workspace, locate_workspace,
};
use hive::test_support::TestRepo;

fn manager(repo: &TestRepo) -> WorkspaceManager<SystemRunner> {
    WorkspaceManager::new(SystemRunner::default(), repo.path(), "worktrees")
}

fn branch_exists(repo: &TestRepo, branch: &str) -> bool {
    !repo
        .git(&["branch", "--list", branch])
        .expect("branch list")
        .trim()
        .is_empty()
}

#[test]
fn create_then_remove_round_trip() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);

    let path = mgr.create("worker-1", "hive-a", "main", false).expect("create");
    assert_eq!(path, repo.path().join("worktrees/worker-1-hive-a"));
    assert!(mgr.exists("worker-1", "hive-a"));
    assert!(path.join("README.md").exists());
    assert!(branch_exists(&repo, "task-hive-a"));
    assert_eq!(mgr.list_managed().expect("list").len(), 1);

    mgr.remove("worker-1", "hive-a", false).expect("remove");
    assert!(!mgr.exists("worker-1", "hive-a"));
    assert!(!branch_exists(&repo, "task-hive-a"));
    assert!(mgr.list_managed().expect("list").is_empty());
}

#[test]
fn existing_workspace_requires_force() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);
    mgr.create("worker-1", "hive-a", "main", false).expect("create");

    let err = mgr
        .create("worker-1", "hive-a", "main", false)
        .expect_err("already exists");
    assert!(matches!(
        err.downcast_ref::<WorkspaceError>(),
        Some(WorkspaceError::AlreadyExists { .. })
    ));

    let path = mgr.create("worker-1", "hive-a", "main", true).expect("force create");
    assert!(path.exists());
    assert_eq!(mgr.list_managed().expect("list").len(), 1);
}

#[test]
fn dirty_workspace_needs_force_to_remove() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);
    let path = mgr.create("worker-1", "hive-a", "main", false).expect("create");
    fs::write(path.join("scratch.txt"), "work in progress\n").expect("write");

    let err = mgr.remove("worker-1", "hive-a", false).expect_err("dirty");
    assert!(matches!(
        err.downcast_ref::<WorkspaceError>(),
        Some(WorkspaceError::DirtyWorkspace { .. })
    ));
    assert!(path.exists());

    mgr.remove("worker-1", "hive-a", true).expect("force remove");
    assert!(!path.exists());
    assert!(!branch_exists(&repo, "task-hive-a"));
}

#[test]
fn removing_a_missing_directory_clears_tracking() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);
    let path = mgr.create("worker-1", "hive-a", "main", false).expect("create");
    fs::remove_dir_all(&path).expect("delete out of band");

    mgr.remove("worker-1", "hive-a", false).expect("remove");
    assert!(mgr.list_managed().expect("list").is_empty());
    assert!(!branch_exists(&repo, "task-hive-a"));
}

#[test]
fn cleanup_stale_drops_tracking_for_deleted_directories() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);
    let gone = mgr.create("worker-1", "hive-a", "main", false).expect("create");
    let kept = mgr.create("worker-2", "hive-b", "main", false).expect("create");
    fs::remove_dir_all(&gone).expect("delete out of band");

    let removed = mgr.cleanup_stale(true);
    assert_eq!(removed, vec![gone]);
    let remaining: Vec<_> = mgr
        .list_managed()
        .expect("list")
        .into_iter()
        .map(|ws| ws.path)
        .collect();
    assert_eq!(remaining, vec![kept]);
}

#[test]
fn forced_create_keeps_orphaned_task_branch_commits() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);
    let path = mgr.create("worker-1", "hive-a", "main", false).expect("create");
    repo.commit_file_in(&path, "resolved.txt", "fixed by hand\n", "resolve conflict")
        .expect("commit");
    let tip = repo.git(&["rev-parse", "task-hive-a"]).expect("rev-parse");
    fs::remove_dir_all(&path).expect("delete out of band");

    let err = mgr
        .create("worker-2", "hive-a", "main", true)
        .expect_err("branch already exists");
    assert!(format!("{err:#}").contains("task-hive-a"));
    assert_eq!(
        repo.git(&["rev-parse", "task-hive-a"]).expect("rev-parse"),
        tip
    );
    assert!(!mgr.exists("worker-2", "hive-a"));
}

#[test]
fn finished_branch_merges_into_default() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);
    let path = mgr.create("worker-1", "hive-a", "main", false).expect("create");
    repo.commit_file_in(&path, "feature.txt", "done\n", "add feature")
        .expect("commit");

    let result = mgr.merge_branch("main", "task-hive-a").expect("merge");
    assert_eq!(result, MergeResult::Merged);
    assert_eq!(
        fs::read_to_string(repo.path().join("feature.txt")).expect("merged file"),
        "done\n"
    );
}

#[test]
fn conflicting_merge_is_aborted() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);
    let path = mgr.create("worker-1", "hive-a", "main", false).expect("create");
    repo.commit_file("shared.txt", "main version\n", "main change")
        .expect("commit main");
    repo.commit_file_in(&path, "shared.txt", "task version\n", "task change")
        .expect("commit task");

    let result = mgr.merge_branch("main", "task-hive-a").expect("merge");
    assert!(matches!(result, MergeResult::Conflict(_)));
    assert!(!repo.path().join(".git/MERGE_HEAD").exists());
    assert_eq!(
        fs::read_to_string(repo.path().join("shared.txt")).expect("main file"),
        "main version\n"
    );
    assert!(path.exists());
}

#[test]
fn operator_merge_finishes_preserved_workspace() {
    let repo = TestRepo::new().expect("repo");
    let mgr = manager(&repo);
    let path = mgr.create("worker-1", "hive-a", "main", false).expect("create");
    repo.commit_file_in(&path, "fix.txt", "fixed\n", "resolve by hand")
        .expect("commit");

    let ws = locate_workspace(&mgr, "hive-a")
        .expect("locate")
        .expect("found");
    assert_eq!(ws.path, path);
    let inspection = inspect_workspace(&mgr.git().at(&ws.path)).expect("inspect");
    assert!(!inspection.is_dirty());
    assert_eq!(inspection.branch.as_deref(), Some("task-hive-a"));

    let lock = repo.path().join(".hive/merge.lock");
    let outcome = MergeAssist::new(&mgr, "main", &lock)
        .run(&ws, &inspection, AssistOptions::default())
        .expect("assist");
    assert_eq!(
        outcome,
        AssistOutcome::Merged {
            workspace_removed: true
        }
    );
    assert!(repo.path().join("fix.txt").exists());
    assert!(!path.exists());
    assert!(!branch_exists(&repo, "task-hive-a"));
}
