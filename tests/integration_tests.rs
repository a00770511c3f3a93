//! Integration tests for the huddle CLI.
//!
//! These drive the binary end to end against temporary project
//! directories; the orchestration engine itself is covered by the unit
//! and scenario tests inside the library.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a huddle Command
fn huddle() -> Command {
    cargo_bin_cmd!("huddle")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_huddle_help() {
        huddle().arg("--help").assert().success();
    }

    #[test]
    fn test_huddle_version() {
        huddle().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        huddle().arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Status
// =============================================================================

mod status {
    use super::*;
    use huddle::sprint::{PlannedIssue, SprintPlan};
    use huddle::state::{SprintState, StateStore};

    #[test]
    fn test_status_without_state() {
        let dir = create_temp_project();

        huddle()
            .current_dir(dir.path())
            .args(["status", "3", "auth"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No state found"));
    }

    #[test]
    fn test_status_reads_persisted_state() {
        let dir = create_temp_project();

        let plan = SprintPlan {
            issues: vec![PlannedIssue::new(12, "Fix login", "body")],
            execution_groups: vec![vec![12]],
        };
        let state = SprintState::new(3, "auth", plan);
        StateStore::new(dir.path().join("docs/sprints/sprint-auth-3.json"))
            .save(&state)
            .unwrap();

        huddle()
            .current_dir(dir.path())
            .args(["status", "3", "auth"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Sprint auth-3"))
            .stdout(predicate::str::contains("init"))
            .stdout(predicate::str::contains("1 planned"));
    }

    #[test]
    fn test_status_rejects_stale_schema() {
        let dir = create_temp_project();
        let path = dir.path().join("docs/sprints/sprint-auth-3.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"version": 1}"#).unwrap();

        huddle()
            .current_dir(dir.path())
            .args(["status", "3", "auth"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Delete the file"));
    }
}

// =============================================================================
// Reset
// =============================================================================

mod reset {
    use super::*;

    #[test]
    fn test_reset_with_nothing_to_do() {
        let dir = create_temp_project();

        huddle()
            .current_dir(dir.path())
            .args(["reset", "3", "auth", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to reset"));
    }

    #[test]
    fn test_reset_force_removes_state_and_lock() {
        let dir = create_temp_project();
        let sprints = dir.path().join("docs/sprints");
        std::fs::create_dir_all(&sprints).unwrap();
        std::fs::write(sprints.join("sprint-auth-3.json"), r#"{"version": 2}"#).unwrap();
        std::fs::write(sprints.join("sprint-auth-3.lock"), "12345").unwrap();

        huddle()
            .current_dir(dir.path())
            .args(["reset", "3", "auth", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset sprint auth-3"));

        assert!(!sprints.join("sprint-auth-3.json").exists());
        assert!(!sprints.join("sprint-auth-3.lock").exists());
    }
}

// =============================================================================
// Run preconditions
// =============================================================================

mod run {
    use super::*;

    #[test]
    fn test_run_rejects_invalid_config() {
        let dir = create_temp_project();
        let huddle_dir = dir.path().join(".huddle");
        std::fs::create_dir_all(&huddle_dir).unwrap();
        std::fs::write(
            huddle_dir.join("huddle.toml"),
            "[sprint]\nmax_concurrent_sessions = 0\n",
        )
        .unwrap();

        huddle()
            .current_dir(dir.path())
            .args(["run", "1", "core"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("max_concurrent_sessions"));
    }

    #[test]
    fn test_run_surfaces_tracker_failure() {
        let dir = create_temp_project();
        let huddle_dir = dir.path().join(".huddle");
        std::fs::create_dir_all(&huddle_dir).unwrap();
        std::fs::write(
            huddle_dir.join("huddle.toml"),
            "[tracker]\ncmd = \"no-such-tracker-cli-71c2\"\n",
        )
        .unwrap();

        // Issue selection happens before the git workspace is opened, so
        // the missing tracker CLI is the first failure surfaced.
        huddle()
            .current_dir(dir.path())
            .args(["run", "1", "core", "--issue", "12"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no-such-tracker-cli-71c2"));
    }
}
