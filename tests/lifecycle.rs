//! Branch-mode lifecycle: start, close, cleanup against a real repository.

mod common;

use common::{EngineHarness, TestRepo};

use ticketflow::engine::CloseResult;
use ticketflow::output::Render;
use ticketflow::store::{CurrentTicket, StatusFilter};
use ticketflow::ticket::{parse_timestamp, Status};
use ticketflow::utils::get_now;
use ticketflow::ErrorCode;

fn branch_mode_harness(repo: &TestRepo) -> EngineHarness {
    let config = TestRepo::config(false);
    repo.init_project(&config);
    EngineHarness::new(repo, config)
}

#[test]
fn test_fresh_start_moves_file_and_commits() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("add-logging", get_now(), None).unwrap();
    let result = h.engine().start(&ticket.id, false).unwrap();

    // file moved to doing/ and stamped
    let started = h.store.get(&ticket.id).unwrap();
    assert_eq!(started.status(), Status::Doing);
    assert!(started.path.starts_with(h.store.status_dir(Status::Doing)));
    assert!(!h.store.path_in(Status::Todo, &ticket.id).exists());

    // branch created and checked out, with the exact commit message
    assert_eq!(repo.current_branch(), ticket.id);
    assert_eq!(repo.head_subject(), format!("Start ticket: {}", ticket.id));

    // current-ticket.md points into doing/
    match h.store.get_current().unwrap() {
        CurrentTicket::Ticket(current) => assert_eq!(current.id, ticket.id),
        other => panic!("expected current ticket, got {other:?}"),
    }
    let target = std::fs::read_link(h.store.current_link_path()).unwrap();
    assert_eq!(
        target,
        std::path::PathBuf::from(format!("tickets/doing/{}.md", ticket.id))
    );

    assert!(result.worktree_path.is_none());
    assert_eq!(result.parent_branch, None);
}

#[test]
fn test_start_requires_clean_workspace_in_branch_mode() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("dirty-start", get_now(), None).unwrap();
    repo.dirty();
    let err = h.engine().start(&ticket.id, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::GitDirtyWorkspace);

    // no side effects: ticket untouched, no branch
    assert_eq!(h.store.get(&ticket.id).unwrap().status(), Status::Todo);
    assert!(!repo.branch_exists(&ticket.id));
}

#[test]
fn test_start_twice_needs_force() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("twice", get_now(), None).unwrap();
    h.engine().start(&ticket.id, false).unwrap();

    let err = h.engine().start(&ticket.id, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::TicketAlreadyStarted);

    // forced restart from the ticket's own branch stays in doing and does
    // not invent a self-parent
    h.engine().start(&ticket.id, true).unwrap();
    let restarted = h.store.get(&ticket.id).unwrap();
    assert_eq!(restarted.status(), Status::Doing);
    assert!(restarted.meta.related.is_empty());
    assert_eq!(repo.current_branch(), ticket.id);
}

#[test]
fn test_start_from_ticket_branch_records_parent() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let parent = h.store.create("parent", get_now(), None).unwrap();
    h.engine().start(&parent.id, false).unwrap();

    // created while on the parent branch, started from it too
    let child = h.store.create("child", get_now(), None).unwrap();
    let result = h.engine().start(&child.id, false).unwrap();
    assert_eq!(result.parent_branch.as_deref(), Some(parent.id.as_str()));

    let child = h.store.get(&child.id).unwrap();
    assert_eq!(child.parent(), Some(parent.id.as_str()));
    assert_eq!(
        child
            .meta
            .related
            .iter()
            .filter(|r| r.starts_with("parent:"))
            .count(),
        1
    );
}

#[test]
fn test_start_from_foreign_branch_is_refused() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    repo.git(&["checkout", "-b", "feature/random"]);
    let ticket = h.store.create("orphan", get_now(), None).unwrap();
    let err = h.engine().start(&ticket.id, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(h.store.get(&ticket.id).unwrap().status(), Status::Todo);
}

#[test]
fn test_start_then_close_is_two_commits_on_the_branch() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("two-commits", get_now(), None).unwrap();
    h.engine().start(&ticket.id, false).unwrap();
    let result = h.engine().close_current(None, false).unwrap();

    assert_eq!(result.ticket.status(), Status::Done);
    assert_eq!(h.store.get(&ticket.id).unwrap().status(), Status::Done);
    assert_eq!(repo.commits_ahead_of_main(&ticket.id), 2);
    assert_eq!(repo.head_subject(), format!("Close ticket: {}", ticket.id));

    // pointer cleared
    assert!(matches!(h.store.get_current().unwrap(), CurrentTicket::None));
}

#[test]
fn test_close_without_current_ticket() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let err = h.engine().close_current(None, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::TicketNotStarted);
}

#[test]
fn test_close_with_broken_link_suggests_restore() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("breakme", get_now(), None).unwrap();
    h.engine().start(&ticket.id, false).unwrap();
    std::fs::remove_file(h.store.path_in(Status::Doing, &ticket.id)).unwrap();

    let err = h.engine().close_current(None, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::TicketNotStarted);
    assert!(err.suggestions.iter().any(|s| s.contains("restore")));
}

#[test]
fn test_close_by_id_requires_reason_for_unmerged_branch() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("unmerged", get_now(), None).unwrap();
    h.engine().start(&ticket.id, false).unwrap();
    // still on the ticket branch; nothing merged into main yet

    let err = h.engine().close_by_id(&ticket.id, None, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(h.store.get(&ticket.id).unwrap().status(), Status::Doing);

    let result = h
        .engine()
        .close_by_id(&ticket.id, Some("abandoned".to_string()), false)
        .unwrap();
    assert_eq!(result.ticket.meta.close_reason.as_deref(), Some("abandoned"));
    assert_eq!(
        repo.head_subject(),
        format!("Close ticket: {} (abandoned)", ticket.id)
    );
}

#[test]
fn test_close_by_id_merged_branch_needs_no_reason() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("merged", get_now(), None).unwrap();
    h.engine().start(&ticket.id, false).unwrap();
    repo.git(&["checkout", "main"]);
    repo.git(&["merge", "--no-ff", "-m", "merge ticket work", &ticket.id]);

    let result = h.engine().close_by_id(&ticket.id, None, false).unwrap();
    assert_eq!(result.ticket.status(), Status::Done);
    assert_eq!(result.ticket.meta.close_reason, None);
}

#[test]
fn test_close_state_preconditions() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let todo = h.store.create("still-todo", get_now(), None).unwrap();
    let err = h.engine().close_by_id(&todo.id, None, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::TicketNotStarted);

    let done = h.store.create("will-close", get_now(), None).unwrap();
    h.engine().start(&done.id, false).unwrap();
    h.engine().close_current(None, false).unwrap();
    let err = h.engine().close_by_id(&done.id, None, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::TicketAlreadyClosed);
}

#[test]
fn test_close_result_renders_duration() {
    // Started 10:00, closed 12:30 serializes as "2h 30m".
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let mut ticket = h.store.create("duration", get_now(), None).unwrap();
    ticket.meta.started_at = Some(parse_timestamp("2024-01-01T10:00:00Z").unwrap());
    ticket.meta.closed_at = Some(parse_timestamp("2024-01-01T12:30:00Z").unwrap());
    let duration = ticket.duration();
    let result = CloseResult { ticket, duration };

    let json = result.structured();
    assert_eq!(json["duration"], "2h 30m");
    assert!(result.text().contains("Duration: 2h 30m"));
}

#[test]
fn test_cycle_rejection_blocks_start() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let y = h.store.create("why", get_now(), None).unwrap();
    let x = h.store.create("ex", get_now(), Some(&y.id)).unwrap();

    // start x so its branch exists, then try to start y from x's branch
    h.engine().start(&x.id, false).unwrap();
    let err = h.engine().start(&y.id, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(err.message.contains("cycle"));

    // nothing was written to y, and the half-made branch is gone
    let y = h.store.get(&y.id).unwrap();
    assert_eq!(y.status(), Status::Todo);
    assert!(y.meta.related.is_empty());
    assert!(!repo.branch_exists(&y.id));
    assert_eq!(repo.current_branch(), x.id);
}

#[test]
fn test_cleanup_after_close() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("cleanme", get_now(), None).unwrap();
    h.engine().start(&ticket.id, false).unwrap();
    h.engine().close_current(None, false).unwrap();

    // merge so the done state is visible from main after branch deletion
    repo.git(&["checkout", "main"]);
    repo.git(&["merge", "--no-ff", "-m", "merge ticket work", &ticket.id]);

    let result = h.engine().cleanup(&ticket.id, true).unwrap();
    assert!(result.deleted_branch);
    assert!(!result.removed_worktree);
    assert!(!repo.branch_exists(&ticket.id));
    // ticket file stays in done/ forever
    assert_eq!(h.store.get(&ticket.id).unwrap().status(), Status::Done);

    // second cleanup is a no-op, not an error
    let again = h.engine().cleanup(&ticket.id, true).unwrap();
    assert!(!again.deleted_branch);
    assert!(!again.removed_worktree);
}

#[test]
fn test_cleanup_refuses_open_ticket() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("not-done", get_now(), None).unwrap();
    h.engine().start(&ticket.id, false).unwrap();
    let err = h.engine().cleanup(&ticket.id, true).unwrap_err();
    assert_eq!(err.code, ErrorCode::TicketNotDone);
}

#[test]
fn test_merge_squash_stages_ticket_work() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    let ticket = h.store.create("squashable", get_now(), None).unwrap();
    h.engine().start(&ticket.id, false).unwrap();
    h.engine().close_current(None, false).unwrap();

    repo.git(&["checkout", "main"]);
    assert!(!h.repo.has_staged_changes().unwrap());
    h.repo.merge_squash(&ticket.id).unwrap();
    assert!(h.repo.has_staged_changes().unwrap());
    h.repo.commit(&format!("Squash ticket work: {}", ticket.id)).unwrap();

    // squashed history: main sees the done file without the two commits
    assert!(h.store.get(&ticket.id).unwrap().status() == Status::Done);

    // the raw escape hatch returns plain stdout
    let head = h.repo.exec(&["rev-parse", "HEAD"]).unwrap();
    assert_eq!(head.trim().len(), 40);
}

#[test]
fn test_list_sees_every_status() {
    let repo = TestRepo::new();
    let h = branch_mode_harness(&repo);

    h.store.create("stays-todo", get_now(), None).unwrap();
    let doing = h.store.create("in-progress", get_now(), None).unwrap();
    h.engine().start(&doing.id, false).unwrap();
    let done = h.store.create("finished", get_now(), None).unwrap();
    h.engine().start(&done.id, false).unwrap();
    h.engine().close_current(None, false).unwrap();

    assert_eq!(h.store.list(StatusFilter::Todo).unwrap().len(), 1);
    assert_eq!(h.store.list(StatusFilter::Doing).unwrap().len(), 1);
    assert_eq!(h.store.list(StatusFilter::Done).unwrap().len(), 1);
    assert_eq!(h.store.list(StatusFilter::Active).unwrap().len(), 2);
    assert_eq!(h.store.list(StatusFilter::All).unwrap().len(), 3);
}
