use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn inlet_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("inlet");
    path
}

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    config_path: PathBuf,
}

fn setup_test_env(subjects: &[&str]) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("fixtures")).unwrap();

    let subjects_toml: Vec<String> = subjects.iter().map(|s| format!("\"{}\"", s)).collect();
    let config_content = format!(
        r#"[db]
path = "{}/data/inlet.sqlite"

[sweep]
subjects = [{}]
max_retries = 2
backoff_ms = 1
max_backoff_ms = 2

[sources]
provider = "replay"
fixture_root = "{}/fixtures"
"#,
        root.display(),
        subjects_toml.join(", "),
        root.display()
    );

    let config_path = root.join("config").join("inlet.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        _tmp: tmp,
        root,
        config_path,
    }
}

fn write_feed(env: &TestEnv, service: &str, subject: &str, body: &str) {
    let dir = env.root.join("fixtures").join(service);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{}.json", subject)), body).unwrap();
}

fn write_doc(env: &TestEnv, subject: &str, doc_id: &str, body: &str) {
    let dir = env.root.join("fixtures").join("docs").join(subject);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{}.json", doc_id)), body).unwrap();
}

/// A mail feed of `n` sequential records split into pages of `page_size`.
fn mail_feed(n: i64, page_size: usize) -> String {
    let records: Vec<String> = (1..=n)
        .map(|i| format!(r#"{{ "id": "m-{:03}", "seq": {}, "payload": {{ "n": {} }} }}"#, i, i, i))
        .collect();
    format!(
        r#"{{ "page_size": {}, "records": [{}] }}"#,
        page_size,
        records.join(",")
    )
}

/// A file-index feed with `n` exportable documents and one non-document.
fn file_feed(n: i64) -> String {
    let mut records: Vec<String> = (1..=n)
        .map(|i| {
            format!(
                r#"{{ "id": "d-{:02}", "seq": {}, "name": "Doc {}", "mime_type": "application/vnd.document", "payload": {{}} }}"#,
                i, i, i
            )
        })
        .collect();
    records.push(format!(
        r#"{{ "id": "img-1", "seq": {}, "name": "photo", "mime_type": "image/png", "payload": {{}} }}"#,
        n + 1
    ));
    format!(r#"{{ "page_size": 100, "records": [{}] }}"#, records.join(","))
}

fn run_inlet(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = inlet_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run inlet binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Extract `TABLE <name> rows=<n>` from `status` output.
fn table_rows(status_stdout: &str, table: &str) -> i64 {
    let prefix = format!("TABLE {} rows=", table);
    status_stdout
        .lines()
        .find_map(|l| l.strip_prefix(&prefix))
        .unwrap_or_else(|| panic!("no TABLE line for {} in: {}", table, status_stdout))
        .parse()
        .unwrap()
}

#[test]
fn test_init_creates_database() {
    let env = setup_test_env(&["alice"]);

    let (stdout, stderr, success) = run_inlet(&env.config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(env.root.join("data").join("inlet.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let env = setup_test_env(&["alice"]);

    let (_, _, success1) = run_inlet(&env.config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_inlet(&env.config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sweep_collects_all_pages_and_writes_cursor() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "mail", "alice", &mail_feed(250, 100));

    let (stdout, stderr, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(success, "sweep failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("SWEEP service=mail subject=alice phase=START"));
    assert!(stdout.contains(
        "SWEEP service=mail subject=alice phase=CURSOR_WRITE ok=1 count=250 partial=0 err=none detail=history-id=250"
    ));
    assert!(stdout.contains(
        "SWEEP service=mail subject=alice phase=END ok=1 count=250 partial=0 err=none detail=-"
    ));
    assert!(stdout.contains("ok"));

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 250);
    assert!(status.contains("STATE service=mail subject=alice state=COMPLETE"));

    let (cursors, _, _) = run_inlet(&env.config_path, &["cursors", "list"]);
    assert!(cursors.contains("CURSOR service=mail subject=alice key=history-id value=250"));
}

#[test]
fn test_second_sweep_skips_complete_targets() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "mail", "alice", &mail_feed(10, 100));

    let (_, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(success);

    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(success);
    // Resume skip is silent: no phase lines, no refetch.
    assert!(!stdout.contains("phase=START"));
    assert!(stdout.contains("complete: 1 (skipped as already complete: 1)"));

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 10);
}

#[test]
fn test_page_budget_partial_then_resume_converges() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "mail", "alice", &mail_feed(250, 100));

    // Truncated after 2 of 3 pages: cursor withheld, non-zero exit.
    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &["sweep", "--services", "mail", "--page-budget", "2"],
    );
    assert!(!success, "truncated sweep must exit non-zero");
    assert!(stdout.contains("phase=CURSOR_SKIP"));
    assert!(stdout.contains("detail=partial"));
    assert!(stdout.contains("phase=END ok=0 count=200 partial=1"));
    assert!(stdout.contains("incomplete"));

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 200);
    assert!(status.contains("STATE service=mail subject=alice state=PARTIAL"));

    // The next sweep re-runs the partial target and exhausts the feed.
    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(success, "resume sweep failed: {}", stdout);

    // Exactly 250 rows: replayed pages updated in place, no duplicates.
    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 250);
    assert!(status.contains("STATE service=mail subject=alice state=COMPLETE"));
}

#[test]
fn test_transient_failure_retried_within_run() {
    let env = setup_test_env(&["alice"]);
    write_feed(
        &env,
        "mail",
        "alice",
        r#"{ "page_size": 2, "fail": { "class": "transient_5xx", "page": 2, "times": 1 },
             "records": [
               { "id": "m-1", "seq": 1, "payload": {} },
               { "id": "m-2", "seq": 2, "payload": {} },
               { "id": "m-3", "seq": 3, "payload": {} }
             ] }"#,
    );

    // One bounded retry absorbs the injected 5xx; the run still converges.
    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(success, "sweep failed: {}", stdout);

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 3);
}

#[test]
fn test_persistent_transient_failure_keeps_committed_pages() {
    let env = setup_test_env(&["alice"]);
    write_feed(
        &env,
        "mail",
        "alice",
        r#"{ "page_size": 2, "fail": { "class": "transient_5xx", "page": 2, "times": 0 },
             "records": [
               { "id": "m-1", "seq": 1, "payload": {} },
               { "id": "m-2", "seq": 2, "payload": {} },
               { "id": "m-3", "seq": 3, "payload": {} }
             ] }"#,
    );

    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(!success);
    assert!(stdout.contains("err=transient_5xx"));
    assert!(stdout.contains("partial=1"));

    // Page one was persisted before page two failed.
    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 2);
    assert!(status.contains("STATE service=mail subject=alice state=PARTIAL"));
}

#[test]
fn test_unclassified_error_marks_target_err() {
    let env = setup_test_env(&["alice", "bob"]);
    write_feed(
        &env,
        "mail",
        "alice",
        r#"{ "page_size": 10, "fail": { "class": "other_err", "page": 1, "times": 0 },
             "records": [{ "id": "m-1", "seq": 1, "payload": {} }] }"#,
    );
    write_feed(&env, "mail", "bob", &mail_feed(3, 100));

    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(!success);
    assert!(stdout.contains("SWEEP service=mail subject=alice phase=END ok=0"));
    assert!(stdout.contains("err=other_err"));
    // The failed target did not block bob.
    assert!(stdout.contains(
        "SWEEP service=mail subject=bob phase=END ok=1 count=3 partial=0 err=none detail=-"
    ));

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert!(status.contains("STATE service=mail subject=alice state=ERR:other_err"));
    assert!(status.contains("STATE service=mail subject=bob state=COMPLETE"));
}

#[test]
fn test_empty_feed_completes_with_default_cursor() {
    let env = setup_test_env(&["alice"]);
    // No fixture at all: empty, immediately exhausted feed.

    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "calendar"]);
    assert!(success, "sweep failed: {}", stdout);
    assert!(stdout.contains(
        "SWEEP service=calendar subject=alice phase=CURSOR_WRITE ok=1 count=0 partial=0 err=none detail=last-modified-time=0"
    ));

    // Completion is durable: the next sweep skips.
    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "calendar"]);
    assert!(success);
    assert!(stdout.contains("skipped as already complete: 1"));
}

#[test]
fn test_chat_keeps_one_cursor_per_space() {
    let env = setup_test_env(&["alice"]);
    write_feed(
        &env,
        "chat",
        "alice",
        r#"{ "page_size": 10, "records": [
             { "id": "c-1", "seq": 5, "space_id": "s1", "payload": {} },
             { "id": "c-2", "seq": 9, "space_id": "s2", "payload": {} },
             { "id": "c-3", "seq": 6, "space_id": "s1", "payload": {} }
           ] }"#,
    );

    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "chat"]);
    assert!(success, "sweep failed: {}", stdout);

    let (cursors, _, _) = run_inlet(&env.config_path, &["cursors", "list"]);
    assert!(cursors.contains("key=space:s1:last-time value=6"));
    assert!(cursors.contains("key=space:s2:last-time value=9"));
}

#[test]
fn test_docs_stage_exports_discovered_documents() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "file-index", "alice", &file_feed(3));
    write_doc(&env, "alice", "d-01", r#"{ "title": "One", "content": "body one", "payload": {} }"#);
    write_doc(&env, "alice", "d-02", r#"{ "title": "Two", "content": "body two", "payload": {} }"#);
    write_doc(&env, "alice", "d-03", r#"{ "title": "Three", "content": "body three", "payload": {} }"#);

    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &["sweep", "--services", "file-index,derived-document"],
    );
    assert!(success, "sweep failed: {}", stdout);
    assert!(stdout.contains(
        "DOCS subject=alice attempted=3 ok=3 missing_404=0 transient_5xx=0 rate_limit=0 other_err=0 skipped_already_done=0 partial=0 cursor_written=1"
    ));

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    // The image/png row was indexed but not exported.
    assert_eq!(table_rows(&status, "files"), 4);
    assert_eq!(table_rows(&status, "doc_exports"), 3);
    assert!(status.contains("STATE service=derived-document subject=alice state=COMPLETE"));

    let (cursors, _, _) = run_inlet(&env.config_path, &["cursors", "list"]);
    assert!(cursors.contains("service=derived-document subject=alice key=docs:complete value=3"));
}

#[test]
fn test_doc_budget_truncation_then_resume() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "file-index", "alice", &file_feed(3));
    for id in ["d-01", "d-02", "d-03"] {
        write_doc(&env, "alice", id, r#"{ "content": "body", "payload": {} }"#);
    }

    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &[
            "sweep",
            "--services",
            "file-index,derived-document",
            "--doc-budget",
            "2",
        ],
    );
    assert!(!success, "truncated docs run must exit non-zero");
    assert!(stdout.contains("DOCS subject=alice attempted=2 ok=2"));
    assert!(stdout.contains("partial=1 cursor_written=0"));

    // Resume skips the two exported docs and finishes the third.
    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &["sweep", "--services", "file-index,derived-document"],
    );
    assert!(success, "resume sweep failed: {}", stdout);
    assert!(stdout.contains(
        "DOCS subject=alice attempted=1 ok=1 missing_404=0 transient_5xx=0 rate_limit=0 other_err=0 skipped_already_done=2 partial=0 cursor_written=1"
    ));
}

#[test]
fn test_vanished_doc_does_not_block_completion() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "file-index", "alice", &file_feed(2));
    write_doc(&env, "alice", "d-01", r#"{ "content": "body", "payload": {} }"#);
    // d-02 has no fixture: the provider reports it gone.

    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &["sweep", "--services", "file-index,derived-document"],
    );
    assert!(success, "sweep failed: {}", stdout);
    assert!(stdout.contains(
        "DOCS subject=alice attempted=2 ok=1 missing_404=1 transient_5xx=0 rate_limit=0 other_err=0 skipped_already_done=0 partial=0 cursor_written=1"
    ));
}

#[test]
fn test_derived_document_gated_on_file_index() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "file-index", "alice", &file_feed(1));
    write_doc(&env, "alice", "d-01", r#"{ "content": "body", "payload": {} }"#);

    // Requested alone with no prior file-index run: nothing to do.
    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &["sweep", "--services", "derived-document"],
    );
    assert!(success);
    assert!(stdout.contains("targets: 0"));
    assert!(!stdout.contains("DOCS "));

    // Once file-index has a terminal state, the stage runs standalone.
    let (_, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "file-index"]);
    assert!(success);
    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &["sweep", "--services", "derived-document"],
    );
    assert!(success);
    assert!(stdout.contains("DOCS subject=alice attempted=1 ok=1"));
}

#[test]
fn test_no_resume_rechecks_complete_targets() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "mail", "alice", &mail_feed(5, 100));

    let (_, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(success);

    // --no-resume re-runs incrementally from the stored cursor: the feed
    // has nothing past seq 5, so the target completes with zero records.
    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &["sweep", "--services", "mail", "--no-resume"],
    );
    assert!(success, "no-resume sweep failed: {}", stdout);
    assert!(stdout.contains("SWEEP service=mail subject=alice phase=START"));
    assert!(stdout.contains("phase=END ok=1 count=0 partial=0"));

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 5);
}

#[test]
fn test_cursor_reset_forces_refetch() {
    let env = setup_test_env(&["alice"]);
    write_feed(&env, "mail", "alice", &mail_feed(8, 100));

    let (_, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(success);

    let (stdout, _, success) = run_inlet(
        &env.config_path,
        &["cursors", "reset", "--service", "mail", "--subject", "alice"],
    );
    assert!(success, "reset failed: {}", stdout);
    assert!(stdout.contains("Removed 1 cursor(s)."));

    // Without a cursor the target is no longer COMPLETE; the sweep
    // re-fetches the full feed and converges to the same 8 rows.
    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "mail"]);
    assert!(success, "sweep after reset failed: {}", stdout);
    assert!(stdout.contains("phase=END ok=1 count=8"));

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 8);
}

#[test]
fn test_full_sweep_across_services_and_subjects() {
    let env = setup_test_env(&["bob", "alice"]);
    write_feed(&env, "mail", "alice", &mail_feed(12, 5));
    write_feed(&env, "mail", "bob", &mail_feed(4, 5));
    write_feed(
        &env,
        "calendar",
        "alice",
        r#"{ "page_size": 10, "records": [
             { "id": "e-1", "seq": 100, "payload": {} },
             { "id": "e-2", "seq": 105, "payload": {} }
           ] }"#,
    );
    write_feed(
        &env,
        "chat",
        "alice",
        r#"{ "page_size": 10, "records": [
             { "id": "c-1", "seq": 7, "space_id": "s1", "payload": {} }
           ] }"#,
    );
    write_feed(&env, "file-index", "alice", &file_feed(2));
    write_doc(&env, "alice", "d-01", r#"{ "content": "a", "payload": {} }"#);
    write_doc(&env, "alice", "d-02", r#"{ "content": "b", "payload": {} }"#);

    let (stdout, stderr, success) = run_inlet(&env.config_path, &["sweep", "--services", "all"]);
    assert!(success, "sweep failed: stdout={}, stderr={}", stdout, stderr);
    // 2 subjects x 5 services, enumerated subjects-first in sorted order.
    assert!(stdout.contains("targets: 10"));

    let start_positions: Vec<usize> = [
        "SWEEP service=mail subject=alice phase=START",
        "SWEEP service=calendar subject=alice phase=START",
        "SWEEP service=chat subject=alice phase=START",
        "SWEEP service=file-index subject=alice phase=START",
        "DOCS subject=alice",
        "SWEEP service=mail subject=bob phase=START",
    ]
    .iter()
    .map(|needle| stdout.find(needle).unwrap_or_else(|| panic!("missing: {}", needle)))
    .collect();
    assert!(
        start_positions.windows(2).all(|w| w[0] < w[1]),
        "targets out of order: {}",
        stdout
    );

    let (status, _, _) = run_inlet(&env.config_path, &["status"]);
    assert_eq!(table_rows(&status, "mail_messages"), 16);
    assert_eq!(table_rows(&status, "calendar_events"), 2);
    assert_eq!(table_rows(&status, "chat_messages"), 1);
    assert_eq!(table_rows(&status, "doc_exports"), 2);

    // Everything converged; a second full sweep is a pure no-op.
    let (stdout, _, success) = run_inlet(&env.config_path, &["sweep", "--services", "all"]);
    assert!(success);
    assert!(stdout.contains("skipped as already complete: 10"));
}

#[test]
fn test_rejects_unknown_service() {
    let env = setup_test_env(&["alice"]);
    let (_, stderr, success) = run_inlet(&env.config_path, &["sweep", "--services", "webhooks"]);
    assert!(!success);
    assert!(stderr.contains("Unknown service"));
}
