//! End-to-end tests driving the Lua fixtures in `tests/lua`

use std::path::PathBuf;
use std::time::Duration;

use ward_core::driver::{self, ScriptReport};
use ward_core::{Sandbox, ScriptValue, ThreadState};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("lua")
        .join(name)
}

async fn run_fixture(name: &str) -> ScriptReport {
    let sandbox = Sandbox::new().unwrap();
    let mut outcomes = driver::run_files(&sandbox, &[fixture(name)], Duration::ZERO).await;
    let (_, outcome) = outcomes.pop().unwrap();
    outcome.unwrap()
}

#[tokio::test]
async fn test_returning_script() {
    let report = run_fixture("test1.lua").await;

    assert_eq!(report.name, "test1");
    assert_eq!(report.state, ThreadState::Completed);
    assert_eq!(report.results, Some(vec![ScriptValue::from("boo")]));
    assert_eq!(report.run_count, 1);
}

#[tokio::test]
async fn test_infinite_loop_is_terminated() {
    let report = run_fixture("test2.lua").await;

    assert_eq!(report.state, ThreadState::ForceTerminate);
    assert_eq!(report.results, None);
    assert_eq!(report.instructions, 4000);
}

#[tokio::test]
async fn test_yielding_script_needs_two_runs() {
    let report = run_fixture("test3.lua").await;

    assert_eq!(report.state, ThreadState::Completed);
    assert_eq!(report.results, Some(vec![ScriptValue::from("This is a test.")]));
    assert_eq!(report.run_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_sleeping_script() {
    let report = run_fixture("test4.lua").await;

    assert_eq!(report.state, ThreadState::Completed);
    assert_eq!(
        report.results,
        Some(vec![ScriptValue::from("sleeping"), ScriptValue::from("woke up")])
    );
}

#[tokio::test]
async fn test_missing_file_does_not_stop_the_rest() {
    let sandbox = Sandbox::new().unwrap();
    let paths = vec![fixture("missing.lua"), fixture("test1.lua")];

    let outcomes = driver::run_files(&sandbox, &paths, Duration::ZERO).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].1.is_err());
    assert_eq!(
        outcomes[1].1.as_ref().unwrap().state,
        ThreadState::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_interleaved_fixtures() {
    let sandbox = Sandbox::new().unwrap();
    let mut scripts = Vec::new();
    for name in ["test1.lua", "test2.lua", "test3.lua"] {
        scripts.push(driver::read_script(&fixture(name)).unwrap());
    }

    let reports = driver::run_interleaved(&sandbox, &scripts, Duration::from_millis(1000)).await;

    let states: Vec<ThreadState> = reports.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![
            ThreadState::Completed,
            ThreadState::ForceTerminate,
            ThreadState::Completed
        ]
    );
    assert!(sandbox.is_empty());
}

#[test]
fn test_cli_check_accepts_fixtures() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let args = vec![
        "ward".to_string(),
        "check".to_string(),
        fixture("test1.lua").display().to_string(),
        fixture("test3.lua").display().to_string(),
    ];

    runtime
        .block_on(ward_core::cli::run_cli_from_args(args))
        .unwrap();
}
