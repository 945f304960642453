//! Tests for script registration, lookup and teardown

use maplit::btreemap;

use super::helpers::str_value;
use crate::sandbox::{LoadOptions, Sandbox, SandboxError, ScriptValue, ThreadState};

#[tokio::test]
async fn test_loaded_script_is_registered() {
    let sandbox = Sandbox::new().unwrap();
    let thread = sandbox.load_code("return 1", "one").unwrap();

    let found = sandbox.get_thread("one").expect("registered");
    assert_eq!(found.name(), "one");
    assert_eq!(found.source(), "return 1");
    assert_eq!(sandbox.len(), 1);

    thread.run().await.unwrap();
    assert!(sandbox.get_thread("one").is_none());
    assert!(sandbox.is_empty());
}

#[test]
fn test_compile_error_leaves_registry_untouched() {
    let sandbox = Sandbox::new().unwrap();

    let err = sandbox.load_code("return (", "broken").unwrap_err();

    assert!(matches!(err, SandboxError::Compile { ref name, .. } if name == "broken"));
    assert!(sandbox.get_thread("broken").is_none());
    assert!(sandbox.is_empty());
}

#[test]
fn test_failed_reload_keeps_existing_script() {
    let sandbox = Sandbox::new().unwrap();
    let original = sandbox.load_code("return 1", "stable").unwrap();

    assert!(sandbox.load_code("this is not lua", "stable").is_err());

    let current = sandbox.get_thread("stable").expect("still registered");
    assert_eq!(current.source(), "return 1");
    assert!(!original.is_closed());
}

#[tokio::test]
async fn test_reload_replaces_and_closes_previous() {
    let sandbox = Sandbox::new().unwrap();
    let old = sandbox.load_code("return 'old'", "script").unwrap();
    let new = sandbox.load_code("return 'new'", "script").unwrap();

    assert!(old.is_closed());
    assert!(matches!(old.run().await, Err(SandboxError::Closed { .. })));
    assert_eq!(sandbox.len(), 1);

    let results = new.run().await.unwrap();
    assert_eq!(results, Some(vec![str_value("new")]));
}

#[test]
fn test_stale_handle_does_not_remove_replacement() {
    let sandbox = Sandbox::new().unwrap();
    let old = sandbox.load_code("return 1", "shared").unwrap();
    let new = sandbox.load_code("return 2", "shared").unwrap();

    old.close();

    let current = sandbox.get_thread("shared").expect("replacement stays");
    assert_eq!(current.source(), "return 2");
    assert!(!new.is_closed());
}

#[test]
fn test_delete_thread_is_idempotent() {
    let sandbox = Sandbox::new().unwrap();
    let thread = sandbox.load_code("return 1", "gone").unwrap();

    sandbox.delete_thread("gone");
    sandbox.delete_thread("gone");
    sandbox.delete_thread("never-existed");

    assert!(thread.is_closed());
    assert!(sandbox.is_empty());
}

#[test]
fn test_close_is_idempotent() {
    let sandbox = Sandbox::new().unwrap();
    let thread = sandbox.load_code("return 1", "closer").unwrap();

    thread.close();
    thread.close();

    assert!(thread.is_closed());
    assert!(sandbox.get_thread("closer").is_none());
}

#[test]
fn test_get_threads_sorted_by_name() {
    let sandbox = Sandbox::new().unwrap();
    for name in ["charlie", "alpha", "bravo"] {
        sandbox.load_code("return 1", name).unwrap();
    }

    let names: Vec<String> = sandbox
        .get_threads()
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
}

#[test]
fn test_index_follows_creation_order() {
    let sandbox = Sandbox::new().unwrap();
    let first = sandbox.load_code("return 1", "first").unwrap();
    let second = sandbox.load_code("return 2", "second").unwrap();
    let reloaded = sandbox.load_code("return 3", "first").unwrap();

    assert_eq!(first.index(), 0);
    assert_eq!(second.index(), 1);
    assert_eq!(reloaded.index(), 2);
}

#[tokio::test]
async fn test_name_reusable_after_termination() {
    let sandbox = Sandbox::new().unwrap();
    let first = sandbox.load_code("while true do end", "reuse").unwrap();
    first.run().await.unwrap();
    assert_eq!(first.state(), ThreadState::ForceTerminate);

    let second = sandbox.load_code("return 'fresh'", "reuse").unwrap();

    assert_eq!(second.state(), ThreadState::Idle);
    assert_eq!(second.instruction_count(), 0);
    assert_eq!(second.run().await.unwrap(), Some(vec![str_value("fresh")]));
}

#[tokio::test]
async fn test_globals_are_isolated_between_scripts() {
    let sandbox = Sandbox::new().unwrap();
    let a = sandbox.load_code("return secret", "a").unwrap();
    let b = sandbox.load_code("return secret", "b").unwrap();

    a.set("secret", "for a only").unwrap();

    assert_eq!(a.run().await.unwrap(), Some(vec![str_value("for a only")]));
    assert_eq!(b.run().await.unwrap(), Some(vec![ScriptValue::Nil]));
}

#[tokio::test]
async fn test_guest_writes_stay_in_own_environment() {
    let sandbox = Sandbox::new().unwrap();
    let writer = sandbox
        .load_code("leaked = 'yes' return true", "writer")
        .unwrap();
    let reader = sandbox.load_code("return leaked", "reader").unwrap();

    writer.run().await.unwrap();

    assert_eq!(reader.run().await.unwrap(), Some(vec![ScriptValue::Nil]));
}

#[tokio::test]
async fn test_load_options_bind_globals() {
    let sandbox = Sandbox::new().unwrap();
    let thread = sandbox
        .load_code_with(
            "return config.mode, count",
            "configured",
            LoadOptions {
                globals: vec![
                    (
                        "config".to_string(),
                        ScriptValue::Map(btreemap! {
                            "mode".to_string() => str_value("strict"),
                        }),
                    ),
                    ("count".to_string(), ScriptValue::Int(3)),
                ],
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(
        thread.run().await.unwrap(),
        Some(vec![str_value("strict"), ScriptValue::Int(3)])
    );
}

#[tokio::test]
async fn test_independent_sandboxes() {
    let first = Sandbox::new().unwrap();
    let second = Sandbox::new().unwrap();

    let a = first.load_code("return 'first'", "same").unwrap();
    let b = second.load_code("return 'second'", "same").unwrap();

    assert_eq!(a.run().await.unwrap(), Some(vec![str_value("first")]));
    assert!(first.is_empty());
    assert!(second.get_thread("same").is_some());
    assert_eq!(b.run().await.unwrap(), Some(vec![str_value("second")]));
}

#[test]
fn test_close_all_on_drop() {
    let sandbox = Sandbox::new().unwrap();
    let thread = sandbox.load_code("return 1", "held").unwrap();

    drop(sandbox);

    assert!(thread.is_closed());
}

#[test]
fn test_check_code_registers_nothing() {
    let sandbox = Sandbox::new().unwrap();

    assert!(sandbox.check_code("return 1", "ok").is_ok());
    assert!(matches!(
        sandbox.check_code("return (", "bad"),
        Err(SandboxError::Compile { .. })
    ));
    assert!(sandbox.is_empty());
}
