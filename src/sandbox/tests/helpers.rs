//! Test helpers for sandbox tests

use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tokio::task::LocalSet;

use crate::sandbox::{
    Budget, LoadOptions, Sandbox, ScriptValue, Supervisor, SupervisorFactory,
};

/// Call `run()` until the supervisor closes, returning the last results
///
/// Panics after `max_runs` calls so a broken state machine fails the test instead
/// of hanging it.
pub async fn drive(supervisor: &Supervisor, max_runs: u64) -> Option<Vec<ScriptValue>> {
    let mut results = None;
    while !supervisor.is_closed() {
        assert!(
            supervisor.run_count() < max_runs,
            "script {} still open after {} runs",
            supervisor.name(),
            max_runs
        );
        results = supervisor.run().await.expect("run accepted");
    }
    results
}

/// Load a script with an explicit budget
pub fn load_with_budget(sandbox: &Sandbox, name: &str, code: &str, budget: Budget) -> Supervisor {
    sandbox
        .load_code_with(
            code,
            name,
            LoadOptions {
                budget: Some(budget),
                ..Default::default()
            },
        )
        .expect("script compiles")
}

pub fn str_value(s: &str) -> ScriptValue {
    ScriptValue::Str(s.to_string())
}

/// Factory with no host API at all
pub struct BareFactory;

impl SupervisorFactory for BareFactory {}

/// Run an async test on its own thread and fail it if it outlives `timeout`
///
/// A guest that escapes its budget spins inside `resume()` and never reaches an
/// await point, so the test runtime's own timers cannot stop it.
pub fn with_watchdog<F, Fut>(timeout: Duration, test: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime");
        LocalSet::new().block_on(&runtime, test());
        let _ = done_tx.send(());
    });

    match done_rx.recv_timeout(timeout) {
        Ok(()) => {
            handle.join().expect("test thread");
        }
        Err(RecvTimeoutError::Timeout) => {
            panic!("test did not finish within {:?}", timeout);
        }
        Err(RecvTimeoutError::Disconnected) => {
            if let Err(payload) = handle.join() {
                std::panic::resume_unwind(payload);
            }
        }
    }
}

pub const WATCHDOG: Duration = Duration::from_secs(10);
