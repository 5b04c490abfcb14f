//! Executor contract (§4.10). Given a task's deserialized `(func, args,
//! kwargs)` it produces either a finished result or an error; the core
//! never inspects the result bytes, only forwards them. The executor is
//! pluggable the way the teacher's `Executor` trait lets a `Protocol`
//! supply its own, but here there is exactly one call, not a stream of
//! partial results.

use crate::task_state::TaskPayload;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Finished { result: Bytes },
    Erred { exception: String, traceback: String },
}

pub trait Executor: Send + Sync + 'static {
    fn execute(&self, payload: &TaskPayload) -> ExecutionOutcome;
}

/// A pass-through executor driven by a user-supplied function. Runs on a
/// `spawn_blocking` thread (see `worker::ensure_computing`) so a slow
/// callable cannot stall the event loop.
pub struct BasicExecutor {
    run: Arc<dyn Fn(&TaskPayload) -> ExecutionOutcome + Send + Sync>,
}

impl BasicExecutor {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&TaskPayload) -> ExecutionOutcome + Send + Sync + 'static,
    {
        Self { run: Arc::new(run) }
    }
}

impl Executor for BasicExecutor {
    fn execute(&self, payload: &TaskPayload) -> ExecutionOutcome {
        (self.run)(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_executor_echoes_args_as_result() {
        let executor = BasicExecutor::new(|payload: &TaskPayload| ExecutionOutcome::Finished {
            result: payload.args.clone(),
        });
        let payload = TaskPayload {
            func: Bytes::from_static(b"int"),
            args: Bytes::from_static(b"(2.0,)"),
            kwargs: Bytes::from_static(b"{}"),
        };
        let outcome = executor.execute(&payload);
        assert_eq!(
            outcome,
            ExecutionOutcome::Finished {
                result: Bytes::from_static(b"(2.0,)")
            }
        );
    }

    #[test]
    fn basic_executor_can_report_failure() {
        let executor = BasicExecutor::new(|_: &TaskPayload| ExecutionOutcome::Erred {
            exception: "InexactError".to_string(),
            traceback: "<traceback>".to_string(),
        });
        let payload = TaskPayload {
            func: Bytes::from_static(b"int"),
            args: Bytes::from_static(b"(2.3,)"),
            kwargs: Bytes::from_static(b"{}"),
        };
        match executor.execute(&payload) {
            ExecutionOutcome::Erred { exception, .. } => assert_eq!(exception, "InexactError"),
            ExecutionOutcome::Finished { .. } => panic!("expected error outcome"),
        }
    }
}
