//! Single-threaded marshaling seam for the IDE automation surface.
//!
//! The IDE collaborator must be driven from one logical execution context.
//! Inbound channel calls are dispatched concurrently, so the dispatcher
//! funnels every invocation through an mpsc queue into a single task that
//! owns the [`IdeAutomation`] implementation. The transport itself provides
//! no mutual exclusion beyond this.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use vsmcp_bridge::RpcHandler;

/// The IDE operation surface, opaque to this crate. Implementations are not
/// required to be thread-safe; calls arrive strictly one at a time.
///
/// `Err` is a fault and surfaces to the server as a failed remote call.
/// Expected negative outcomes ("No solution is currently open") belong in
/// the `Ok` payload as plain status text.
pub trait IdeAutomation: Send + 'static {
    fn invoke(&mut self, method: &str, params: Value) -> Result<Value, String>;
}

struct AutomationCall {
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value, String>>,
}

/// Serializes calls into an [`IdeAutomation`] owned by a dedicated task.
pub struct AutomationDispatcher {
    tx: mpsc::UnboundedSender<AutomationCall>,
}

impl AutomationDispatcher {
    pub fn spawn(mut automation: Box<dyn IdeAutomation>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AutomationCall>();
        tokio::spawn(async move {
            while let Some(call) = rx.recv().await {
                let result = automation.invoke(&call.method, call.params);
                let _ = call.reply.send(result);
            }
            tracing::debug!("Automation dispatcher exiting");
        });
        Self { tx }
    }

    pub async fn invoke(&self, method: &str, params: Value) -> Result<Value, String> {
        let (reply, rx) = oneshot::channel();
        let call = AutomationCall {
            method: method.to_string(),
            params,
            reply,
        };
        self.tx
            .send(call)
            .map_err(|_| "automation dispatcher stopped".to_string())?;
        rx.await
            .map_err(|_| "automation dispatcher dropped the call".to_string())?
    }
}

#[async_trait::async_trait]
impl RpcHandler for AutomationDispatcher {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, String> {
        self.invoke(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use vsmcp_bridge::{BuildState, BuildStatusReport};

    struct FakeIde {
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl IdeAutomation for FakeIde {
        fn invoke(&mut self, method: &str, params: Value) -> Result<Value, String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match method {
                "solution_info" => Ok(Value::String("No solution is currently open".into())),
                "build_status" => Ok(serde_json::to_value(BuildStatusReport {
                    state: BuildState::Done,
                    failed_projects: 1,
                })
                .unwrap()),
                "echo" => Ok(params),
                other => Err(format!("unknown operation: {other}")),
            }
        }
    }

    fn fake_ide() -> (Box<FakeIde>, Arc<AtomicUsize>) {
        let max = Arc::new(AtomicUsize::new(0));
        let ide = Box::new(FakeIde {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::clone(&max),
        });
        (ide, max)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn calls_are_serialized() {
        let (ide, max) = fake_ide();
        let dispatcher = Arc::new(AutomationDispatcher::spawn(ide));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let d = Arc::clone(&dispatcher);
                tokio::spawn(async move { d.invoke("echo", Value::from(i)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(max.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expected_negative_result_is_ok_text() {
        let (ide, _) = fake_ide();
        let dispatcher = AutomationDispatcher::spawn(ide);
        let result = dispatcher.invoke("solution_info", Value::Null).await.unwrap();
        assert_eq!(result, Value::String("No solution is currently open".into()));
    }

    #[tokio::test]
    async fn build_status_is_sampled_per_call() {
        let (ide, _) = fake_ide();
        let dispatcher = AutomationDispatcher::spawn(ide);
        let value = dispatcher.invoke("build_status", Value::Null).await.unwrap();
        let report: BuildStatusReport = serde_json::from_value(value).unwrap();
        assert_eq!(report.state, BuildState::Done);
        assert_eq!(report.failed_projects, 1);
    }

    #[tokio::test]
    async fn unknown_operation_is_a_fault() {
        let (ide, _) = fake_ide();
        let dispatcher = AutomationDispatcher::spawn(ide);
        let err = dispatcher.invoke("bogus", Value::Null).await.unwrap_err();
        assert!(err.contains("bogus"));
    }
}
