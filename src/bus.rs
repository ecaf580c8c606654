//! Publish/subscribe registry shared by the host and its features.
//!
//! Features never hold references to one another. When one of them needs to
//! react to something another one (or the host) observed, it subscribes to a
//! message name here and the producer publishes under that name.
//!
//! Two delivery modes exist:
//!
//! | Call | Sync handlers | Async handlers | Faults |
//! |------|---------------|----------------|--------|
//! | [`MessageBus::publish`] | run inline, in order | spawned and detached | sent to the [`FaultSink`] |
//! | [`MessageBus::publish_async`] | run inline, in order | awaited | aggregated into [`BusError`] |

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use anyhow::anyhow;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::task::JoinSet;

/// A live document was opened by the editor. Payload: `{ "uri", "version" }`.
pub const DOCUMENT_OPENED: &str = "document/opened";
/// A live document's content changed. Payload: `{ "uri", "version" }`.
pub const DOCUMENT_CHANGED: &str = "document/changed";
/// A live document was closed by the editor. Payload: `{ "uri", "version" }`.
pub const DOCUMENT_CLOSED: &str = "document/closed";
/// A watched file changed on disk. Payload: `{ "uri", "kind" }`.
pub const FILE_CHANGED: &str = "workspace/fileChanged";
/// Every feature finished its `initialized` setup. Payload: `null`.
pub const SERVER_READY: &str = "server/ready";

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

type SyncFn = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;
type AsyncFn = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

#[derive(Clone)]
pub enum Handler {
    Sync(SyncFn),
    Async(AsyncFn),
}

impl Handler {
    pub fn new_sync<F>(f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Handler::Sync(Arc::new(f))
    }

    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Handler::Async(Arc::new(move |data| -> HandlerFuture { Box::pin(f(data)) }))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Sync(_) => f.write_str("Handler::Sync"),
            Handler::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("message name must not be empty")]
    EmptyMessageName,
    #[error("{} handler(s) failed for '{message}': {}", failures.len(), failures.join("; "))]
    HandlersFailed {
        message: String,
        failures: Vec<String>,
    },
}

/// Receives the faults that [`MessageBus::publish`] does not propagate.
pub trait FaultSink: Send + Sync {
    fn report(&self, message: &str, error: &anyhow::Error);
}

#[derive(Debug, Default)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, message: &str, error: &anyhow::Error) {
        tracing::error!(topic = message, error = %error, "message handler failed");
    }
}

static GLOBAL_BUS: Lazy<Arc<MessageBus>> = Lazy::new(|| Arc::new(MessageBus::new()));

pub struct MessageBus {
    next_token: AtomicU64,
    subscriptions: Mutex<HashMap<String, Vec<(SubscriptionToken, Handler)>>>,
    faults: Arc<dyn FaultSink>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_fault_sink(Arc::new(TracingFaultSink))
    }

    pub fn with_fault_sink(faults: Arc<dyn FaultSink>) -> Self {
        MessageBus {
            next_token: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
            faults,
        }
    }

    /// The bus shared by everything in this process.
    pub fn global() -> Arc<MessageBus> {
        GLOBAL_BUS.clone()
    }

    pub fn subscribe(
        &self,
        message: &str,
        handler: Handler,
    ) -> Result<SubscriptionToken, BusError> {
        if message.is_empty() {
            return Err(BusError::EmptyMessageName);
        }

        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(message.to_string())
            .or_default()
            .push((token, handler));

        tracing::trace!(topic = message, token = token.0, "subscribed");
        Ok(token)
    }

    /// Removes the handler registered under `token`. Unknown tokens are ignored.
    ///
    /// Returns whether a handler was removed.
    pub fn unsubscribe(&self, message: &str, token: SubscriptionToken) -> bool {
        let mut subscriptions = self.lock();
        let Some(handlers) = subscriptions.get_mut(message) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != token);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            subscriptions.remove(message);
        }
        removed
    }

    pub fn handler_count(&self, message: &str) -> usize {
        self.lock().get(message).map_or(0, Vec::len)
    }

    /// Runs every synchronous handler for `message` before returning and
    /// detaches the asynchronous ones. Nothing is propagated to the caller.
    pub fn publish(&self, message: &str, data: &Value) {
        for handler in self.snapshot(message) {
            match handler {
                Handler::Sync(f) => {
                    if let Err(err) = call_sync(&f, data) {
                        self.faults.report(message, &err);
                    }
                }
                Handler::Async(f) => {
                    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                        self.faults
                            .report(message, &anyhow!("no async runtime; handler skipped"));
                        continue;
                    };

                    let future = match start_async(&f, data) {
                        Ok(future) => future,
                        Err(err) => {
                            self.faults.report(message, &err);
                            continue;
                        }
                    };

                    let inner = runtime.spawn(future);
                    let faults = self.faults.clone();
                    let topic = message.to_string();
                    runtime.spawn(async move {
                        if let Err(err) = settle(inner.await) {
                            faults.report(&topic, &err);
                        }
                    });
                }
            }
        }
    }

    /// Runs every handler for `message` and waits until all of them settle.
    ///
    /// A failing handler never stops its siblings; all failures are collected
    /// into [`BusError::HandlersFailed`].
    pub async fn publish_async(&self, message: &str, data: Value) -> Result<(), BusError> {
        let mut failures = Vec::new();
        let mut pending = JoinSet::new();

        for handler in self.snapshot(message) {
            match handler {
                Handler::Sync(f) => {
                    if let Err(err) = call_sync(&f, &data) {
                        failures.push(format!("{err:#}"));
                    }
                }
                Handler::Async(f) => match start_async(&f, &data) {
                    Ok(future) => {
                        pending.spawn(future);
                    }
                    Err(err) => failures.push(format!("{err:#}")),
                },
            }
        }

        while let Some(joined) = pending.join_next().await {
            if let Err(err) = settle(joined) {
                failures.push(format!("{err:#}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BusError::HandlersFailed {
                message: message.to_string(),
                failures,
            })
        }
    }

    fn snapshot(&self, message: &str) -> Vec<Handler> {
        self.lock()
            .get(message)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    // Handlers never run while this is held, so a poisoned lock still
    // guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<(SubscriptionToken, Handler)>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn call_sync(f: &SyncFn, data: &Value) -> anyhow::Result<()> {
    panic::catch_unwind(AssertUnwindSafe(|| f(data)))
        .unwrap_or_else(|payload| Err(anyhow!(panic_message(payload))))
}

fn start_async(f: &AsyncFn, data: &Value) -> anyhow::Result<HandlerFuture> {
    panic::catch_unwind(AssertUnwindSafe(|| f(data.clone())))
        .map_err(|payload| anyhow!(panic_message(payload)))
}

fn settle(joined: Result<anyhow::Result<()>, tokio::task::JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(anyhow!(panic_message(err.into_panic()))),
        Err(err) => Err(anyhow!("handler task cancelled: {err}")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("handler panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{oneshot, Notify};

    #[derive(Default)]
    struct RecordingSink {
        faults: Mutex<Vec<(String, String)>>,
    }

    impl FaultSink for RecordingSink {
        fn report(&self, message: &str, error: &anyhow::Error) {
            self.faults
                .lock()
                .unwrap()
                .push((message.to_string(), error.to_string()));
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let shared = calls.clone();
        let make = move |name: &str| {
            let calls = shared.clone();
            let name = name.to_string();
            Handler::new_sync(move |_| {
                calls.lock().unwrap().push(name.clone());
                Ok(())
            })
        };
        (calls, make)
    }

    #[test]
    fn test_subscribe_then_unsubscribe_leaves_no_handlers() {
        let bus = MessageBus::new();
        let token = bus
            .subscribe("topic", Handler::new_sync(|_| Ok(())))
            .unwrap();
        assert_eq!(bus.handler_count("topic"), 1);

        assert!(bus.unsubscribe("topic", token));
        assert_eq!(bus.handler_count("topic"), 0);

        // Second removal is a no-op
        assert!(!bus.unsubscribe("topic", token));
        assert_eq!(bus.handler_count("topic"), 0);
    }

    #[test]
    fn test_unsubscribe_only_removes_matching_token() {
        let bus = MessageBus::new();
        let first = bus.subscribe("a", Handler::new_sync(|_| Ok(()))).unwrap();
        let second = bus.subscribe("a", Handler::new_sync(|_| Ok(()))).unwrap();

        assert!(!bus.unsubscribe("b", first), "wrong message name");
        assert!(bus.unsubscribe("a", first));
        assert_eq!(bus.handler_count("a"), 1);
        assert!(bus.unsubscribe("a", second));
    }

    #[test]
    fn test_tokens_are_unique_across_messages() {
        let bus = MessageBus::new();
        let a = bus.subscribe("a", Handler::new_sync(|_| Ok(()))).unwrap();
        let b = bus.subscribe("b", Handler::new_sync(|_| Ok(()))).unwrap();
        let c = bus.subscribe("a", Handler::new_sync(|_| Ok(()))).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_empty_message_name_rejected() {
        let bus = MessageBus::new();
        let result = bus.subscribe("", Handler::new_sync(|_| Ok(())));
        assert!(matches!(result, Err(BusError::EmptyMessageName)));
    }

    #[test]
    fn test_publish_runs_sync_handlers_in_subscription_order() {
        let bus = MessageBus::new();
        let (calls, make) = recorder();
        bus.subscribe("topic", make("first")).unwrap();
        bus.subscribe("topic", make("second")).unwrap();
        bus.subscribe("other", make("unrelated")).unwrap();

        bus.publish("topic", &json!({ "uri": "file:///a.json" }));

        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_publish_isolates_failing_and_panicking_handlers() {
        let sink = Arc::new(RecordingSink::default());
        let bus = MessageBus::with_fault_sink(sink.clone());
        let (calls, make) = recorder();

        bus.subscribe("topic", Handler::new_sync(|_| Err(anyhow!("boom"))))
            .unwrap();
        bus.subscribe("topic", Handler::new_sync(|_| panic!("kaboom")))
            .unwrap();
        bus.subscribe("topic", make("survivor")).unwrap();

        bus.publish("topic", &Value::Null);

        assert_eq!(*calls.lock().unwrap(), vec!["survivor"]);
        let faults = sink.faults.lock().unwrap();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0], ("topic".to_string(), "boom".to_string()));
        assert!(faults[1].1.contains("kaboom"));
    }

    #[test]
    fn test_publish_without_runtime_reports_skipped_async_handler() {
        let sink = Arc::new(RecordingSink::default());
        let bus = MessageBus::with_fault_sink(sink.clone());
        bus.subscribe("topic", Handler::new_async(|_| async { Ok(()) }))
            .unwrap();

        bus.publish("topic", &Value::Null);

        let faults = sink.faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert!(faults[0].1.contains("no async runtime"));
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_async_handlers() {
        let bus = MessageBus::new();
        let gate = Arc::new(Notify::new());
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        let handler_gate = gate.clone();
        bus.subscribe(
            "topic",
            Handler::new_async(move |_| {
                let gate = handler_gate.clone();
                let done_tx = done_tx.clone();
                async move {
                    gate.notified().await;
                    if let Some(tx) = done_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    Ok(())
                }
            }),
        )
        .unwrap();

        // Returns even though the handler is parked on the gate
        bus.publish("topic", &Value::Null);

        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("detached handler should finish once released")
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_reports_detached_async_failure() {
        let sink = Arc::new(RecordingSink::default());
        let bus = MessageBus::with_fault_sink(sink.clone());
        bus.subscribe(
            "topic",
            Handler::new_async(|_| async { Err(anyhow!("late failure")) }),
        )
        .unwrap();

        bus.publish("topic", &Value::Null);

        for _ in 0..50 {
            if !sink.faults.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let faults = sink.faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].1, "late failure");
    }

    #[tokio::test]
    async fn test_publish_async_waits_for_every_handler() {
        let bus = MessageBus::new();
        let (calls, make) = recorder();
        let slow_calls = calls.clone();

        bus.subscribe(
            "topic",
            Handler::new_async(move |data| {
                let calls = slow_calls.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    calls.lock().unwrap().push(format!("slow:{}", data["n"]));
                    Ok(())
                }
            }),
        )
        .unwrap();
        bus.subscribe("topic", make("sync")).unwrap();

        bus.publish_async("topic", json!({ "n": 7 })).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&"sync".to_string()));
        assert!(calls.contains(&"slow:7".to_string()));
    }

    #[tokio::test]
    async fn test_publish_async_failure_does_not_stop_siblings() {
        let bus = MessageBus::new();
        let (calls, make) = recorder();
        let async_calls = calls.clone();

        bus.subscribe(
            "topic",
            Handler::new_async(|_| async { Err(anyhow!("rejected")) }),
        )
        .unwrap();
        bus.subscribe(
            "topic",
            Handler::new_async(move |_| {
                let calls = async_calls.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    calls.lock().unwrap().push("async survivor".to_string());
                    Ok(())
                }
            }),
        )
        .unwrap();
        bus.subscribe("topic", make("sync survivor")).unwrap();

        let result = bus.publish_async("topic", Value::Null).await;

        match result {
            Err(BusError::HandlersFailed { message, failures }) => {
                assert_eq!(message, "topic");
                assert_eq!(failures, vec!["rejected".to_string()]);
            }
            other => panic!("expected aggregate failure, got {other:?}"),
        }
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"async survivor".to_string()));
        assert!(calls.contains(&"sync survivor".to_string()));
    }

    #[tokio::test]
    async fn test_publish_async_without_subscribers_succeeds() {
        let bus = MessageBus::new();
        assert!(bus.publish_async("nobody", Value::Null).await.is_ok());
    }
}
