//! Revocation listener (C6 companion): named action handlers invoked when a
//! signed revocation notification arrives, plus the `action_list`-file mode
//! the payload can use to register handlers without code loading.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::state::AppState;

/// A parsed revocation notification. The signature/transport that delivers
/// this is out of scope; only the action-dispatch side is modelled here.
#[derive(Debug, Clone)]
pub struct RevocationEvent {
    /// Event type name, e.g. `"revocation"`.
    pub event_type: String,
    /// UUID of the node the event concerns.
    pub node_uuid: String,
}

/// A named revocation action handler.
pub type ActionHandler = fn(&RevocationEvent);

/// Registry of action handlers, keyed by name, resolved at startup instead
/// of loading code at runtime.
pub struct ActionRegistry {
    handlers: HashMap<&'static str, ActionHandler>,
}

impl ActionRegistry {
    /// Build the registry with the built-in action handlers.
    pub fn with_builtins() -> Self {
        let mut handlers: HashMap<&'static str, ActionHandler> = HashMap::new();
        handlers.insert("log", log_action);
        handlers.insert("shutdown", shutdown_action);
        Self { handlers }
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<ActionHandler> {
        self.handlers.get(name).copied()
    }

    /// Dispatch `event` to every action named in `action_names`, skipping
    /// (and logging) names not found in the registry.
    pub fn dispatch(&self, action_names: &[String], event: &RevocationEvent) {
        for name in action_names {
            match self.get(name) {
                Some(handler) => handler(event),
                None => warn!(action = %name, "unknown revocation action, skipping"),
            }
        }
    }
}

/// Read the `"default"` action mode's action list from a file the payload
/// left behind (one action name per line), rather than from `Settings`.
pub fn read_action_list_file(path: &std::path::Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn log_action(event: &RevocationEvent) {
    info!(event = %event.event_type, node_uuid = %event.node_uuid, "revocation action: log");
}

fn shutdown_action(event: &RevocationEvent) {
    error!(node_uuid = %event.node_uuid, "revocation action: shutdown requested");
}

/// Retry loop: attempt to (re)connect to the revocation notification
/// transport, backing off by a fixed interval between attempts. The
/// transport itself is out of scope; this loop exists to document the
/// retry cadence an implementation must honour.
pub async fn retry_loop<F, Fut>(mut connect: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    loop {
        if connect().await {
            return;
        }
        warn!("revocation notification transport unavailable, retrying in 10s");
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
}

/// Delivers signed revocation notifications from the verifier. The
/// transport itself (a TLS socket, certificate validation against
/// `revocation_cert`) is out of scope; this is the contract the listener
/// consumes so the dispatch side is exercisable without one.
#[async_trait::async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Connect (or reuse an existing connection) and yield the next event,
    /// or `None` once the connection is closed/exhausted.
    async fn next_event(&mut self) -> Option<RevocationEvent>;
}

/// Stands in for "no notification transport is configured" — always
/// reports the connection as closed, so the listener falls straight
/// through to the reconnect backoff.
#[derive(Default)]
pub struct ClosedNotificationTransport;

#[async_trait::async_trait]
impl NotificationTransport for ClosedNotificationTransport {
    async fn next_event(&mut self) -> Option<RevocationEvent> {
        None
    }
}

/// Run the revocation listener: connect, dispatch every event received
/// through `registry` to `action_names`, and on disconnect wait 10s before
/// reconnecting. Runs until the task is aborted (process shutdown).
pub async fn run_listener<T, F, Fut>(
    mut connect: F,
    registry: &ActionRegistry,
    action_names: &[String],
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = T>,
    T: NotificationTransport,
{
    loop {
        let mut transport = connect().await;
        let mut received_any = false;
        while let Some(event) = transport.next_event().await {
            received_any = true;
            registry.dispatch(action_names, &event);
        }
        if received_any {
            info!("revocation notification transport closed, reconnecting");
        } else {
            warn!("revocation notification transport unavailable, retrying in 10s");
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
}

/// Resolve the action names to dispatch a revocation event to: the
/// explicit `revocation_actions` list, or — when it names the `"default"`
/// mode — the `action_list` file the payload leaves under the unzipped
/// payload tree.
pub fn resolve_action_names(state: &AppState) -> Vec<String> {
    if state.settings.revocation_actions == ["default".to_string()] {
        let path = state
            .secure_mount
            .path()
            .join("unzipped")
            .join("action_list");
        read_action_list_file(&path).unwrap_or_default()
    } else {
        state.settings.revocation_actions.clone()
    }
}

/// Spawn the revocation listener task if `listen_notifications` is set, as
/// an optional thread alongside the HTTP surface. No notification transport
/// is implemented (out of scope, per the collaborator-trait boundary above)
/// so the listener runs against [`ClosedNotificationTransport`], which
/// keeps the 10s reconnect cadence observable once a real transport is
/// plugged in behind [`NotificationTransport`].
pub fn spawn_listener(state: Arc<AppState>) -> Option<tokio::task::JoinHandle<()>> {
    if !state.settings.listen_notifications {
        return None;
    }
    Some(tokio::spawn(async move {
        let registry = ActionRegistry::with_builtins();
        let action_names = resolve_action_names(&state);
        run_listener(
            || async { ClosedNotificationTransport },
            &registry,
            &action_names,
        )
        .await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_actions_are_registered() {
        let registry = ActionRegistry::with_builtins();
        assert!(registry.get("log").is_some());
        assert!(registry.get("shutdown").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn dispatch_skips_unknown_action_names() {
        let registry = ActionRegistry::with_builtins();
        let event = RevocationEvent {
            event_type: "revocation".to_string(),
            node_uuid: "node-1".to_string(),
        };
        registry.dispatch(&["log".to_string(), "bogus".to_string()], &event);
    }

    #[test]
    fn reads_action_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("action_list");
        std::fs::write(&path, "log\nshutdown\n\n").unwrap();
        let actions = read_action_list_file(&path).unwrap();
        assert_eq!(actions, vec!["log".to_string(), "shutdown".to_string()]);
    }

    #[tokio::test]
    async fn retry_loop_stops_after_success() {
        let mut attempts = 0;
        retry_loop(|| {
            attempts += 1;
            let succeed = attempts >= 1;
            async move { succeed }
        })
        .await;
        assert_eq!(attempts, 1);
    }

    struct ScriptedTransport {
        events: std::collections::VecDeque<RevocationEvent>,
    }

    #[async_trait::async_trait]
    impl NotificationTransport for ScriptedTransport {
        async fn next_event(&mut self) -> Option<RevocationEvent> {
            self.events.pop_front()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_listener_dispatches_events_then_reconnects_after_10s() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let connect_calls = Arc::new(AtomicUsize::new(0));
        let registry = ActionRegistry::with_builtins();
        let connects = Arc::clone(&connect_calls);
        let listener = run_listener(
            move || {
                let call = connects.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        ScriptedTransport {
                            events: std::collections::VecDeque::from(vec![RevocationEvent {
                                event_type: "revocation".to_string(),
                                node_uuid: "node-1".to_string(),
                            }]),
                        }
                    } else {
                        ScriptedTransport {
                            events: std::collections::VecDeque::new(),
                        }
                    }
                }
            },
            &registry,
            &["log".to_string()],
        );

        // The first connection yields one event then closes; the listener
        // sleeps 10s before reconnecting. Advance virtual time past that.
        tokio::select! {
            _ = listener => unreachable!("run_listener never returns"),
            _ = tokio::time::sleep(Duration::from_secs(25)) => {}
        }

        assert!(connect_calls.load(Ordering::SeqCst) >= 2);
    }
}
