//! Fan-out hub: one actor task owns every piece of mutable gateway state.
//!
//! Clients, the upstream session, and the HTTP side channels all talk to
//! the hub over one mpsc channel, so history append always precedes
//! broadcast and every broadcast observes a consistent client set. No
//! locks are shared across tasks.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use drover_spec::{ClientFrame, ClientRole, Event, ServerFrame, SupervisorAction, Task};

use crate::history::EventRing;

/// Commands accepted by the hub actor
#[derive(Debug)]
pub enum HubCommand {
    ClientConnected {
        id: u64,
        sender: mpsc::UnboundedSender<ServerFrame>,
    },
    ClientFrame {
        id: u64,
        frame: ClientFrame,
    },
    ClientDisconnected {
        id: u64,
    },
    /// Events decoded from a single upstream frame; emitted atomically
    UpstreamEvents(Vec<Event>),
    /// Handshake state of the upstream session
    UpstreamConnected(bool),
    /// `chat.send` acknowledged upstream
    UpstreamBusy(bool),
    /// Forward a control frame to the supervisor-role client
    SupervisorControl {
        action: SupervisorAction,
        reply: oneshot::Sender<bool>,
    },
    /// One-shot message delivery from the HTTP side channel
    DeliverMessage {
        content: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<HubSnapshot>,
    },
}

/// Point-in-time hub state for health reporting
#[derive(Debug, Clone)]
pub struct HubSnapshot {
    pub oc_connected: bool,
    pub agent_busy: bool,
    pub clients: usize,
    pub humans: usize,
    pub supervisor_connected: bool,
    pub task: Option<Task>,
}

/// Handle for submitting commands to a running hub
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn send(&self, command: HubCommand) {
        if self.tx.send(command).is_err() {
            warn!("hub channel closed, dropping command");
        }
    }

    pub async fn snapshot(&self) -> Option<HubSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { reply });
        rx.await.ok()
    }

    pub async fn supervisor_control(&self, action: SupervisorAction) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::SupervisorControl { action, reply });
        rx.await.unwrap_or(false)
    }

    pub async fn deliver_message(&self, content: String) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::DeliverMessage { content, reply });
        rx.await.unwrap_or(false)
    }
}

struct ClientEntry {
    role: ClientRole,
    sender: mpsc::UnboundedSender<ServerFrame>,
}

/// The hub actor
pub struct Hub {
    rx: mpsc::UnboundedReceiver<HubCommand>,
    clients: HashMap<u64, ClientEntry>,
    ring: EventRing,
    agent_busy: bool,
    oc_connected: bool,
    /// Outbound chat messages to the upstream session task
    upstream_tx: mpsc::UnboundedSender<String>,
    /// Workspace directory for reading the task document
    workspace: Option<PathBuf>,
}

impl Hub {
    /// Build the hub plus its handle. `upstream_tx` receives the raw
    /// contents of every forwarded user message.
    pub fn new(
        history_capacity: usize,
        upstream_tx: mpsc::UnboundedSender<String>,
        workspace: Option<PathBuf>,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                clients: HashMap::new(),
                ring: EventRing::new(history_capacity),
                agent_busy: false,
                oc_connected: false,
                upstream_tx,
                workspace,
            },
            HubHandle { tx },
        )
    }

    /// Run until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
        }
        debug!("hub actor stopped");
    }

    async fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::ClientConnected { id, sender } => {
                self.on_client_connected(id, sender).await;
            }
            HubCommand::ClientFrame { id, frame } => self.on_client_frame(id, frame),
            HubCommand::ClientDisconnected { id } => {
                if let Some(entry) = self.clients.remove(&id) {
                    debug!(client = id, "client disconnected");
                    // only human/supervisor departures change the counts
                    if matches!(entry.role, ClientRole::Human | ClientRole::Supervisor) {
                        self.broadcast_client_change();
                    }
                }
            }
            HubCommand::UpstreamEvents(events) => {
                for event in events {
                    if matches!(event, Event::Done | Event::Error { .. }) && self.agent_busy {
                        self.agent_busy = false;
                    }
                    // history append precedes broadcast
                    self.ring.push(event.clone());
                    self.broadcast(ServerFrame::from(event));
                }
            }
            HubCommand::UpstreamConnected(connected) => {
                if self.oc_connected != connected {
                    self.oc_connected = connected;
                    if !connected {
                        self.agent_busy = false;
                    }
                    self.broadcast_status();
                }
            }
            HubCommand::UpstreamBusy(busy) => {
                if self.agent_busy != busy {
                    self.agent_busy = busy;
                    self.broadcast_status();
                }
            }
            HubCommand::SupervisorControl { action, reply } => {
                let found = self.route_to_supervisor(action);
                let _ = reply.send(found);
            }
            HubCommand::DeliverMessage { content, reply } => {
                let delivered = self.forward_upstream(&content);
                let _ = reply.send(delivered);
            }
            HubCommand::Snapshot { reply } => {
                let task = self.load_task().await;
                let _ = reply.send(HubSnapshot {
                    oc_connected: self.oc_connected,
                    agent_busy: self.agent_busy,
                    clients: self.clients.len(),
                    humans: self.human_count(),
                    supervisor_connected: self.supervisor_connected(),
                    task,
                });
            }
        }
    }

    async fn on_client_connected(&mut self, id: u64, sender: mpsc::UnboundedSender<ServerFrame>) {
        // history first, then status, then the task if known
        let _ = sender.send(ServerFrame::History {
            events: self.ring.snapshot(),
        });
        let _ = sender.send(ServerFrame::Status {
            agent_busy: self.agent_busy,
            human_count: self.human_count(),
            supervisor_connected: self.supervisor_connected(),
            oc_connected: self.oc_connected,
        });
        if let Some(task) = self.load_task().await {
            let _ = sender.send(ServerFrame::TaskStatus { task });
        }

        self.clients.insert(
            id,
            ClientEntry {
                role: ClientRole::Unknown,
                sender,
            },
        );
        debug!(client = id, "client connected");
    }

    fn on_client_frame(&mut self, id: u64, frame: ClientFrame) {
        match frame {
            ClientFrame::Identify { role } => {
                let changed = match self.clients.get_mut(&id) {
                    Some(entry) if entry.role != role => {
                        entry.role = role;
                        true
                    }
                    _ => false,
                };
                if changed {
                    info!(client = id, role = ?role, "client identified");
                    self.broadcast_client_change();
                }
            }
            ClientFrame::UserMessage { content } => {
                if !self.forward_upstream(&content) {
                    // the sender alone is told; nothing is queued
                    if let Some(entry) = self.clients.get(&id) {
                        let _ = entry.sender.send(ServerFrame::Error {
                            message: "engine not connected yet, please wait".to_string(),
                            code: None,
                        });
                    }
                }
            }
        }
    }

    /// Forward a message to the upstream session. Returns false when the
    /// engine handshake has not completed; messages are never queued
    /// across the connect boundary.
    fn forward_upstream(&mut self, content: &str) -> bool {
        if !self.oc_connected {
            return false;
        }
        if self.upstream_tx.send(content.to_string()).is_err() {
            warn!("upstream session gone, message dropped");
            return false;
        }
        if !self.agent_busy {
            self.agent_busy = true;
            self.broadcast_status();
        }
        true
    }

    fn route_to_supervisor(&mut self, action: SupervisorAction) -> bool {
        let frame = ServerFrame::SupervisorControl { action };
        let mut found = false;
        for entry in self.clients.values() {
            if entry.role == ClientRole::Supervisor {
                found = entry.sender.send(frame.clone()).is_ok() || found;
            }
        }
        found
    }

    fn human_count(&self) -> usize {
        self.clients
            .values()
            .filter(|entry| entry.role == ClientRole::Human)
            .count()
    }

    fn supervisor_connected(&self) -> bool {
        self.clients
            .values()
            .any(|entry| entry.role == ClientRole::Supervisor)
    }

    fn broadcast(&mut self, frame: ServerFrame) {
        self.clients
            .retain(|_, entry| entry.sender.send(frame.clone()).is_ok());
    }

    fn broadcast_status(&mut self) {
        let frame = ServerFrame::Status {
            agent_busy: self.agent_busy,
            human_count: self.human_count(),
            supervisor_connected: self.supervisor_connected(),
            oc_connected: self.oc_connected,
        };
        self.broadcast(frame);
    }

    fn broadcast_client_change(&mut self) {
        let frame = ServerFrame::ClientChange {
            humans: self.human_count(),
            supervisor_connected: self.supervisor_connected(),
        };
        self.broadcast(frame);
    }

    async fn load_task(&self) -> Option<Task> {
        let path = self.workspace.as_ref()?.join(".task.json");
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(task) => Some(task),
            Err(e) => {
                debug!(error = %e, "task document unreadable, skipping task_status");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    struct Fixture {
        handle: HubHandle,
        upstream_rx: mpsc::UnboundedReceiver<String>,
        next_id: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let (upstream_tx, upstream_rx) = unbounded_channel();
            let (hub, handle) = Hub::new(50, upstream_tx, None);
            tokio::spawn(hub.run());
            Self {
                handle,
                upstream_rx,
                next_id: 0,
            }
        }

        async fn connect(&mut self, role: ClientRole) -> (u64, mpsc::UnboundedReceiver<ServerFrame>) {
            self.next_id += 1;
            let id = self.next_id;
            let (tx, rx) = unbounded_channel();
            self.handle.send(HubCommand::ClientConnected { id, sender: tx });
            if role != ClientRole::Unknown {
                self.handle.send(HubCommand::ClientFrame {
                    id,
                    frame: ClientFrame::Identify { role },
                });
            }
            // wait for the hub to process
            self.handle.snapshot().await.unwrap();
            (id, rx)
        }
    }

    fn delta(n: usize) -> Event {
        Event::TextDelta {
            text: format!("e{n}"),
        }
    }

    #[tokio::test]
    async fn connect_receives_history_then_status() {
        let mut fx = Fixture::new();
        fx.handle
            .send(HubCommand::UpstreamEvents(vec![delta(1), delta(2)]));
        let (_, mut rx) = fx.connect(ClientRole::Unknown).await;

        match rx.recv().await.unwrap() {
            ServerFrame::History { events } => assert_eq!(events.len(), 2),
            other => panic!("expected history first, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ServerFrame::Status { oc_connected, .. } => assert!(!oc_connected),
            other => panic!("expected status second, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_cap_serves_last_fifty() {
        let mut fx = Fixture::new();
        fx.handle.send(HubCommand::UpstreamEvents(
            (0..75).map(delta).collect::<Vec<_>>(),
        ));
        let (_, mut rx) = fx.connect(ClientRole::Unknown).await;

        match rx.recv().await.unwrap() {
            ServerFrame::History { events } => {
                assert_eq!(events.len(), 50);
                assert_eq!(
                    events[0],
                    Event::TextDelta {
                        text: "e25".to_string()
                    }
                );
                assert_eq!(
                    events[49],
                    Event::TextDelta {
                        text: "e74".to_string()
                    }
                );
            }
            other => panic!("expected history, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_events_follow_history_without_duplication() {
        let mut fx = Fixture::new();
        fx.handle.send(HubCommand::UpstreamEvents(vec![delta(1)]));
        let (_, mut rx) = fx.connect(ClientRole::Unknown).await;

        fx.handle.send(HubCommand::UpstreamEvents(vec![delta(2)]));
        fx.handle.snapshot().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            seen.push(frame);
        }
        // exactly: history([e1]), status, live e2
        assert_eq!(seen.len(), 3);
        assert!(matches!(&seen[0], ServerFrame::History { events } if events.len() == 1));
        assert!(matches!(seen[1], ServerFrame::Status { .. }));
        assert!(matches!(&seen[2], ServerFrame::TextDelta { text } if text == "e2"));
    }

    #[tokio::test]
    async fn identify_broadcasts_client_change() {
        let mut fx = Fixture::new();
        let (_, mut watcher) = fx.connect(ClientRole::Supervisor).await;
        // drain the watcher's own connect frames + its identify broadcast
        while watcher.try_recv().is_ok() {}

        let (_, _human_rx) = fx.connect(ClientRole::Human).await;

        let frame = watcher.recv().await.unwrap();
        match frame {
            ServerFrame::ClientChange {
                humans,
                supervisor_connected,
            } => {
                assert_eq!(humans, 1);
                assert!(supervisor_connected);
            }
            other => panic!("expected client_change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn user_message_before_engine_connect_errors_sender_only() {
        let mut fx = Fixture::new();
        let (id, mut rx) = fx.connect(ClientRole::Human).await;
        let (_, mut other_rx) = fx.connect(ClientRole::Human).await;
        while rx.try_recv().is_ok() {}
        while other_rx.try_recv().is_ok() {}

        fx.handle.send(HubCommand::ClientFrame {
            id,
            frame: ClientFrame::UserMessage {
                content: "hello".to_string(),
            },
        });
        fx.handle.snapshot().await.unwrap();

        match rx.try_recv().unwrap() {
            ServerFrame::Error { message, .. } => {
                assert!(message.contains("not connected"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(other_rx.try_recv().is_err());
        assert!(fx.upstream_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn user_message_forwards_and_sets_busy() {
        let mut fx = Fixture::new();
        fx.handle.send(HubCommand::UpstreamConnected(true));
        let (id, _rx) = fx.connect(ClientRole::Human).await;

        fx.handle.send(HubCommand::ClientFrame {
            id,
            frame: ClientFrame::UserMessage {
                content: "continue the plan".to_string(),
            },
        });

        let snap = fx.handle.snapshot().await.unwrap();
        assert!(snap.agent_busy);
        assert_eq!(fx.upstream_rx.recv().await.unwrap(), "continue the plan");
    }

    #[tokio::test]
    async fn done_event_clears_busy() {
        let fx = Fixture::new();
        fx.handle.send(HubCommand::UpstreamConnected(true));
        fx.handle.send(HubCommand::UpstreamBusy(true));
        fx.handle.send(HubCommand::UpstreamEvents(vec![Event::Done]));
        let snap = fx.handle.snapshot().await.unwrap();
        assert!(!snap.agent_busy);
    }

    #[tokio::test]
    async fn upstream_drop_clears_busy() {
        let fx = Fixture::new();
        fx.handle.send(HubCommand::UpstreamConnected(true));
        fx.handle.send(HubCommand::UpstreamBusy(true));
        fx.handle.send(HubCommand::UpstreamConnected(false));
        let snap = fx.handle.snapshot().await.unwrap();
        assert!(!snap.agent_busy);
        assert!(!snap.oc_connected);
    }

    #[tokio::test]
    async fn supervisor_control_routes_only_to_supervisor() {
        let mut fx = Fixture::new();
        let (_, mut sup_rx) = fx.connect(ClientRole::Supervisor).await;
        let (_, mut human_rx) = fx.connect(ClientRole::Human).await;
        while sup_rx.try_recv().is_ok() {}
        while human_rx.try_recv().is_ok() {}

        let found = fx.handle.supervisor_control(SupervisorAction::Pause).await;
        assert!(found);

        match sup_rx.recv().await.unwrap() {
            ServerFrame::SupervisorControl { action } => {
                assert_eq!(action, SupervisorAction::Pause);
            }
            other => panic!("expected supervisor_control, got {other:?}"),
        }
        assert!(human_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn supervisor_control_without_supervisor_reports_missing() {
        let mut fx = Fixture::new();
        let (_, _rx) = fx.connect(ClientRole::Human).await;
        let found = fx.handle.supervisor_control(SupervisorAction::Stop).await;
        assert!(!found);
    }

    #[tokio::test]
    async fn deliver_message_reports_delivery() {
        let mut fx = Fixture::new();
        assert!(!fx.handle.deliver_message("hi".to_string()).await);

        fx.handle.send(HubCommand::UpstreamConnected(true));
        assert!(fx.handle.deliver_message("hi".to_string()).await);
        assert_eq!(fx.upstream_rx.recv().await.unwrap(), "hi");
    }
}
