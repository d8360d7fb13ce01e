//! Event Publisher (C13).
//!
//! Publishes typed events to two destinations at once: the durable runtime's
//! heartbeat channel (so progress survives a replay) and the live stream bus
//! (so SSE subscribers see it immediately). Both destinations are modeled as
//! `EventObserver`s; the heartbeat sink is just the one observer that is
//! always present when wired to a real runtime.

use crate::events::{AgentCoreEvent, AgentEventType, EventObserver};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::broadcast;
use tokio::task;
use tokio::task::JoinSet;

const EVENT_BUS_BUFFER: usize = 1024;

pub type ObserverToken = u64;

type ObserverList = Vec<(ObserverToken, Arc<dyn EventObserver>)>;

pub struct EventPublisher {
    sender: broadcast::Sender<AgentCoreEvent>,
    observers: Arc<Mutex<ObserverList>>,
    sequence: AtomicU64,
    observer_sequence: AtomicU64,
    observer_tasks: Arc<TokioMutex<JoinSet<()>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_BUFFER);
        Self {
            sender,
            observers: Arc::new(Mutex::new(Vec::new())),
            sequence: AtomicU64::new(1),
            observer_sequence: AtomicU64::new(1),
            observer_tasks: Arc::new(TokioMutex::new(JoinSet::new())),
        }
    }

    /// Subscribe to the live stream bus (SSE fan-out).
    pub fn subscribe(&self) -> broadcast::Receiver<AgentCoreEvent> {
        self.sender.subscribe()
    }

    /// Register an observer — e.g. the durable runtime's heartbeat sink.
    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) -> ObserverToken {
        let token = self.observer_sequence.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((token, observer));
        token
    }

    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(t, _)| *t != token);
        before != observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Publish an event, using `parent_workflow_id` when present so events
    /// from a delegated subtask correlate back to the originating workflow.
    pub fn publish(
        &self,
        workflow_id: &str,
        parent_workflow_id: Option<&str>,
        event_type: AgentEventType,
        agent_id: &str,
        message: impl Into<String>,
    ) {
        let key = parent_workflow_id.unwrap_or(workflow_id);
        let event = self.build_event(key, event_type, agent_id, message.into(), None);
        self.publish_raw(event);
    }

    pub fn publish_with_payload(
        &self,
        workflow_id: &str,
        parent_workflow_id: Option<&str>,
        event_type: AgentEventType,
        agent_id: &str,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) {
        let key = parent_workflow_id.unwrap_or(workflow_id);
        let event = self.build_event(key, event_type, agent_id, message.into(), Some(payload));
        self.publish_raw(event);
    }

    /// Publish a fully materialized event without reassigning seq.
    pub fn publish_raw(&self, event: AgentCoreEvent) {
        self.bump_sequence_after_raw(event.seq);
        self.dispatch_event(event);
    }

    pub async fn shutdown(&self) {
        log::debug!("EventPublisher: shutting down, aborting observer tasks");
        let mut tasks = self.observer_tasks.lock().await;
        tasks.shutdown().await;
    }

    fn dispatch_event(&self, event: AgentCoreEvent) {
        let _ = self.sender.send(event.clone());

        let observers: Vec<_> = self
            .observers
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        let tasks = self.observer_tasks.clone();
        task::spawn(async move {
            let mut guard = tasks.lock().await;
            for observer in observers {
                let event = event.clone();
                guard.spawn(async move {
                    if let Err(err) = observer.on_event(&event).await {
                        log::error!(
                            "EventPublisher observer failure: workflow_id={}, seq={}, error={}",
                            event.workflow_id,
                            event.seq,
                            err
                        );
                    }
                });
            }
        });
    }

    fn bump_sequence_after_raw(&self, seq: u64) {
        let min_next = seq.saturating_add(1);
        let mut current = self.sequence.load(Ordering::Relaxed);
        while current < min_next {
            match self.sequence.compare_exchange_weak(
                current,
                min_next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn build_event(
        &self,
        workflow_id: &str,
        event_type: AgentEventType,
        agent_id: &str,
        message: String,
        payload: Option<serde_json::Value>,
    ) -> AgentCoreEvent {
        AgentCoreEvent {
            seq: self.sequence.fetch_add(1, Ordering::Relaxed),
            workflow_id: workflow_id.to_string(),
            event_type,
            agent_id: agent_id.to_string(),
            message,
            payload,
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp() * 1000,
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
