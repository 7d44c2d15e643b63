//! Channels from task background work back into the router.
//!
//! Tasks never touch the live-task table. Everything they want to report goes through a
//! [`TaskSink`]: status changes, device events and outbound control-plane messages, each on its
//! own bounded channel drained by the router loop.
use daq_model::{DeviceEventKind, OutboundMessage, TaskId, TaskStatus};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub task_id: TaskId,
    pub state: TaskStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReport {
    pub task_id: TaskId,
    pub kind: DeviceEventKind,
}

#[derive(Debug, Clone)]
pub struct TaskSink {
    task_id: TaskId,
    status: mpsc::Sender<StatusReport>,
    events: mpsc::Sender<EventReport>,
    messages: mpsc::Sender<OutboundMessage>,
}

#[derive(Debug)]
pub struct SinkReceivers {
    pub status: mpsc::Receiver<StatusReport>,
    pub events: mpsc::Receiver<EventReport>,
    pub messages: mpsc::Receiver<OutboundMessage>,
}

/// Create the three sink channels. The returned sink is not bound to a task yet.
pub fn sink_channels(status_buffer: usize, message_buffer: usize) -> (TaskSink, SinkReceivers) {
    let (status_tx, status_rx) = mpsc::channel(status_buffer.max(1));
    let (events_tx, events_rx) = mpsc::channel(status_buffer.max(1));
    let (messages_tx, messages_rx) = mpsc::channel(message_buffer.max(1));
    (
        TaskSink {
            task_id: TaskId::from(""),
            status: status_tx,
            events: events_tx,
            messages: messages_tx,
        },
        SinkReceivers {
            status: status_rx,
            events: events_rx,
            messages: messages_rx,
        },
    )
}

impl TaskSink {
    /// A sink reporting on behalf of `task_id`.
    pub fn for_task(&self, task_id: TaskId) -> Self {
        Self {
            task_id,
            ..self.clone()
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn send_status(&self, state: TaskStatus, message: Option<String>) {
        let report = StatusReport {
            task_id: self.task_id.clone(),
            state,
            message,
        };
        if self.status.send(report).await.is_err() {
            debug!(target: "daq.core.task", task_id = %self.task_id, ?state, "router gone; status dropped");
        }
    }

    pub async fn send_event(&self, kind: DeviceEventKind) {
        let report = EventReport {
            task_id: self.task_id.clone(),
            kind,
        };
        if self.events.send(report).await.is_err() {
            debug!(target: "daq.core.task", task_id = %self.task_id, "router gone; device event dropped");
        }
    }

    pub async fn send_message(&self, message: OutboundMessage) {
        if self.messages.send(message).await.is_err() {
            debug!(target: "daq.core.task", task_id = %self.task_id, "router gone; message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_model::TaskPid;

    #[tokio::test]
    async fn reports_are_stamped_with_task_id() {
        let (sink, mut rx) = sink_channels(4, 1);
        let sink = sink.for_task(TaskId::from("t-1"));

        sink.send_status(TaskStatus::Running, None).await;
        sink.send_event(DeviceEventKind::EndOfStream).await;
        sink.send_message(OutboundMessage::TaskPid(TaskPid {
            task_id: TaskId::from("t-1"),
            pid: 7,
        }))
        .await;

        let status = rx.status.recv().await.unwrap();
        assert_eq!(status.task_id.as_str(), "t-1");
        assert_eq!(status.state, TaskStatus::Running);
        assert_eq!(rx.events.recv().await.unwrap().kind, DeviceEventKind::EndOfStream);
        assert!(matches!(rx.messages.recv().await, Some(OutboundMessage::TaskPid(_))));
    }

    #[tokio::test]
    async fn closed_router_does_not_block() {
        let (sink, rx) = sink_channels(1, 1);
        drop(rx);
        sink.send_status(TaskStatus::Failed, Some("x".into())).await;
    }
}
