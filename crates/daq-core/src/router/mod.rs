//! The event router: sole owner of the live-task table.
//!
//! One loop multiplexes the inbound events from the cluster manager with the task sink channels
//! and a housekeeping tick. Inputs are handled one at a time; anything that may block for long
//! (kills, transitions, hook triggers) runs in a spawned task that reports back through the sink.
mod state;
pub use state::TaskTable;

use std::{collections::HashMap, ops::ControlFlow, sync::Arc, time::Duration};

use daq_model::{
    AckInfo, CommandHeader, CommandName, DeviceEvent, DeviceEventOrigin, InboundEvent,
    KillInfo, LaunchInfo, OutboundMessage, StatusUpdate, SubscribedInfo, TaskDescriptor, TaskId,
    TaskStatus, TransitionCommand, TriggerHookCommand,
};
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinSet, time::MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::{
    error::CoreError,
    sink::{EventReport, SinkReceivers, StatusReport, TaskSink, sink_channels},
    system,
    task::Task,
    timeouts::Timeouts,
    transport::Transport,
};
use state::AckLedger;

/// Quiet period that ends the final drain of task reports on shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

/// Device event label naming the environment a task was last transitioned in.
const ENVIRONMENT_LABEL: &str = "environmentId";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Stamped on device events until SUBSCRIBED says otherwise.
    pub agent_id: String,
    pub executor_id: String,
    /// Cadence of the failed-status retry pass.
    pub housekeeping: Duration,
    pub status_buffer: usize,
    pub message_buffer: usize,
    /// Upper bound on killing every task at shutdown.
    pub shutdown_timeout: Duration,
    pub timeouts: Timeouts,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            agent_id: system::agent_id().to_string(),
            executor_id: "daq-executor".to_string(),
            housekeeping: Duration::from_secs(1),
            status_buffer: 100,
            message_buffer: 8,
            shutdown_timeout: Duration::from_secs(15),
            timeouts: Timeouts::default(),
        }
    }
}

pub struct Router {
    core: Core,
    receivers: SinkReceivers,
}

/// Router state touched by the handlers.
struct Core {
    transport: Arc<dyn Transport>,
    agent_id: String,
    executor_id: String,
    housekeeping: Duration,
    shutdown_timeout: Duration,
    timeouts: Arc<Timeouts>,
    tasks: TaskTable,
    ledger: AckLedger,
    /// Last environment id seen in a transition, per task.
    environments: HashMap<TaskId, String>,
    sink: TaskSink,
}

impl Router {
    pub fn new(transport: Arc<dyn Transport>, config: RouterConfig) -> Self {
        let (sink, receivers) = sink_channels(config.status_buffer, config.message_buffer);
        Self {
            core: Core {
                transport,
                agent_id: config.agent_id,
                executor_id: config.executor_id,
                housekeeping: config.housekeeping,
                shutdown_timeout: config.shutdown_timeout,
                timeouts: Arc::new(config.timeouts),
                tasks: TaskTable::new(),
                ledger: AckLedger::default(),
                environments: HashMap::new(),
                sink,
            },
            receivers,
        }
    }

    /// A handle on the live-task table, for inspection.
    pub fn tasks(&self) -> TaskTable {
        self.core.tasks.clone()
    }

    /// Run until SHUTDOWN, a transport abort, or the inbound channel closing.
    ///
    /// Every live task is killed before returning. Only a transport abort is an error.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundEvent>) -> Result<(), CoreError> {
        let Router {
            mut core,
            mut receivers,
        } = self;

        let mut housekeeping = tokio::time::interval(core.housekeeping);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(target: "daq.core.router", agent_id = %core.agent_id, executor_id = %core.executor_id, "router started");

        let outcome = loop {
            tokio::select! {
                event = inbound.recv() => {
                    let Some(event) = event else {
                        info!(target: "daq.core.router", "inbound channel closed");
                        break Ok(());
                    };
                    match core.handle_inbound(event).await {
                        Ok(ControlFlow::Continue(())) => {}
                        Ok(ControlFlow::Break(())) => break Ok(()),
                        Err(e @ CoreError::Aborted(_)) => break Err(e),
                        Err(e) => warn!(target: "daq.core.router", error = %e, "inbound event rejected"),
                    }
                }
                Some(report) = receivers.status.recv() => core.handle_status(report).await,
                Some(report) = receivers.events.recv() => core.handle_event(report).await,
                Some(message) = receivers.messages.recv() => core.send_message(message).await,
                _ = housekeeping.tick() => core.housekeeping().await,
            }
        };

        core.shutdown(&mut receivers).await;
        outcome
    }
}

impl Core {
    async fn handle_inbound(&mut self, event: InboundEvent) -> Result<ControlFlow<()>, CoreError> {
        trace!(target: "daq.core.router", kind = event.kind(), "inbound event");
        match event {
            InboundEvent::Subscribed(info) => self.handle_subscribed(info).await,
            InboundEvent::Launch(info) => self.handle_launch(info).await,
            InboundEvent::Kill(info) => self.handle_kill(info).await?,
            InboundEvent::Acknowledged(info) => self.handle_ack(info),
            InboundEvent::Message(info) => self.handle_message(info.data).await?,
            InboundEvent::Shutdown => {
                info!(target: "daq.core.router", "shutdown requested");
                return Ok(ControlFlow::Break(()));
            }
            InboundEvent::Error(info) => {
                warn!(target: "daq.core.router", message = %info.message, "transport aborted");
                return Err(CoreError::Aborted(info.message));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn handle_subscribed(&mut self, info: SubscribedInfo) {
        if !info.agent_id.is_empty() {
            self.agent_id = info.agent_id;
        }
        if !info.executor_id.is_empty() {
            self.executor_id = info.executor_id;
        }

        let pending = self.ledger.pending_updates();
        info!(
            target: "daq.core.router",
            agent_id = %self.agent_id,
            executor_id = %self.executor_id,
            unacked_tasks = self.ledger.unacked_tasks.len(),
            replay = pending.len(),
            "subscribed"
        );
        for mut update in pending {
            update.touch();
            self.deliver(update).await;
        }
    }

    async fn handle_launch(&mut self, info: LaunchInfo) {
        let task_id = info.task_id.clone();
        self.ledger.unacked_tasks.insert(task_id.clone(), info.clone());

        let descriptor = match TaskDescriptor::from_payload(task_id.clone(), &info.name, info.data.as_ref()) {
            Ok(d) => d,
            Err(e) => {
                warn!(target: "daq.core.router", %task_id, error = %e, "bad task descriptor");
                self.report(task_id, TaskStatus::Failed, Some(e.to_string())).await;
                return;
            }
        };

        if self.tasks.contains(&task_id).await {
            let e = CoreError::DuplicateTask(task_id.clone());
            warn!(target: "daq.core.router", %task_id, "launch for an active task id");
            self.report(task_id, TaskStatus::Failed, Some(e.to_string())).await;
            return;
        }

        let control_mode = descriptor.control_mode;
        let task = Arc::new(Task::new(
            descriptor,
            self.sink.for_task(task_id.clone()),
            self.timeouts.clone(),
        ));
        match task.launch().await {
            Ok(()) => {
                self.tasks.insert(task).await;
                info!(target: "daq.core.router", %task_id, ?control_mode, "task launched");
            }
            Err(e) => {
                warn!(target: "daq.core.router", %task_id, error = %e, "launch failed");
                self.report(task_id, TaskStatus::Failed, Some(e.to_string())).await;
            }
        }
    }

    async fn handle_kill(&mut self, info: KillInfo) -> Result<(), CoreError> {
        let task = self
            .tasks
            .get(&info.task_id)
            .await
            .ok_or_else(|| CoreError::InvalidTaskId(info.task_id.clone()))?;

        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let task_id = task.id().clone();
            if let Err(e) = task.kill().await {
                warn!(target: "daq.core.router", %task_id, error = %e, "kill failed");
            }
            if let Some(grace) = task.removal_grace() {
                tokio::time::sleep(grace).await;
            }
            if tasks.remove_same(&task).await {
                debug!(target: "daq.core.router", %task_id, "task removed after kill");
            }
        });
        Ok(())
    }

    fn handle_ack(&mut self, info: AckInfo) {
        trace!(target: "daq.core.router", task_id = %info.task_id, uuid = %info.uuid, "acknowledged");
        self.ledger.acknowledge(&info.task_id, &info.uuid);
    }

    async fn handle_message(&mut self, data: Value) -> Result<(), CoreError> {
        let header = CommandHeader::decode(&data)?;
        let target = header.single_target()?.clone();
        let command = CommandName::parse(&header.name)
            .ok_or_else(|| CoreError::UnsupportedCommand(header.name.clone()))?;

        let Some(task) = self.tasks.get(&target).await else {
            let e = CoreError::NoActiveTask(target.clone());
            self.reject_message(command, &data, target, &e).await;
            return Err(e);
        };

        let sink = self.sink.for_task(target.clone());
        match command {
            CommandName::Transition => {
                let cmd = task.unmarshal_transition(&data)?;
                if !cmd.environment_id.is_empty() {
                    self.environments.insert(target.clone(), cmd.environment_id.clone());
                }
                debug!(target: "daq.core.router", task_id = %target, event = %cmd.event, src = %cmd.source, dst = %cmd.destination, "dispatching transition");
                tokio::spawn(async move {
                    let response = match task.transition(&cmd.request()).await {
                        Ok(state) => cmd.respond(None, state, target),
                        Err(failure) => {
                            warn!(target: "daq.core.router", task_id = %target, event = %cmd.event, state = %failure.state, error = %failure.error, "transition failed");
                            cmd.respond(Some(failure.error.to_string()), failure.state, target)
                        }
                    };
                    sink.send_message(OutboundMessage::TransitionResponse(response)).await;
                });
            }
            CommandName::TriggerHook => {
                let cmd = TriggerHookCommand::decode(&data)?;
                debug!(target: "daq.core.router", task_id = %target, "dispatching hook trigger");
                tokio::spawn(async move {
                    let error = task.trigger().await.err().map(|e| e.to_string());
                    sink.send_message(OutboundMessage::TriggerHookResponse(cmd.respond(error, target)))
                        .await;
                });
            }
        }
        Ok(())
    }

    /// Answer a command that could not be dispatched.
    async fn reject_message(&mut self, command: CommandName, data: &Value, task_id: TaskId, error: &CoreError) {
        let response = match command {
            CommandName::Transition => TransitionCommand::decode(data).map(|cmd| {
                let state = cmd.source.clone();
                OutboundMessage::TransitionResponse(cmd.respond(Some(error.to_string()), state, task_id))
            }),
            CommandName::TriggerHook => TriggerHookCommand::decode(data)
                .map(|cmd| OutboundMessage::TriggerHookResponse(cmd.respond(Some(error.to_string()), task_id))),
        };
        match response {
            Ok(message) => self.send_message(message).await,
            Err(e) => debug!(target: "daq.core.router", error = %e, "cannot build error response"),
        }
    }

    async fn handle_status(&mut self, report: StatusReport) {
        let StatusReport {
            task_id,
            state,
            message,
        } = report;

        if state.is_terminal()
            && let Some(task) = self.tasks.get(&task_id).await
            && !task.is_hook()
        {
            self.tasks.remove_same(&task).await;
            debug!(target: "daq.core.router", %task_id, ?state, "task removed after terminal status");
        }
        self.report(task_id, state, message).await;
    }

    async fn report(&mut self, task_id: TaskId, state: TaskStatus, message: Option<String>) {
        info!(target: "daq.core.router", %task_id, ?state, message = message.as_deref().unwrap_or(""), "status");
        let update = StatusUpdate::new(task_id, state, message, &self.executor_id);
        self.deliver(update).await;
    }

    /// Send one update; undeliverable and FAILED updates are kept for the housekeeping retry.
    async fn deliver(&mut self, update: StatusUpdate) {
        match self.transport.send_update(&update).await {
            Ok(()) => {
                self.ledger.unacked_updates.insert(update.uuid, update.clone());
                if update.state == TaskStatus::Failed {
                    self.ledger.failed.insert(update.task_id.clone(), update);
                } else if self
                    .ledger
                    .failed
                    .get(&update.task_id)
                    .is_some_and(|f| f.uuid == update.uuid)
                {
                    self.ledger.failed.remove(&update.task_id);
                }
            }
            Err(e) => {
                warn!(target: "daq.core.router", task_id = %update.task_id, uuid = %update.uuid, error = %e, "status delivery failed; will retry");
                self.ledger.failed.insert(update.task_id.clone(), update);
            }
        }
    }

    async fn housekeeping(&mut self) {
        if !self.environments.is_empty() {
            let live = self.tasks.ids().await;
            self.environments.retain(|id, _| live.contains(id));
        }
        if self.ledger.failed.is_empty() {
            return;
        }
        let retry: Vec<StatusUpdate> = self.ledger.failed.values().cloned().collect();
        debug!(target: "daq.core.router", count = retry.len(), "retrying status updates");
        for mut update in retry {
            update.touch();
            self.deliver(update).await;
        }
    }

    async fn handle_event(&mut self, report: EventReport) {
        let mut event = DeviceEvent::new(
            DeviceEventOrigin {
                agent_id: self.agent_id.clone(),
                executor_id: self.executor_id.clone(),
                task_id: report.task_id.clone(),
            },
            report.kind,
        );
        if let Some(env) = self.environments.get(&report.task_id) {
            event = event.with_label(ENVIRONMENT_LABEL, env.clone());
        }
        self.send_message(OutboundMessage::DeviceEvent(event)).await;
    }

    async fn send_message(&self, message: OutboundMessage) {
        let data = match serde_json::to_value(&message) {
            Ok(data) => data,
            Err(e) => {
                warn!(target: "daq.core.router", error = %e, "cannot encode outbound message");
                return;
            }
        };
        if let Err(e) = self.transport.send_message(data).await {
            warn!(target: "daq.core.router", error = %e, "message delivery failed");
        }
    }

    /// Kill every live task, then forward what they report until things go quiet.
    async fn shutdown(&mut self, receivers: &mut SinkReceivers) {
        let ids = self.tasks.ids().await;
        info!(target: "daq.core.router", tasks = ids.len(), "killing remaining tasks");

        let mut kills = JoinSet::new();
        for id in ids {
            if let Some(task) = self.tasks.remove(&id).await {
                kills.spawn(async move {
                    if let Err(e) = task.kill().await {
                        warn!(target: "daq.core.router", task_id = %task.id(), error = %e, "kill at shutdown failed");
                    }
                });
            }
        }
        let all_killed = tokio::time::timeout(self.shutdown_timeout, async {
            while kills.join_next().await.is_some() {}
        })
        .await;
        if all_killed.is_err() {
            warn!(target: "daq.core.router", timeout = ?self.shutdown_timeout, "tasks still being killed at shutdown");
        }

        loop {
            tokio::select! {
                Some(report) = receivers.status.recv() => self.handle_status(report).await,
                Some(report) = receivers.events.recv() => self.handle_event(report).await,
                Some(message) = receivers.messages.recv() => self.send_message(message).await,
                _ = tokio::time::sleep(SHUTDOWN_DRAIN) => break,
            }
        }
        info!(target: "daq.core.router", "router stopped");
    }
}
