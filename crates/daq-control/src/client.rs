//! gRPC link to the control endpoint of a controllable task.
use std::time::Duration;

use async_trait::async_trait;
use daq_model::{DeviceEventKind, DeviceState};
use tokio::{sync::RwLock, time::Instant};
use tokio_util::sync::CancellationToken;
use tonic::{Code, Streaming, transport::{Channel, Endpoint}};
use tracing::{debug, trace, warn};

use crate::{
    error::{ControlError, ControlResult},
    proto::{
        ConfigEntry, DeviceEventType, EventStreamReply, EventStreamRequest, GetStateRequest,
        StateChangeTrigger, TransitionRequest, occ_client::OccClient,
    },
    transitioner::{DeviceLink, DeviceTransition},
};

const FIRST_RETRY_DELAY: Duration = Duration::from_millis(200);
const RETRY_BACKOFF: f64 = 1.1;
/// Receive errors tolerated in a row before the event stream is given up.
const MAX_STREAM_ERRORS: u32 = 10;

/// State and pid as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub pid: i32,
}

/// Connection to one task's control port.
///
/// [`ControlClient::close`] drops the connection and ends any open [`DeviceEventStream`].
#[derive(Debug)]
pub struct ControlClient {
    endpoint: String,
    inner: RwLock<Option<OccClient<Channel>>>,
    closed: CancellationToken,
}

impl ControlClient {
    /// Connect to `127.0.0.1:port`, retrying until `timeout` elapses.
    pub async fn dial(port: u16, timeout: Duration) -> ControlResult<Self> {
        let endpoint = format!("http://127.0.0.1:{port}");
        let target = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| ControlError::InvalidEndpoint(e.to_string()))?
            .connect_timeout(timeout);

        let deadline = Instant::now() + timeout;
        let mut delay = FIRST_RETRY_DELAY;
        let channel = loop {
            let last_error = match tokio::time::timeout_at(deadline, target.connect()).await {
                Ok(Ok(channel)) => break channel,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "deadline exceeded".to_string(),
            };
            if Instant::now() + delay >= deadline {
                return Err(ControlError::DialTimeout {
                    endpoint,
                    timeout,
                    last_error,
                });
            }
            trace!(target: "daq.control", %endpoint, error = %last_error, ?delay, "control endpoint not up yet");
            tokio::time::sleep(delay).await;
            delay = delay.mul_f64(RETRY_BACKOFF);
        };

        debug!(target: "daq.control", %endpoint, "control link established");
        Ok(Self {
            endpoint,
            inner: RwLock::new(Some(OccClient::new(channel))),
            closed: CancellationToken::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn client(&self) -> ControlResult<OccClient<Channel>> {
        self.inner.read().await.clone().ok_or(ControlError::Closed)
    }

    pub async fn get_state(&self) -> ControlResult<DeviceStatus> {
        let reply = self
            .client()
            .await?
            .get_state(GetStateRequest {})
            .await?
            .into_inner();
        Ok(DeviceStatus {
            state: DeviceState::new(reply.state),
            pid: reply.pid,
        })
    }

    /// Send one device transition and validate the reply.
    ///
    /// A reply only counts as success when it is `ok`, triggered by the executor, and echoes
    /// both the requested event and destination state.
    pub async fn transition(&self, step: DeviceTransition) -> ControlResult<DeviceState> {
        debug!(target: "daq.control", event = %step.event, src = %step.src, dst = %step.dst, "requesting device transition");

        let arguments = step
            .arguments
            .iter()
            .map(|(key, value)| {
                trace!(target: "daq.control", %key, %value, "pushing argument");
                ConfigEntry {
                    key: key.clone(),
                    value: value.clone(),
                }
            })
            .collect();

        let reply = self
            .client()
            .await?
            .transition(TransitionRequest {
                src_state: step.src.to_string(),
                transition_event: step.event.clone(),
                arguments,
            })
            .await
            .inspect_err(|status| {
                warn!(target: "daq.control", code = ?status.code(), message = %status.message(), "transition call error");
            })?
            .into_inner();

        let trigger = reply.trigger();
        if reply.ok
            && trigger == StateChangeTrigger::Executor
            && reply.transition_event == step.event
            && reply.state == step.dst.as_str()
        {
            debug!(target: "daq.control", dst = %reply.state, "device transition complete");
            return Ok(DeviceState::new(reply.state));
        }

        Err(ControlError::Transition {
            reason: format!(
                "ok: {}, trigger: {}, event: {}, state: {}",
                reply.ok,
                trigger.as_str_name(),
                reply.transition_event,
                reply.state
            ),
            state: DeviceState::new(reply.state),
        })
    }

    pub async fn event_stream(&self) -> ControlResult<DeviceEventStream> {
        let inner = self
            .client()
            .await?
            .event_stream(EventStreamRequest {})
            .await?
            .into_inner();
        Ok(DeviceEventStream {
            inner,
            closed: self.closed.clone(),
        })
    }

    /// Drop the connection. Idempotent.
    pub async fn close(&self) {
        if self.inner.write().await.take().is_some() {
            debug!(target: "daq.control", endpoint = %self.endpoint, "control link closed");
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl DeviceLink for ControlClient {
    async fn transition(&self, step: DeviceTransition) -> Result<DeviceState, ControlError> {
        ControlClient::transition(self, step).await
    }
}

/// Device-originated events of one task.
#[derive(Debug)]
pub struct DeviceEventStream {
    inner: Streaming<EventStreamReply>,
    closed: CancellationToken,
}

impl DeviceEventStream {
    /// Next event worth republishing, or `None` once the stream is over.
    ///
    /// The stream is over when the link is closed, the device hangs up or becomes unavailable,
    /// or sends an empty event. Other receive errors are logged and skipped.
    pub async fn next(&mut self) -> Option<DeviceEventKind> {
        let mut errors = 0;
        loop {
            let received = tokio::select! {
                _ = self.closed.cancelled() => return None,
                msg = self.inner.message() => msg,
            };

            match received {
                Ok(Some(reply)) => {
                    let kind = reply
                        .event
                        .map(|e| e.r#type())
                        .unwrap_or(DeviceEventType::NullDeviceEvent);
                    match kind {
                        DeviceEventType::NullDeviceEvent => {
                            debug!(target: "daq.control", "null device event; closing event stream");
                            return None;
                        }
                        DeviceEventType::EndOfStream => return Some(DeviceEventKind::EndOfStream),
                        DeviceEventType::TaskInternalError => {
                            return Some(DeviceEventKind::TaskInternalError);
                        }
                        DeviceEventType::BasicTaskTerminated => {
                            trace!(target: "daq.control", "ignoring process-level event from device");
                        }
                    }
                }
                Ok(None) => {
                    debug!(target: "daq.control", "device closed event stream");
                    return None;
                }
                Err(status) if status.code() == Code::Unavailable => {
                    debug!(target: "daq.control", message = %status.message(), "event stream unavailable");
                    return None;
                }
                Err(status) => {
                    warn!(target: "daq.control", code = ?status.code(), message = %status.message(), "event stream receive error");
                    errors += 1;
                    if errors >= MAX_STREAM_ERRORS {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;
    use std::collections::HashMap;

    const DIAL: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn get_state_reports_state_and_pid() {
        let dev = FakeDevice::new("IDLE").with_pid(4242);
        let server = dev.serve().await.unwrap();

        let client = ControlClient::dial(server.port, DIAL).await.unwrap();
        let status = client.get_state().await.unwrap();
        assert_eq!(status.state.as_str(), "IDLE");
        assert_eq!(status.pid, 4242);
        assert_eq!(dev.polls(), 1);
    }

    #[tokio::test]
    async fn transition_accepts_matching_reply() {
        let dev = FakeDevice::new("STANDBY").on("CONFIGURE", "CONFIGURED");
        let server = dev.serve().await.unwrap();
        let client = ControlClient::dial(server.port, DIAL).await.unwrap();

        let mut args = HashMap::new();
        args.insert("key".to_string(), "value".to_string());
        let step = DeviceTransition::new(
            "CONFIGURE",
            DeviceState::from("STANDBY"),
            DeviceState::from("CONFIGURED"),
        )
        .with_arguments(args);

        let state = client.transition(step).await.unwrap();
        assert_eq!(state.as_str(), "CONFIGURED");
        assert_eq!(dev.received(), vec!["CONFIGURE"]);
    }

    #[tokio::test]
    async fn transition_rejects_wrong_destination() {
        // Device acknowledges but lands somewhere else.
        let dev = FakeDevice::new("STANDBY").on("CONFIGURE", "ERROR");
        let server = dev.serve().await.unwrap();
        let client = ControlClient::dial(server.port, DIAL).await.unwrap();

        let step = DeviceTransition::new(
            "CONFIGURE",
            DeviceState::from("STANDBY"),
            DeviceState::from("CONFIGURED"),
        );
        let err = client.transition(step).await.unwrap_err();
        assert!(matches!(err, ControlError::Transition { .. }));
        assert_eq!(err.reached_state().as_str(), "ERROR");
    }

    #[tokio::test]
    async fn transition_rejects_not_ok() {
        let dev = FakeDevice::new("RUNNING");
        let server = dev.serve().await.unwrap();
        let client = ControlClient::dial(server.port, DIAL).await.unwrap();

        let step = DeviceTransition::new(
            "STOP",
            DeviceState::from("RUNNING"),
            DeviceState::from("CONFIGURED"),
        );
        let err = client.transition(step).await.unwrap_err();
        assert_eq!(err.reached_state().as_str(), "RUNNING");
        assert!(err.to_string().contains("ok: false"));
    }

    #[tokio::test]
    async fn dial_gives_up_after_timeout() {
        // Reserve a port, then free it so nothing listens there.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let started = std::time::Instant::now();
        let err = ControlClient::dial(port, Duration::from_millis(600))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::DialTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn event_stream_forwards_and_stops_on_null_event() {
        let dev = FakeDevice::new("RUNNING");
        let server = dev.serve().await.unwrap();
        let client = ControlClient::dial(server.port, DIAL).await.unwrap();
        let mut events = client.event_stream().await.unwrap();

        assert_eq!(dev.emit(DeviceEventType::EndOfStream), 1);
        assert_eq!(events.next().await, Some(DeviceEventKind::EndOfStream));

        dev.emit(DeviceEventType::BasicTaskTerminated);
        dev.emit(DeviceEventType::TaskInternalError);
        assert_eq!(events.next().await, Some(DeviceEventKind::TaskInternalError));

        dev.emit(DeviceEventType::NullDeviceEvent);
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn event_stream_ends_on_hangup() {
        let dev = FakeDevice::new("RUNNING");
        let server = dev.serve().await.unwrap();
        let client = ControlClient::dial(server.port, DIAL).await.unwrap();
        let mut events = client.event_stream().await.unwrap();

        dev.end_streams();
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn close_ends_stream_and_refuses_calls() {
        let dev = FakeDevice::new("RUNNING");
        let server = dev.serve().await.unwrap();
        let client = ControlClient::dial(server.port, DIAL).await.unwrap();
        let mut events = client.event_stream().await.unwrap();

        client.close().await;
        client.close().await;
        assert!(client.is_closed());
        assert_eq!(events.next().await, None);
        assert!(matches!(client.get_state().await, Err(ControlError::Closed)));
    }
}
