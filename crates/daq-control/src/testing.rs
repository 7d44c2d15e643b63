//! In-process OCC device for exercising the control path without a real task binary.
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::Stream;
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tonic::{Request, Response, Status, transport::Server};

use crate::proto::{
    DeviceEvent, DeviceEventType, EventStreamReply, EventStreamRequest, GetStateReply,
    GetStateRequest, StateChangeTrigger, TransitionReply, TransitionRequest,
    occ_server::{Occ, OccServer},
};

#[derive(Debug, Default)]
struct Shared {
    state: String,
    pid: i32,
    /// event -> state reached on success
    rules: HashMap<String, String>,
    received: Vec<String>,
    polls: usize,
    /// Delay before answering a transition.
    delay: Duration,
    streams: Vec<mpsc::UnboundedSender<DeviceEventType>>,
}

/// A scripted device state machine served over the real OCC protocol.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    shared: Arc<Mutex<Shared>>,
}

impl FakeDevice {
    pub fn new(initial: &str) -> Self {
        let dev = Self::default();
        dev.lock().state = initial.to_string();
        dev
    }

    pub fn with_pid(self, pid: i32) -> Self {
        self.lock().pid = pid;
        self
    }

    /// Acknowledge `event` by moving to `state`; unknown events are refused with `ok: false`.
    pub fn on(self, event: &str, state: &str) -> Self {
        self.lock().rules.insert(event.to_string(), state.to_string());
        self
    }

    pub fn with_transition_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: &str) {
        self.lock().state = state.to_string();
    }

    pub fn state(&self) -> String {
        self.lock().state.clone()
    }

    /// Transition events received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.lock().received.clone()
    }

    pub fn polls(&self) -> usize {
        self.lock().polls
    }

    /// Push an event to every open event stream; returns how many streams got it.
    pub fn emit(&self, kind: DeviceEventType) -> usize {
        let mut shared = self.lock();
        shared.streams.retain(|tx| tx.send(kind).is_ok());
        shared.streams.len()
    }

    pub fn open_streams(&self) -> usize {
        let mut shared = self.lock();
        shared.streams.retain(|tx| !tx.is_closed());
        shared.streams.len()
    }

    /// Hang up every open event stream.
    pub fn end_streams(&self) {
        self.lock().streams.clear();
    }

    /// Serve on an ephemeral loopback port.
    pub async fn serve(&self) -> std::io::Result<FakeServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let incoming = futures::stream::unfold(listener, |listener| async move {
            let conn = listener.accept().await.map(|(stream, _)| stream);
            Some((conn, listener))
        });

        let service = OccServer::new(self.clone());
        let handle = tokio::spawn(async move {
            let _ = Server::builder()
                .add_service(service)
                .serve_with_incoming(incoming)
                .await;
        });
        Ok(FakeServer { port, handle })
    }
}

/// Running fake device server; stops when dropped.
#[derive(Debug)]
pub struct FakeServer {
    pub port: u16,
    handle: JoinHandle<()>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type ReplyStream = Pin<Box<dyn Stream<Item = Result<EventStreamReply, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl Occ for FakeDevice {
    type EventStreamStream = ReplyStream;

    async fn event_stream(
        &self,
        _request: Request<EventStreamRequest>,
    ) -> Result<Response<Self::EventStreamStream>, Status> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().streams.push(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            let kind = rx.recv().await?;
            let reply = EventStreamReply {
                event: Some(DeviceEvent { r#type: kind as i32 }),
            };
            Some((Ok(reply), rx))
        });
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_state(
        &self,
        _request: Request<GetStateRequest>,
    ) -> Result<Response<GetStateReply>, Status> {
        let mut shared = self.lock();
        shared.polls += 1;
        Ok(Response::new(GetStateReply {
            state: shared.state.clone(),
            pid: shared.pid,
        }))
    }

    async fn transition(
        &self,
        request: Request<TransitionRequest>,
    ) -> Result<Response<TransitionReply>, Status> {
        let req = request.into_inner();
        let delay = {
            let mut shared = self.lock();
            shared.received.push(req.transition_event.clone());
            shared.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut shared = self.lock();
        let ok = match shared.rules.get(&req.transition_event).cloned() {
            Some(next) => {
                shared.state = next;
                true
            }
            None => false,
        };
        Ok(Response::new(TransitionReply {
            trigger: StateChangeTrigger::Executor as i32,
            state: shared.state.clone(),
            transition_event: req.transition_event,
            ok,
        }))
    }
}
