use std::{collections::VecDeque, sync::Arc};

use daq_model::{OutputRouting, TaskId};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    sync::Mutex,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Bytes of each stream kept for the termination event.
pub const CAPTURE_LIMIT: usize = 64 * 1024;

/// Longest segment read at once; longer lines are captured and logged in pieces.
const SEGMENT_LIMIT: u64 = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Stdout,
    Stderr,
}

/// Keeps the trailing `cap` bytes written to it.
#[derive(Debug)]
pub(crate) struct TailBuffer {
    buf: VecDeque<u8>,
    cap: usize,
}

impl TailBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            cap,
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
        let excess = self.buf.len().saturating_sub(self.cap);
        self.buf.drain(..excess);
    }

    pub(crate) fn to_string_lossy(&self) -> String {
        let (a, b) = self.buf.as_slices();
        let mut out = Vec::with_capacity(a.len() + b.len());
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        String::from_utf8_lossy(&out).into_owned()
    }
}

pub(crate) type SharedTail = Arc<Mutex<TailBuffer>>;

/// Copy `reader` into a tail buffer, logging each line according to `routing`.
///
/// Memory stays bounded by [`CAPTURE_LIMIT`] plus one segment, newline or not.
pub(crate) fn pump<R>(
    reader: R,
    kind: StreamKind,
    routing: OutputRouting,
    task_id: TaskId,
) -> (SharedTail, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let tail = Arc::new(Mutex::new(TailBuffer::new(CAPTURE_LIMIT)));
    let sink = Arc::clone(&tail);

    let handle = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::with_capacity(1024);
        loop {
            line.clear();
            match (&mut reader).take(SEGMENT_LIMIT).read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    sink.lock().await.push(&line);
                    log_line(&task_id, kind, routing, &line);
                }
                Err(e) => {
                    warn!(target: "daq.exec", %task_id, stream = ?kind, error = %e, "failed to capture task output");
                    break;
                }
            }
        }
    });
    (tail, handle)
}

fn log_line(task_id: &TaskId, kind: StreamKind, routing: OutputRouting, raw: &[u8]) {
    if routing == OutputRouting::None {
        return;
    }
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches(['\n', '\r']);
    match (kind, routing) {
        (StreamKind::Stdout, OutputRouting::All) => info!(target: "daq.task.stdout", %task_id, "{line}"),
        (StreamKind::Stdout, _) => debug!(target: "daq.task.stdout", %task_id, "{line}"),
        (StreamKind::Stderr, OutputRouting::All) => info!(target: "daq.task.stderr", %task_id, "{line}"),
        (StreamKind::Stderr, _) => debug!(target: "daq.task.stderr", %task_id, "{line}"),
    }
}
