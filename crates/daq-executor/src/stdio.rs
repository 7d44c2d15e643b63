//! JSON-lines transport over the process's standard streams.
use async_trait::async_trait;
use daq_core::{Transport, TransportError};
use daq_model::{InboundEvent, OutboundFrame, StatusUpdate};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex, mpsc},
};
use tracing::{debug, info, warn};

/// Writes one JSON frame per line.
#[derive(Debug)]
pub struct StdioTransport<W> {
    out: Mutex<W>,
}

impl<W> StdioTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    async fn write_frame(&self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(frame).map_err(|e| TransportError::Encode(e.to_string()))?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> Transport for StdioTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send_update(&self, update: &StatusUpdate) -> Result<(), TransportError> {
        self.write_frame(&OutboundFrame::Update {
            status: update.clone(),
        })
        .await
    }

    async fn send_message(&self, data: Value) -> Result<(), TransportError> {
        self.write_frame(&OutboundFrame::Message { data }).await
    }
}

/// Decode inbound frames, one per line, until EOF; EOF is turned into SHUTDOWN.
///
/// Undecodable lines are logged and skipped.
pub async fn read_inbound<R>(reader: R, tx: mpsc::Sender<InboundEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundEvent>(line) {
                    Ok(event) => {
                        debug!(target: "daq.executor", kind = event.kind(), "inbound frame");
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(target: "daq.executor", error = %e, "skipping undecodable frame"),
                }
            }
            Ok(None) => {
                info!(target: "daq.executor", "input closed");
                break;
            }
            Err(e) => {
                warn!(target: "daq.executor", error = %e, "input read failed");
                break;
            }
        }
    }
    let _ = tx.send(InboundEvent::Shutdown).await;
}

#[cfg(test)]
mod tests {
    use daq_model::{TaskId, TaskStatus};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn frames_are_written_as_lines() {
        let transport = StdioTransport::new(Vec::new());
        let update = StatusUpdate::new(TaskId::from("t-1"), TaskStatus::Running, None, "exec");
        transport.send_update(&update).await.unwrap();
        transport.send_message(json!({"kind": "taskPid", "pid": 7})).await.unwrap();

        let out = String::from_utf8(transport.into_inner()).unwrap();
        let lines: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "UPDATE");
        assert_eq!(lines[0]["status"]["taskId"], "t-1");
        assert_eq!(lines[0]["status"]["state"], "RUNNING");
        assert_eq!(lines[1]["type"], "MESSAGE");
        assert_eq!(lines[1]["data"]["pid"], 7);
    }

    #[tokio::test]
    async fn reader_skips_garbage_and_ends_with_shutdown() {
        let input = concat!(
            r#"{"type":"KILL","taskId":"t-1"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"type":"ACKNOWLEDGED","taskId":"t-1","uuid":"00000000-0000-0000-0000-000000000000"}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        read_inbound(input.as_bytes(), tx).await;

        assert_eq!(rx.recv().await.unwrap().kind(), "KILL");
        assert_eq!(rx.recv().await.unwrap().kind(), "ACKNOWLEDGED");
        assert_eq!(rx.recv().await.unwrap(), InboundEvent::Shutdown);
        assert!(rx.recv().await.is_none());
    }
}
