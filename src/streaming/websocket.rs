//! WebSocket transport for task progress streams (`/tasks/{taskId}/progress`).

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::config::BridgeConfig;
use crate::constants::endpoints;
use crate::error::{BridgeError, BridgeResult};
use crate::streaming::event::{parse_frame, pong_frame, InboundFrame};
use crate::streaming::{EventStream, ProgressEvent, StreamConnector};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket per task against the streaming endpoint
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: Url,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new(config: &BridgeConfig) -> BridgeResult<Self> {
        let base_url = config.resolved_stream_url()?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::configuration(format!(
                "Stream URL cannot carry paths: {base_url}"
            )));
        }

        Ok(Self {
            base_url,
            connect_timeout: config.request_timeout(),
            idle_timeout: config.streaming.idle_timeout(),
        })
    }

    /// `{stream_url}/tasks/{task_id}/progress`
    pub fn progress_url(&self, task_id: &str) -> BridgeResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                BridgeError::configuration("Stream URL cannot carry paths".to_string())
            })?;
            path.pop_if_empty()
                .extend([endpoints::TASKS, task_id, endpoints::PROGRESS]);
        }
        Ok(url)
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self, task_id: &str) -> BridgeResult<EventStream> {
        let url = self.progress_url(task_id)?;
        debug!(url = %url, task_id = %task_id, "Opening progress stream");

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                BridgeError::stream(format!(
                    "WebSocket connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| BridgeError::stream(format!("WebSocket connect failed: {e}")))?;

        let (write, read) = socket.split();
        let reader = FrameReader {
            task_id: task_id.to_string(),
            write,
            read,
            idle_timeout: self.idle_timeout,
            done: false,
        };

        Ok(futures::stream::unfold(reader, |mut reader| async move {
            reader.next_event().await.map(|item| (item, reader))
        })
        .boxed())
    }
}

struct FrameReader {
    task_id: String,
    write: SplitSink<Socket, Message>,
    read: SplitStream<Socket>,
    idle_timeout: Option<Duration>,
    done: bool,
}

impl FrameReader {
    /// Next decoded event; `None` once the socket is closed
    async fn next_event(&mut self) -> Option<BridgeResult<ProgressEvent>> {
        if self.done {
            return None;
        }

        loop {
            let message = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.read.next()).await {
                    Ok(message) => message,
                    Err(_) => {
                        self.done = true;
                        warn!(
                            task_id = %self.task_id,
                            idle_timeout_ms = limit.as_millis() as u64,
                            "Progress stream idle, treating connection as dead"
                        );
                        return Some(Err(BridgeError::stream(format!(
                            "No frame received within {}ms",
                            limit.as_millis()
                        ))));
                    }
                },
                None => self.read.next().await,
            };

            let text = match message {
                None => return None,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(BridgeError::stream(format!("WebSocket error: {e}"))));
                }
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        return Some(Err(BridgeError::stream("Binary frame is not valid UTF-8")))
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(task_id = %self.task_id, close = ?frame, "Progress stream close frame");
                    continue;
                }
                // Control frames are answered by the socket layer
                Some(Ok(_)) => continue,
            };

            match parse_frame(&text) {
                Ok(InboundFrame::Event(event)) => return Some(Ok(event)),
                Ok(InboundFrame::Ping) => {
                    if let Err(e) = self.write.send(Message::Text(pong_frame())).await {
                        self.done = true;
                        return Some(Err(BridgeError::stream(format!("Failed to answer ping: {e}"))));
                    }
                }
                Ok(InboundFrame::Ignored(_)) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
