//! IPC client implementation

use hearth_api::{Command, Event, Request, Response, ResponseResult};
use hearth_util::{FamilyId, UserId};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC client for hearthd
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
    actor: Option<UserId>,
    timeout: Option<Duration>,
    /// Events that arrived while waiting for a response
    pending_events: VecDeque<Event>,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            actor: None,
            timeout: None,
            pending_events: VecDeque::new(),
        })
    }

    /// Act on behalf of `actor` for every following request
    pub fn with_actor(mut self, actor: impl Into<UserId>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Ask the service to give up on each request after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send a command and wait for its response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut request = Request::new(request_id, command);
        request.actor = self.actor.clone();
        request.timeout_ms = self.timeout.map(|t| t.as_millis() as u64);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        loop {
            let line = read_line(&mut self.reader).await?;
            if let Ok(response) = serde_json::from_str::<Response>(&line) {
                return Ok(response);
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => self.pending_events.push_back(event),
                Err(_) => return Err(IpcError::InvalidMessage(line)),
            }
        }
    }

    /// Join a family group and consume this client to return an event stream
    pub async fn subscribe(mut self, family_id: FamilyId) -> IpcResult<EventStream> {
        let response = self.send(Command::Subscribe { family_id }).await?;

        if let ResponseResult::Err(e) = response.result {
            return Err(IpcError::Rejected {
                code: e.code,
                message: e.message,
            });
        }

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
            buffered: self.pending_events,
        })
    }
}

/// Stream of family events from hearthd
pub struct EventStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    /// Dropping the write half would shut down our side and end the subscription
    _writer: tokio::net::unix::OwnedWriteHalf,
    buffered: VecDeque<Event>,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.buffered.pop_front() {
            return Ok(event);
        }
        let line = read_line(&mut self.reader).await?;
        Ok(serde_json::from_str(&line)?)
    }
}

async fn read_line(reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>) -> IpcResult<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    Ok(line.trim().to_string())
}
