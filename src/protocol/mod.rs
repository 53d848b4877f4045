//! Messages the agent sends to the server.
//!
//! Every outgoing message is either a response to something the server asked
//! for ([`AgentResponse`]) or a request the agent initiates ([`RequestPayload`]).
//! Both are stored and replayed as an [`Envelope`].
//!
//! Each payload kind belongs to a [`Priority`] class. Buffering keeps one queue
//! per class, so a flood of telemetry never delays the answer to an action.

pub mod codec;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Error status attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

impl Status {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Priority class of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Answers to server commands and action results.
    Prioritized,
    /// Bulk data such as telemetry and state reports.
    Unprioritized,
}

impl Priority {
    /// Directory and log name of the class.
    pub fn name(&self) -> &'static str {
        match self {
            Priority::Prioritized => "prioritized",
            Priority::Unprioritized => "unprioritized",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of an agent process reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Starting,
    Running,
    Waiting,
    Stopping,
    Done,
    Unknown,
}

/// One aggregated bucket of query metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBucket {
    pub query_id: String,
    pub fingerprint: String,
    pub placeholders_count: u32,
    pub num_queries: f32,
}

/// Payload of a response to a server request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    StartAction,
    StopAction,
    PitrSwitch,
    StartJob {
        error: Option<String>,
    },
    JobStatus {
        alive: bool,
    },
    Versions {
        versions: Vec<String>,
    },
    JobProgress {
        job_id: String,
        message: String,
    },
    StopJob,
    CheckConnection {
        error: Option<String>,
    },
    JobResult {
        job_id: String,
        error: Option<String>,
    },
    ServiceInfo {
        version: String,
        table_count: Option<u32>,
    },
    AgentLogs {
        lines: Vec<String>,
    },
    SetState,
    Pong {
        current_time_micros: i64,
    },
}

impl ResponsePayload {
    /// Priority class this response is routed to.
    pub fn priority(&self) -> Priority {
        match self {
            ResponsePayload::StartAction
            | ResponsePayload::StopAction
            | ResponsePayload::PitrSwitch
            | ResponsePayload::StartJob { .. }
            | ResponsePayload::JobStatus { .. }
            | ResponsePayload::Versions { .. }
            | ResponsePayload::JobProgress { .. }
            | ResponsePayload::StopJob
            | ResponsePayload::CheckConnection { .. }
            | ResponsePayload::JobResult { .. }
            | ResponsePayload::ServiceInfo { .. } => Priority::Prioritized,
            ResponsePayload::AgentLogs { .. }
            | ResponsePayload::SetState
            | ResponsePayload::Pong { .. } => Priority::Unprioritized,
        }
    }
}

/// Payload of a request initiated by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPayload {
    ActionResult {
        action_id: String,
        output: Bytes,
        done: bool,
        error: Option<String>,
    },
    TelemetryCollect {
        buckets: Vec<MetricsBucket>,
    },
    StateChanged {
        agent_id: String,
        status: AgentStatus,
        listen_port: u16,
    },
    Ping,
}

impl RequestPayload {
    /// Priority class this request is routed to, or `None` for kinds that are
    /// never buffered.
    pub fn priority(&self) -> Option<Priority> {
        match self {
            RequestPayload::ActionResult { .. } => Some(Priority::Prioritized),
            RequestPayload::TelemetryCollect { .. } | RequestPayload::StateChanged { .. } => {
                Some(Priority::Unprioritized)
            }
            RequestPayload::Ping => None,
        }
    }
}

/// Server reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerResponse {
    /// The server processed the request.
    Ack,
    /// The request was accepted for later delivery; the server has not seen it yet.
    Queued,
    /// Reply to a ping.
    Pong { current_time_micros: i64 },
}

/// A response from the agent to a server request.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub id: u32,
    pub status: Option<Status>,
    pub payload: ResponsePayload,
}

impl AgentResponse {
    /// Create a successful response.
    pub fn new(id: u32, payload: ResponsePayload) -> Self {
        Self {
            id,
            status: None,
            payload,
        }
    }

    /// Attach an error status.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }
}

/// Body of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Response(ResponsePayload),
    Request(RequestPayload),
}

/// The unit stored in and replayed from a buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u32,
    pub status: Option<Status>,
    pub payload: Payload,
}

impl From<AgentResponse> for Envelope {
    fn from(resp: AgentResponse) -> Self {
        Self {
            id: resp.id,
            status: resp.status,
            payload: Payload::Response(resp.payload),
        }
    }
}

impl From<RequestPayload> for Envelope {
    fn from(request: RequestPayload) -> Self {
        // Requests carry no id; the server assigns one when it receives them.
        Self {
            id: 0,
            status: None,
            payload: Payload::Request(request),
        }
    }
}

/// What to do with a decoded envelope when replaying it.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Response(AgentResponse),
    Request(RequestPayload),
}

impl From<Envelope> for Outgoing {
    fn from(envelope: Envelope) -> Self {
        match envelope.payload {
            Payload::Response(payload) => Outgoing::Response(AgentResponse {
                id: envelope.id,
                status: envelope.status,
                payload,
            }),
            Payload::Request(request) => Outgoing::Request(request),
        }
    }
}
