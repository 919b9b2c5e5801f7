//! Execution lifecycle events and the event sink.
//!
//! Every state change of an execution is published as an event wrapped in
//! a versioned envelope, so external consumers can follow runs without
//! polling the store. The in-memory sink backs tests and single-process
//! deployments; the NATS JetStream sink lives in [`crate::nats`].

use crate::error::EventSinkError;
use crate::node::NodeId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Mutex, PoisonError};

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned envelope that wraps serialized data.
///
/// All data published to the event sink is wrapped in this envelope to
/// support schema evolution and rolling deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The version of the envelope format.
    pub version: u32,
    /// The wrapped payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope with the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    /// Unwraps the envelope, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Returns true if this envelope uses the current version.
    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Deserializes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Lifecycle events for an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Execution was created.
    Queued {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        input: JsonValue,
        timestamp: DateTime<Utc>,
    },
    /// Execution started running.
    Started {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    /// A step started an attempt.
    StepStarted {
        execution_id: ExecutionId,
        node_id: NodeId,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A step completed successfully.
    StepSucceeded {
        execution_id: ExecutionId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    /// A step failed after exhausting retries.
    StepFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A step was skipped.
    StepSkipped {
        execution_id: ExecutionId,
        node_id: NodeId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Execution completed successfully.
    Succeeded {
        execution_id: ExecutionId,
        output: JsonValue,
        timestamp: DateTime<Utc>,
    },
    /// Execution failed.
    Failed {
        execution_id: ExecutionId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Execution was cancelled.
    Cancelled {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Returns the execution ID associated with this event.
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            Self::Queued { execution_id, .. }
            | Self::Started { execution_id, .. }
            | Self::StepStarted { execution_id, .. }
            | Self::StepSucceeded { execution_id, .. }
            | Self::StepFailed { execution_id, .. }
            | Self::StepSkipped { execution_id, .. }
            | Self::Succeeded { execution_id, .. }
            | Self::Failed { execution_id, .. }
            | Self::Cancelled { execution_id, .. } => *execution_id,
        }
    }

    /// Returns the timestamp of this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Queued { timestamp, .. }
            | Self::Started { timestamp, .. }
            | Self::StepStarted { timestamp, .. }
            | Self::StepSucceeded { timestamp, .. }
            | Self::StepFailed { timestamp, .. }
            | Self::StepSkipped { timestamp, .. }
            | Self::Succeeded { timestamp, .. }
            | Self::Failed { timestamp, .. }
            | Self::Cancelled { timestamp, .. } => *timestamp,
        }
    }
}

/// Trait for event publication and replay.
///
/// This abstraction lets the engine run without NATS while still
/// supporting the JetStream implementation in production.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes an event.
    async fn publish(&self, event: Envelope<ExecutionEvent>) -> Result<(), EventSinkError>;

    /// Loads all events for an execution, in publication order.
    async fn load_events(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionEvent>, EventSinkError>;
}

/// In-memory event sink.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<Envelope<ExecutionEvent>>>,
}

impl InMemoryEventSink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, event: Envelope<ExecutionEvent>) -> Result<(), EventSinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }

    async fn load_events(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionEvent>, EventSinkError> {
        Ok(self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.payload.execution_id() == execution_id)
            .map(|e| e.payload.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_creation() {
        let event = ExecutionEvent::Started {
            execution_id: ExecutionId::new(),
            timestamp: Utc::now(),
        };
        let envelope = Envelope::new(event.clone());

        assert_eq!(envelope.version, CURRENT_VERSION);
        assert!(envelope.is_current_version());
        assert_eq!(envelope.into_payload(), event);
    }

    #[test]
    fn envelope_serde_roundtrip() {
        let event = ExecutionEvent::StepFailed {
            execution_id: ExecutionId::new(),
            node_id: NodeId::new(),
            error: "connector timed out".to_string(),
            timestamp: Utc::now(),
        };
        let envelope = Envelope::new(event);

        let bytes = envelope.to_json_bytes().expect("serialize");
        let parsed: Envelope<ExecutionEvent> =
            Envelope::from_json_bytes(&bytes).expect("deserialize");

        assert_eq!(envelope, parsed);
    }

    #[test]
    fn envelope_json_structure() {
        let envelope = Envelope::new(json!({"hello": 1}));
        let json = serde_json::to_value(&envelope).expect("to_value");

        assert_eq!(json["version"], CURRENT_VERSION);
        assert!(json.get("payload").is_some());
    }

    #[tokio::test]
    async fn in_memory_sink_filters_by_execution() {
        let sink = InMemoryEventSink::new();
        let first = ExecutionId::new();
        let second = ExecutionId::new();

        sink.publish(Envelope::new(ExecutionEvent::Started {
            execution_id: first,
            timestamp: Utc::now(),
        }))
        .await
        .unwrap();
        sink.publish(Envelope::new(ExecutionEvent::Started {
            execution_id: second,
            timestamp: Utc::now(),
        }))
        .await
        .unwrap();

        let events = sink.load_events(first).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].execution_id(), first);
    }
}
