//! NATS JetStream event sink.
//!
//! Execution events are published to subjects like
//! `execution.<execution_id>`, one subject per execution, so a run's
//! history can be replayed by filtering its subject.

use crate::error::EventSinkError;
use crate::events::{Envelope, EventSink, ExecutionEvent};
use async_nats::jetstream;
use async_trait::async_trait;
use flowline_core::ExecutionId;
use serde::Deserialize;
use std::sync::Arc;

/// Subject prefix for execution events.
const EVENTS_SUBJECT_PREFIX: &str = "execution";

/// Stream name for execution events.
const EVENTS_STREAM_NAME: &str = "EXECUTION_EVENTS";

/// Configuration for the NATS event sink.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Stream name for events (defaults to EXECUTION_EVENTS).
    #[serde(default)]
    pub stream_name: Option<String>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(EVENTS_STREAM_NAME)
    }
}

/// NATS JetStream-backed event sink.
pub struct NatsEventSink {
    jetstream: Arc<jetstream::Context>,
    config: NatsConfig,
}

impl NatsEventSink {
    /// Connects to NATS and ensures the events stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    pub async fn new(config: NatsConfig) -> Result<Self, EventSinkError> {
        let client = async_nats::connect(&config.url).await.map_err(|e| {
            EventSinkError::ConnectionFailed {
                message: e.to_string(),
            }
        })?;

        let jetstream = async_nats::jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: config.stream().to_string(),
            subjects: vec![format!("{EVENTS_SUBJECT_PREFIX}.>")],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| EventSinkError::ConnectionFailed {
                message: format!("failed to create events stream: {e}"),
            })?;

        Ok(Self {
            jetstream: Arc::new(jetstream),
            config,
        })
    }

    /// Returns the subject for an execution's events.
    fn execution_subject(execution_id: ExecutionId) -> String {
        format!("{EVENTS_SUBJECT_PREFIX}.{execution_id}")
    }
}

#[async_trait]
impl EventSink for NatsEventSink {
    async fn publish(&self, event: Envelope<ExecutionEvent>) -> Result<(), EventSinkError> {
        let subject = Self::execution_subject(event.payload.execution_id());
        let bytes = event
            .to_json_bytes()
            .map_err(|e| EventSinkError::PublishFailed {
                message: format!("failed to serialize event: {e}"),
            })?;

        self.jetstream
            .publish(subject, bytes.into())
            .await
            .map_err(|e| EventSinkError::PublishFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| EventSinkError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn load_events(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionEvent>, EventSinkError> {
        let stream = self
            .jetstream
            .get_stream(self.config.stream())
            .await
            .map_err(|e| EventSinkError::LoadFailed {
                message: format!("failed to get stream: {e}"),
            })?;

        let consumer_config = jetstream::consumer::pull::Config {
            filter_subject: Self::execution_subject(execution_id),
            deliver_policy: jetstream::consumer::DeliverPolicy::All,
            ..Default::default()
        };

        let consumer = stream.create_consumer(consumer_config).await.map_err(|e| {
            EventSinkError::LoadFailed {
                message: format!("failed to create consumer: {e}"),
            }
        })?;

        let mut events = Vec::new();
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| EventSinkError::LoadFailed {
                message: format!("failed to get messages: {e}"),
            })?;

        use futures::StreamExt;
        while let Ok(Some(message)) =
            tokio::time::timeout(std::time::Duration::from_millis(100), messages.next()).await
        {
            let message = message.map_err(|e| EventSinkError::LoadFailed {
                message: e.to_string(),
            })?;

            let envelope: Envelope<ExecutionEvent> = Envelope::from_json_bytes(&message.payload)
                .map_err(|e| EventSinkError::LoadFailed {
                    message: format!("failed to deserialize event: {e}"),
                })?;

            events.push(envelope.into_payload());

            message
                .ack()
                .await
                .map_err(|e| EventSinkError::LoadFailed {
                    message: format!("failed to ack message: {e}"),
                })?;
        }

        // Clean up the ephemeral consumer
        drop(messages);

        Ok(events)
    }
}
