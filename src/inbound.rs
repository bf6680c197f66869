//! Adapter from the six inbound event-bus channels to the ingestion port
//!
//! The engine only exposes `collect_context`; this router owns the mapping
//! from bus topics to module tags so the core stays transport-agnostic.

use crate::error::RouteError;
use crate::events::{ChannelTag, ModuleTag, ObservationMetadata, Payload};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Narrow ingestion port implemented by the engine
pub trait ContextSink: Send + Sync {
    fn collect_context(
        &self,
        source: ModuleTag,
        origin_channel: ChannelTag,
        payload: Payload,
        metadata: Option<ObservationMetadata>,
    );
}

/// Inbound channels consumed from the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundChannel {
    NavigationUpdate,
    WeatherUpdate,
    SystemFailure,
    CrewUpdate,
    SensorsData,
    MissionUpdate,
}

impl InboundChannel {
    pub const ALL: [InboundChannel; 6] = [
        InboundChannel::NavigationUpdate,
        InboundChannel::WeatherUpdate,
        InboundChannel::SystemFailure,
        InboundChannel::CrewUpdate,
        InboundChannel::SensorsData,
        InboundChannel::MissionUpdate,
    ];

    pub fn topic(&self) -> &'static str {
        match self {
            InboundChannel::NavigationUpdate => "navigation:update",
            InboundChannel::WeatherUpdate => "weather:update",
            InboundChannel::SystemFailure => "system:failure",
            InboundChannel::CrewUpdate => "crew:update",
            InboundChannel::SensorsData => "sensors:data",
            InboundChannel::MissionUpdate => "mission:update",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.topic() == topic)
    }

    /// Module the channel's events are attributed to
    pub fn module(&self) -> ModuleTag {
        match self {
            InboundChannel::NavigationUpdate => ModuleTag::Navigation,
            InboundChannel::WeatherUpdate => ModuleTag::Weather,
            InboundChannel::SystemFailure => ModuleTag::Systems,
            InboundChannel::CrewUpdate => ModuleTag::Crew,
            InboundChannel::SensorsData => ModuleTag::Sensors,
            InboundChannel::MissionUpdate => ModuleTag::Mission,
        }
    }
}

/// Raw event as delivered by the bus: `(topic, origin, payload)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEvent {
    pub channel: String,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Routes inbound bus events into a `ContextSink`
#[derive(Clone)]
pub struct InboundRouter {
    sink: Arc<dyn ContextSink>,
}

impl InboundRouter {
    pub fn new(sink: Arc<dyn ContextSink>) -> Self {
        Self { sink }
    }

    /// Deliver one event to the sink
    ///
    /// # Errors
    ///
    /// Returns `RouteError::UnknownChannel` if the topic is not one of the six
    /// inbound channels; the event is not ingested.
    pub fn dispatch(&self, event: InboundEvent) -> Result<ModuleTag, RouteError> {
        let channel = InboundChannel::from_topic(&event.channel)
            .ok_or_else(|| RouteError::UnknownChannel(event.channel.clone()))?;
        let module = channel.module();

        debug!(
            "Routing {} event from {} to {}",
            channel.topic(),
            event.origin.as_deref().unwrap_or("unknown origin"),
            module
        );

        self.sink
            .collect_context(module, ChannelTag::Internal, into_payload(event.payload), None);
        Ok(module)
    }

    /// Consume events from a channel until every sender is dropped
    pub fn spawn(self, mut receiver: mpsc::Receiver<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Inbound router started");
            while let Some(event) = receiver.recv().await {
                if let Err(e) = self.dispatch(event) {
                    warn!("Dropping inbound event: {}", e);
                }
            }
            info!("Inbound router stopped");
        })
    }
}

/// Objects pass through, anything else is wrapped as `{"value": ...}`
fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut payload = Payload::new();
            payload.insert("value".to_string(), other);
            payload
        }
    }
}
