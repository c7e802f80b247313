use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Presence channel shared by all online drivers.
pub const PRESENCE_CHANNEL: &str = "presence-drivers";

/// Private channel scoped to one ride; bound on the end-of-ride screen for
/// rating/tip and payment confirmation events.
#[must_use]
pub fn ride_channel(ride_id: &str) -> String {
    format!("private-ride.{ride_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum RealtimeOperation {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

impl RealtimeOperation {
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Self::Subscribe { channel } | Self::Unsubscribe { channel } => channel,
        }
    }
}

impl Operation for RealtimeOperation {
    type Output = RealtimeResult;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeOutput {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RealtimeError {
    #[error("realtime connection unavailable")]
    ConnectionLost,

    #[error("subscription to '{channel}' rejected: {reason}")]
    SubscriptionRejected { channel: String, reason: String },

    #[error("realtime error: {message}")]
    Unknown { message: String },
}

pub type RealtimeResult = Result<RealtimeOutput, RealtimeError>;

#[derive(Clone)]
pub struct Realtime<Ev> {
    context: CapabilityContext<RealtimeOperation, Ev>,
}

impl<Ev> Capability<Ev> for Realtime<Ev> {
    type Operation = RealtimeOperation;
    type MappedSelf<MappedEv> = Realtime<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Realtime::new(self.context.map_event(f))
    }
}

impl<Ev> Realtime<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<RealtimeOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn subscribe<F>(&self, channel: impl Into<String>, make_event: F)
    where
        F: FnOnce(RealtimeResult) -> Ev + Send + Sync + 'static,
    {
        self.request(
            RealtimeOperation::Subscribe {
                channel: channel.into(),
            },
            make_event,
        );
    }

    pub fn unsubscribe<F>(&self, channel: impl Into<String>, make_event: F)
    where
        F: FnOnce(RealtimeResult) -> Ev + Send + Sync + 'static,
    {
        self.request(
            RealtimeOperation::Unsubscribe {
                channel: channel.into(),
            },
            make_event,
        );
    }

    fn request<F>(&self, operation: RealtimeOperation, make_event: F)
    where
        F: FnOnce(RealtimeResult) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}
