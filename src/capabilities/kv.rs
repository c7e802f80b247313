use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted keys. The background location task reads
/// [`keys::ACTIVE_RIDE_ID`] directly from the shell's store; that key is the
/// only channel between in-memory ride state and background execution.
pub mod keys {
    pub const ONLINE: &str = "driver.online";
    pub const NAV_APP: &str = "driver.nav_app";
    pub const RIDE_HISTORY: &str = "driver.ride_history";
    pub const ACTIVE_RIDE_ID: &str = "driver.active_ride_id";
    /// One-time marker; its absence triggers the purge of a history cache
    /// corrupted by a previous release.
    pub const HISTORY_RESET_MARKER: &str = "driver.history_reset.v2";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum StorageOperation {
    Read { key: String },
    Write { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl StorageOperation {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Read { key } | Self::Write { key, .. } | Self::Delete { key } => key,
        }
    }
}

impl Operation for StorageOperation {
    type Output = StorageResult;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StorageOutput {
    Value(Option<Vec<u8>>),
    Written,
    Deleted,
}

impl StorageOutput {
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Value(Some(bytes)) => Some(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StorageError {
    #[error("read of '{key}' failed: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("write of '{key}' failed: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("delete of '{key}' failed: {reason}")]
    DeleteFailed { key: String, reason: String },
}

pub type StorageResult = Result<StorageOutput, StorageError>;

#[derive(Clone)]
pub struct Storage<Ev> {
    context: CapabilityContext<StorageOperation, Ev>,
}

impl<Ev> Capability<Ev> for Storage<Ev> {
    type Operation = StorageOperation;
    type MappedSelf<MappedEv> = Storage<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Storage::new(self.context.map_event(f))
    }
}

impl<Ev> Storage<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<StorageOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn read<F>(&self, key: impl Into<String>, make_event: F)
    where
        F: FnOnce(StorageResult) -> Ev + Send + Sync + 'static,
    {
        self.request(StorageOperation::Read { key: key.into() }, make_event);
    }

    pub fn write<F>(&self, key: impl Into<String>, value: Vec<u8>, make_event: F)
    where
        F: FnOnce(StorageResult) -> Ev + Send + Sync + 'static,
    {
        self.request(
            StorageOperation::Write {
                key: key.into(),
                value,
            },
            make_event,
        );
    }

    pub fn delete<F>(&self, key: impl Into<String>, make_event: F)
    where
        F: FnOnce(StorageResult) -> Ev + Send + Sync + 'static,
    {
        self.request(StorageOperation::Delete { key: key.into() }, make_event);
    }

    fn request<F>(&self, operation: StorageOperation, make_event: F)
    where
        F: FnOnce(StorageResult) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_exposes_its_key() {
        let read = StorageOperation::Read {
            key: keys::ONLINE.into(),
        };
        assert_eq!(read.key(), "driver.online");

        let write = StorageOperation::Write {
            key: keys::RIDE_HISTORY.into(),
            value: vec![1, 2, 3],
        };
        assert_eq!(write.key(), "driver.ride_history");
    }

    #[test]
    fn output_value_extraction() {
        let some = StorageOutput::Value(Some(vec![42]));
        assert_eq!(some.value(), Some(&[42u8][..]));

        let none = StorageOutput::Value(None);
        assert_eq!(none.value(), None);

        assert_eq!(StorageOutput::Written.value(), None);
    }

    #[test]
    fn operation_round_trips_through_serde() {
        let op = StorageOperation::Delete {
            key: keys::ACTIVE_RIDE_ID.into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: StorageOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn store_keys_are_distinct() {
        let all = [
            keys::ONLINE,
            keys::NAV_APP,
            keys::RIDE_HISTORY,
            keys::ACTIVE_RIDE_ID,
            keys::HISTORY_RESET_MARKER,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
