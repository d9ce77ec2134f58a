use serde::{Serialize, de::DeserializeOwned};

/// A typed integration-event body.
///
/// Integration events are:
/// - **immutable** (treat them as facts that already happened in another service)
/// - **versioned** (schema evolution)
/// - **routed** by a hierarchical `<entity>.<action>` key on a topic exchange
pub trait IntegrationPayload:
    Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static
{
    /// Default routing key this payload is published under (e.g. "sale.completed").
    const ROUTING_KEY: &'static str;

    /// Schema version for this payload type.
    fn version(&self) -> u32 {
        1
    }
}
