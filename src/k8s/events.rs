use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

/// Reporter identity attached to every Event the operator publishes
pub fn reporter() -> Reporter {
    "kindling-operator".into()
}

/// Build a Recorder scoped to one object
pub fn recorder<K: Resource<DynamicType = ()>>(client: Client, obj: &K) -> Recorder {
    Recorder::new(client, reporter(), obj.object_ref(&()))
}

/// Publish a Warning event; failures are logged, never fatal to the reconcile
pub async fn warn_event(recorder: &Recorder, reason: &str, action: &str, note: String) {
    let result = recorder
        .publish(Event {
            type_: EventType::Warning,
            reason: reason.into(),
            note: Some(note),
            action: action.into(),
            secondary: None,
        })
        .await;
    if let Err(e) = result {
        warn!("failed to publish {} event: {}", reason, e);
    }
}

/// Publish a Normal event; failures are logged, never fatal to the reconcile
pub async fn normal_event(recorder: &Recorder, reason: &str, action: &str, note: String) {
    let result = recorder
        .publish(Event {
            type_: EventType::Normal,
            reason: reason.into(),
            note: Some(note),
            action: action.into(),
            secondary: None,
        })
        .await;
    if let Err(e) = result {
        warn!("failed to publish {} event: {}", reason, e);
    }
}
