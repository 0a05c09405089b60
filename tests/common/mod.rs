use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use action_gate::{
    ActionHandler, ActionSystem, Event, EventTopic, ManualClock, Params, PermissionDef,
    RequiredPermission, Scope, MEMORY_PATH,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

pub struct TestGate {
    pub system: ActionSystem,
    pub clock: Arc<ManualClock>,
}

pub async fn build_gate() -> TestGate {
    build_gate_at(MEMORY_PATH).await
}

pub async fn build_gate_at(path: &str) -> TestGate {
    let start = Utc
        .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("start instant should be valid");
    let clock = Arc::new(ManualClock::new(start));
    let system = ActionSystem::open_with_clock(path, clock.clone())
        .await
        .expect("action system should open");
    system
        .register_handler(Arc::new(EchoHandler::new()))
        .expect("echo handler should register");

    TestGate { system, clock }
}

/// Records one short label per event so tests can assert exact ordering.
pub fn record_events(system: &ActionSystem) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for topic in [
        EventTopic::ActionEnqueued,
        EventTopic::ActionCompleted,
        EventTopic::ActionFailed,
        EventTopic::PermissionNeeded,
        EventTopic::PermissionGranted,
        EventTopic::PermissionRevoked,
    ] {
        let log = log.clone();
        system.events().on(topic, move |event| {
            log.lock().expect("event log lock").push(label(event));
        });
    }
    log
}

fn label(event: &Event) -> String {
    match event {
        Event::ActionEnqueued { .. } => "enqueued",
        Event::ActionCompleted { .. } => "completed",
        Event::ActionFailed { .. } => "failed",
        Event::PermissionNeeded { .. } => "needed",
        Event::PermissionGranted { .. } => "granted",
        Event::PermissionRevoked { .. } => "revoked",
    }
    .to_string()
}

pub fn scope(pairs: &[(&str, &str)]) -> Scope {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

/// Echoes back its `text` parameter, gated by `speak{topic}`. The action
/// name `explode` fails on purpose.
pub struct EchoHandler {
    permissions: Vec<PermissionDef>,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self {
            permissions: vec![PermissionDef {
                name: "speak".to_string(),
                description: "Echo a message on a topic".to_string(),
                parameter_schema: BTreeMap::from([(
                    "topic".to_string(),
                    "Topic the message is published under".to_string(),
                )]),
            }],
        }
    }
}

#[async_trait]
impl ActionHandler for EchoHandler {
    fn handler_id(&self) -> &str {
        "echo"
    }

    fn human_name(&self) -> &str {
        "Echo"
    }

    fn permissions(&self) -> &[PermissionDef] {
        &self.permissions
    }

    fn required_permission(&self, _action_name: &str, params: &Params) -> Option<RequiredPermission> {
        let mut required = Scope::new();
        if let Some(topic) = params.get("topic").and_then(Value::as_str) {
            required.insert("topic".to_string(), topic.to_string());
        }
        Some(RequiredPermission {
            name: "speak".to_string(),
            scope: required,
        })
    }

    async fn execute(&self, action_name: &str, params: &Params) -> anyhow::Result<Value> {
        if action_name == "explode" {
            return Err(anyhow!("boom"));
        }
        let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(json!({"echoed": text}))
    }
}

/// Declares no gate at all; every action is always permitted.
pub struct SelfGatedHandler;

#[async_trait]
impl ActionHandler for SelfGatedHandler {
    fn handler_id(&self) -> &str {
        "sandbox"
    }

    fn human_name(&self) -> &str {
        "Sandbox"
    }

    fn permissions(&self) -> &[PermissionDef] {
        &[]
    }

    fn required_permission(&self, _action_name: &str, _params: &Params) -> Option<RequiredPermission> {
        None
    }

    async fn execute(&self, action_name: &str, _params: &Params) -> anyhow::Result<Value> {
        Ok(json!({"ran": action_name}))
    }
}
