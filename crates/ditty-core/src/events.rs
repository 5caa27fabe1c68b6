//! Loop templates and scheduled trigger events.
//!
//! This module defines the data that flows through the scheduler:
//!
//! - [`EventTemplate`] - One event definition inside a loop cycle
//! - [`Loop`] / [`LoopDescriptor`] - A cyclic pattern of templates
//! - [`ScheduledEvent`] - A concrete start/stop trigger at an absolute position
//! - [`LoopChange`] - Notification emitted when the registry changes

use serde::{Deserialize, Serialize};

/// Loop length used when a loop is created without one.
pub const DEFAULT_LOOP_LENGTH: f64 = 8.0;

/// Opaque argument attached to an event template.
///
/// Arguments are never interpreted by the scheduler; they are copied
/// verbatim into every start and stop event derived from the template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Number(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

/// A single event definition within one loop cycle.
///
/// Templates can be written either as a table
/// (`{ position = 0, duration = 2, args = ["kick"] }`) or in the compact
/// form `[position, duration, arg...]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TemplateRepr")]
pub struct EventTemplate {
    /// Beat offset within the cycle (expected in `0.0..length`).
    pub position: f64,
    /// Beats between the start and the stop trigger (may be 0).
    pub duration: f64,
    /// Payload passed through to the scheduled events.
    pub args: Vec<Arg>,
}

impl EventTemplate {
    /// Create a template with no arguments.
    pub fn new(position: f64, duration: f64) -> Self {
        Self {
            position,
            duration,
            args: Vec::new(),
        }
    }

    /// Append an argument to the template.
    pub fn with_arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateRepr {
    Compact(Vec<Arg>),
    Table {
        position: f64,
        #[serde(default)]
        duration: f64,
        #[serde(default)]
        args: Vec<Arg>,
    },
}

impl TryFrom<TemplateRepr> for EventTemplate {
    type Error = String;

    fn try_from(repr: TemplateRepr) -> Result<Self, Self::Error> {
        match repr {
            TemplateRepr::Table {
                position,
                duration,
                args,
            } => Ok(Self {
                position,
                duration,
                args,
            }),
            TemplateRepr::Compact(values) => {
                let mut values = values.into_iter();
                let position = match values.next() {
                    Some(Arg::Number(n)) => n,
                    other => {
                        return Err(format!(
                            "event position must be a number, got {:?}",
                            other
                        ))
                    }
                };
                let duration = match values.next() {
                    Some(Arg::Number(n)) => n,
                    None => 0.0,
                    Some(other) => {
                        return Err(format!("event duration must be a number, got {:?}", other))
                    }
                };
                Ok(Self {
                    position,
                    duration,
                    args: values.collect(),
                })
            }
        }
    }
}

/// A live loop as stored in the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct Loop {
    /// Cycle length in beats.
    pub length: f64,
    /// Templates in definition order.
    pub events: Vec<EventTemplate>,
}

/// A loop together with its identifier, as read by the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopDescriptor {
    pub id: String,
    pub length: f64,
    pub events: Vec<EventTemplate>,
}

impl LoopDescriptor {
    /// Create a descriptor with the given id and length and no events.
    pub fn new(id: impl Into<String>, length: f64) -> Self {
        Self {
            id: id.into(),
            length,
            events: Vec::new(),
        }
    }

    /// Add a template to the descriptor.
    pub fn with_event(mut self, event: EventTemplate) -> Self {
        self.events.push(event);
        self
    }
}

/// Whether a scheduled event opens or closes a triggered state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Stop,
}

/// A concrete trigger produced by the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Identifier of the loop the event came from.
    pub id: String,
    /// Start or stop.
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Absolute beat position (not reduced modulo loop length).
    pub position: f64,
    /// Template arguments.
    pub args: Vec<Arg>,
    /// Wall-clock time in seconds. Only meaningful once emitted.
    pub time: f64,
}

impl ScheduledEvent {
    /// Check if this is a stop event.
    pub fn is_stop(&self) -> bool {
        self.kind == EventKind::Stop
    }
}

/// Change notification produced by every registry `set`.
///
/// Serialises to `{id, events, length}` for updates and `{id}` for
/// deletions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoopChange {
    Updated(LoopDescriptor),
    Deleted { id: String },
}

impl LoopChange {
    /// Identifier of the loop that changed.
    pub fn id(&self) -> &str {
        match self {
            LoopChange::Updated(descriptor) => &descriptor.id,
            LoopChange::Deleted { id } => id,
        }
    }

    /// Check if this change deleted the loop.
    pub fn is_deletion(&self) -> bool {
        matches!(self, LoopChange::Deleted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        events: Vec<EventTemplate>,
    }

    #[test]
    fn test_template_builder() {
        let template = EventTemplate::new(1.5, 0.5)
            .with_arg("kick")
            .with_arg(0.8)
            .with_arg(true);

        assert!((template.position - 1.5).abs() < 0.001);
        assert!((template.duration - 0.5).abs() < 0.001);
        assert_eq!(
            template.args,
            vec![Arg::from("kick"), Arg::Number(0.8), Arg::Bool(true)]
        );
    }

    #[test]
    fn test_template_compact_form() {
        let parsed: Wrapper = toml::from_str(r#"events = [[0, 2, "kick", 0.5], [4]]"#).unwrap();
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.events[0].position, 0.0);
        assert_eq!(parsed.events[0].duration, 2.0);
        assert_eq!(
            parsed.events[0].args,
            vec![Arg::from("kick"), Arg::Number(0.5)]
        );
        assert_eq!(parsed.events[1].position, 4.0);
        assert_eq!(parsed.events[1].duration, 0.0);
        assert!(parsed.events[1].args.is_empty());
    }

    #[test]
    fn test_template_table_form() {
        let parsed: Wrapper = toml::from_str(
            r#"events = [{ position = 3, duration = 0.5, args = ["snare"] }]"#,
        )
        .unwrap();
        assert_eq!(
            parsed.events[0],
            EventTemplate::new(3.0, 0.5).with_arg("snare")
        );
    }

    #[test]
    fn test_template_rejects_text_position() {
        let parsed: Result<Wrapper, _> = toml::from_str(r#"events = [["kick", 1]]"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_loop_change_ids() {
        let update = LoopChange::Updated(LoopDescriptor::new("a", 4.0));
        let delete = LoopChange::Deleted { id: "b".to_string() };
        assert_eq!(update.id(), "a");
        assert!(!update.is_deletion());
        assert_eq!(delete.id(), "b");
        assert!(delete.is_deletion());
    }

    #[test]
    fn test_scheduled_event_serializes_kind() {
        let event = ScheduledEvent {
            id: "a".to_string(),
            kind: EventKind::Stop,
            position: 2.0,
            args: vec![Arg::from("kick")],
            time: 1.0,
        };
        let value = toml::Value::try_from(&event).unwrap();
        assert_eq!(value["event"].as_str(), Some("stop"));
        assert!(event.is_stop());
    }
}
