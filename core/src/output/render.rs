//! Render events for the display surface
//!
//! Three message kinds exist: `stream` text, `display_data` and
//! `update_display_data`. An update replaces the earlier display with the
//! same display id instead of appending.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Media type -> payload
pub type MimeBundle = BTreeMap<String, serde_json::Value>;

/// Target text stream of a stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// A unit of output destined for the display surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum RenderEvent {
    Stream {
        name: StreamName,
        text: String,
    },
    #[serde(rename = "display_data")]
    Display {
        data: MimeBundle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_id: Option<String>,
    },
    #[serde(rename = "update_display_data")]
    DisplayUpdate {
        data: MimeBundle,
        display_id: String,
    },
}

impl RenderEvent {
    pub fn stdout(text: impl Into<String>) -> Self {
        RenderEvent::Stream {
            name: StreamName::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        RenderEvent::Stream {
            name: StreamName::Stderr,
            text: text.into(),
        }
    }

    /// A fresh display of a single payload
    pub fn display(mime: &str, payload: serde_json::Value) -> Self {
        RenderEvent::Display {
            data: bundle(mime, payload),
            display_id: None,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, RenderEvent::DisplayUpdate { .. })
    }

    /// Wire name of the message kind
    pub fn msg_type(&self) -> &'static str {
        match self {
            RenderEvent::Stream { .. } => "stream",
            RenderEvent::Display { .. } => "display_data",
            RenderEvent::DisplayUpdate { .. } => "update_display_data",
        }
    }

    pub fn data(&self) -> Option<&MimeBundle> {
        match self {
            RenderEvent::Stream { .. } => None,
            RenderEvent::Display { data, .. } | RenderEvent::DisplayUpdate { data, .. } => Some(data),
        }
    }

    pub fn display_id(&self) -> Option<&str> {
        match self {
            RenderEvent::Stream { .. } => None,
            RenderEvent::Display { display_id, .. } => display_id.as_deref(),
            RenderEvent::DisplayUpdate { display_id, .. } => Some(display_id),
        }
    }
}

pub fn bundle(mime: &str, payload: serde_json::Value) -> MimeBundle {
    let mut data = MimeBundle::new();
    data.insert(mime.to_string(), payload);
    data
}

/// Consumer of render events, implemented by the frontend adapter
pub trait DisplaySurface: Send + Sync {
    fn emit(&self, event: RenderEvent);
}

impl<F> DisplaySurface for F
where
    F: Fn(RenderEvent) + Send + Sync,
{
    fn emit(&self, event: RenderEvent) {
        self(event)
    }
}

/// Emits the first display of an id fresh and every later one as an update.
pub struct DisplayHandle {
    display_id: String,
    shown: bool,
}

impl DisplayHandle {
    pub fn new(display_id: impl Into<String>) -> Self {
        Self {
            display_id: display_id.into(),
            shown: false,
        }
    }

    pub fn show(&mut self, surface: &dyn DisplaySurface, data: MimeBundle) {
        let event = if self.shown {
            RenderEvent::DisplayUpdate {
                data,
                display_id: self.display_id.clone(),
            }
        } else {
            RenderEvent::Display {
                data,
                display_id: Some(self.display_id.clone()),
            }
        };
        self.shown = true;
        surface.emit(event);
    }

    pub fn shown(&self) -> bool {
        self.shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSurface;

    #[test]
    fn test_wire_names() {
        let stream = serde_json::to_value(RenderEvent::stdout("S1")).unwrap();
        assert_eq!(stream["msg_type"], "stream");
        assert_eq!(stream["name"], "stdout");
        assert_eq!(stream["text"], "S1");

        let display = serde_json::to_value(RenderEvent::display("text/plain", "hi".into())).unwrap();
        assert_eq!(display["msg_type"], "display_data");
        assert_eq!(display["data"]["text/plain"], "hi");
        assert!(display.get("display_id").is_none());
    }

    #[test]
    fn test_handle_switches_to_updates() {
        let surface = RecordingSurface::default();
        let mut handle = DisplayHandle::new("I1");
        assert!(!handle.shown());

        handle.show(&surface, bundle("text/plain", "1".into()));
        handle.show(&surface, bundle("text/plain", "2".into()));
        handle.show(&surface, bundle("text/plain", "3".into()));

        let events = surface.events();
        assert_eq!(events[0].msg_type(), "display_data");
        assert_eq!(events[0].display_id(), Some("I1"));
        assert!(events[1..].iter().all(|e| e.is_update() && e.display_id() == Some("I1")));
    }

    #[test]
    fn test_closure_surface() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let surface = |event: RenderEvent| seen.lock().push(event.msg_type());
        surface.emit(RenderEvent::stderr("boom"));
        assert_eq!(*seen.lock(), vec!["stream"]);
    }
}
