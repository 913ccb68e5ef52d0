//! Push notifications: payload rendering and the shown-notification registry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Where a clicked action leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickRoute {
    /// Action id that navigates.
    pub action: String,
    /// Application URL opened (or focused) for that action.
    pub url: String,
}

/// How a worker renders pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    /// Body used when the push carries no readable text.
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    pub click: Option<ClickRoute>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            default_body: String::new(),
            icon: "/static/icons/icon-192x192.png".to_string(),
            badge: "/static/icons/icon-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
            actions: Vec::new(),
            click: None,
        }
    }
}

/// An incoming push message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushMessage {
    pub data: Option<Bytes>,
}

impl PushMessage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            data: Some(Bytes::from(text.into())),
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// The payload as UTF-8 text, if present and valid.
    pub fn text(&self) -> Option<&str> {
        self.data
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

/// Opaque data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Milliseconds since epoch at push time.
    pub date_of_arrival: u64,
    pub primary_key: u64,
}

/// What the host is asked to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
}

impl NotificationPayload {
    /// Render `message` with `config`, stamped at `now_ms`.
    pub fn build(config: &NotificationConfig, message: &PushMessage, now_ms: u64) -> Self {
        let body = message
            .text()
            .map(str::to_string)
            .unwrap_or_else(|| config.default_body.clone());

        Self {
            body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: now_ms,
                primary_key: 1,
            },
            actions: config.actions.clone(),
        }
    }
}

/// A displayed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub payload: NotificationPayload,
    pub closed: bool,
}

/// Notifications shown by workers.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: Vec<Notification>,
    next_id: u64,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification; returns its id.
    pub fn show(&mut self, title: &str, payload: NotificationPayload) -> u64 {
        self.next_id += 1;
        self.shown.push(Notification {
            id: self.next_id,
            title: title.to_string(),
            payload,
            closed: false,
        });
        self.next_id
    }

    pub fn get(&self, id: u64) -> Option<&Notification> {
        self.shown.iter().find(|n| n.id == id)
    }

    /// Close a notification. Returns false if unknown or already closed.
    pub fn close(&mut self, id: u64) -> bool {
        match self.shown.iter_mut().find(|n| n.id == id && !n.closed) {
            Some(notification) => {
                notification.closed = true;
                true
            }
            None => false,
        }
    }

    /// Notifications still on screen.
    pub fn open(&self) -> Vec<&Notification> {
        self.shown.iter().filter(|n| !n.closed).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkerConfig;

    #[test]
    fn test_payload_uses_push_text() {
        let config = WorkerConfig::portal().notification;
        let payload =
            NotificationPayload::build(&config, &PushMessage::from_text("Clase a las 18:00"), 42);

        assert_eq!(payload.body, "Clase a las 18:00");
        assert_eq!(payload.vibrate, vec![100, 50, 100]);
        assert_eq!(payload.data.date_of_arrival, 42);
        assert_eq!(payload.data.primary_key, 1);
        assert_eq!(payload.actions.len(), 2);
    }

    #[test]
    fn test_payload_defaults_when_absent_or_unreadable() {
        let config = WorkerConfig::public().notification;

        let absent = NotificationPayload::build(&config, &PushMessage::empty(), 0);
        assert_eq!(absent.body, "Nueva actualización disponible");

        let garbage = PushMessage::from_bytes(vec![0xff, 0xfe, 0xfd]);
        let unreadable = NotificationPayload::build(&config, &garbage, 0);
        assert_eq!(unreadable.body, "Nueva actualización disponible");
        assert!(unreadable.actions.is_empty());
    }

    #[test]
    fn test_payload_serializes_like_notification_options() {
        let config = WorkerConfig::portal().notification;
        let payload = NotificationPayload::build(&config, &PushMessage::from_text("hola"), 7);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["data"]["dateOfArrival"], 7);
        assert_eq!(json["actions"][0]["action"], "view");
        assert_eq!(json["actions"][0]["icon"], "/static/icons/icon-96x96.png");
        assert!(json["actions"][1].get("icon").is_none());
    }

    #[test]
    fn test_registry_show_and_close() {
        let config = WorkerConfig::portal().notification;
        let mut notifications = Notifications::new();
        let payload = NotificationPayload::build(&config, &PushMessage::empty(), 0);

        let id = notifications.show("Mi Gym", payload);
        assert_eq!(notifications.open().len(), 1);
        assert_eq!(notifications.get(id).unwrap().title, "Mi Gym");

        assert!(notifications.close(id));
        assert!(!notifications.close(id));
        assert!(notifications.open().is_empty());
    }
}
