//! Room-based publish/subscribe over connected observer sessions.
//!
//! One broadcast bus carries every event together with the rooms it targets;
//! each session keeps its own subscription set and filters the bus. Delivery
//! is at-most-once per connected session with no backlog: a disconnected
//! observer misses events and re-queries on reconnect.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Events pushed to observers, mirroring the wire `event` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoanEvent {
    LoanCreated {
        loan_id: String,
        country_code: String,
        data: Value,
    },
    LoanUpdated {
        loan_id: String,
        country_code: String,
        changes: Value,
    },
    StatusChanged {
        loan_id: String,
        country_code: String,
        old_status: Option<String>,
        new_status: String,
    },
}

impl LoanEvent {
    pub fn loan_id(&self) -> &str {
        match self {
            LoanEvent::LoanCreated { loan_id, .. }
            | LoanEvent::LoanUpdated { loan_id, .. }
            | LoanEvent::StatusChanged { loan_id, .. } => loan_id,
        }
    }

    pub fn country_code(&self) -> &str {
        match self {
            LoanEvent::LoanCreated { country_code, .. }
            | LoanEvent::LoanUpdated { country_code, .. }
            | LoanEvent::StatusChanged { country_code, .. } => country_code,
        }
    }

    /// Rooms this event is published to. Creation events do not target the
    /// per-loan room (no one can have subscribed to a loan that did not
    /// exist yet).
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms = vec!["all".to_string(), format!("country:{}", self.country_code())];
        if !matches!(self, LoanEvent::LoanCreated { .. }) {
            rooms.push(format!("loan:{}", self.loan_id()));
        }
        rooms
    }
}

/// A bus message: the event plus its target rooms.
#[derive(Debug, Clone)]
pub struct Published {
    pub rooms: Vec<String>,
    pub event: LoanEvent,
}

/// Process-local fan-out hub. Cheap to clone; all clones share one bus.
#[derive(Clone)]
pub struct LoanHub {
    bus: broadcast::Sender<Published>,
}

impl Default for LoanHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LoanHub {
    pub fn new(capacity: usize) -> Self {
        let (bus, _rx) = broadcast::channel(capacity);
        Self { bus }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.bus.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.bus.receiver_count()
    }

    pub fn emit_loan_created(&self, loan_id: &str, country_code: &str, data: Value) {
        self.publish(LoanEvent::LoanCreated {
            loan_id: loan_id.to_string(),
            country_code: country_code.to_string(),
            data,
        });
    }

    pub fn emit_loan_updated(&self, loan_id: &str, country_code: &str, changes: Value) {
        self.publish(LoanEvent::LoanUpdated {
            loan_id: loan_id.to_string(),
            country_code: country_code.to_string(),
            changes,
        });
    }

    pub fn emit_status_changed(
        &self,
        loan_id: &str,
        country_code: &str,
        old_status: Option<&str>,
        new_status: &str,
    ) {
        self.publish(LoanEvent::StatusChanged {
            loan_id: loan_id.to_string(),
            country_code: country_code.to_string(),
            old_status: old_status.map(str::to_string),
            new_status: new_status.to_string(),
        });
    }

    fn publish(&self, event: LoanEvent) {
        let msg = Published {
            rooms: event.rooms(),
            event,
        };
        // No receivers is fine: events are best-effort.
        let _ = self.bus.send(msg);
    }
}

// ---------------------------------------------------------------------------
// Per-session subscriptions
// ---------------------------------------------------------------------------

/// Subscription commands sent by observer sessions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    SubscribeCountry { country_code: String },
    UnsubscribeCountry { country_code: String },
    SubscribeLoan { loan_id: String },
    UnsubscribeLoan { loan_id: String },
}

/// A session's room memberships. Every session implicitly belongs to `all`;
/// the set is dropped with the session on disconnect.
#[derive(Debug, Default)]
pub struct Subscriptions {
    rooms: std::collections::HashSet<String>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a command and return the JSON ack (or `{error}` for malformed
    /// input).
    pub fn apply(&mut self, command: Command) -> Value {
        match command {
            Command::SubscribeCountry { country_code } => match country_room(&country_code) {
                Some(room) => {
                    self.rooms.insert(room.clone());
                    json!({"subscribed": room})
                }
                None => json!({"error": "Invalid country code"}),
            },
            Command::UnsubscribeCountry { country_code } => match country_room(&country_code) {
                Some(room) => {
                    self.rooms.remove(&room);
                    json!({"unsubscribed": room})
                }
                None => json!({"error": "Invalid country code"}),
            },
            Command::SubscribeLoan { loan_id } => match loan_room(&loan_id) {
                Some(room) => {
                    self.rooms.insert(room.clone());
                    json!({"subscribed": room})
                }
                None => json!({"error": "loan_id required"}),
            },
            Command::UnsubscribeLoan { loan_id } => match loan_room(&loan_id) {
                Some(room) => {
                    self.rooms.remove(&room);
                    json!({"unsubscribed": room})
                }
                None => json!({"error": "loan_id required"}),
            },
        }
    }

    /// Whether a bus message targets this session.
    pub fn wants(&self, published: &Published) -> bool {
        published
            .rooms
            .iter()
            .any(|room| room == "all" || self.rooms.contains(room))
    }
}

fn country_room(country_code: &str) -> Option<String> {
    let cc = country_code.trim().to_uppercase();
    (cc.len() == 2 && cc.chars().all(|c| c.is_ascii_uppercase()))
        .then(|| format!("country:{cc}"))
}

fn loan_room(loan_id: &str) -> Option<String> {
    let id = loan_id.trim();
    (!id.is_empty()).then(|| format!("loan:{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooms_cover_all_country_and_loan() {
        let updated = LoanEvent::LoanUpdated {
            loan_id: "abc".into(),
            country_code: "ES".into(),
            changes: json!({}),
        };
        assert_eq!(updated.rooms(), vec!["all", "country:ES", "loan:abc"]);

        let created = LoanEvent::LoanCreated {
            loan_id: "abc".into(),
            country_code: "MX".into(),
            data: json!({}),
        };
        assert_eq!(created.rooms(), vec!["all", "country:MX"]);
    }

    #[test]
    fn event_serializes_with_snake_case_tag() {
        let event = LoanEvent::StatusChanged {
            loan_id: "abc".into(),
            country_code: "ES".into(),
            old_status: Some("PENDING".into()),
            new_status: "VALIDATING".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "status_changed");
        assert_eq!(value["old_status"], "PENDING");
    }

    #[test]
    fn subscriptions_ack_and_filter() {
        let mut subs = Subscriptions::new();

        let ack = subs.apply(Command::SubscribeCountry {
            country_code: "es".into(),
        });
        assert_eq!(ack["subscribed"], "country:ES");

        let es_event = Published {
            rooms: vec!["country:ES".into()],
            event: LoanEvent::LoanUpdated {
                loan_id: "x".into(),
                country_code: "ES".into(),
                changes: json!({}),
            },
        };
        assert!(subs.wants(&es_event));

        let mx_event = Published {
            rooms: vec!["country:MX".into()],
            event: LoanEvent::LoanUpdated {
                loan_id: "y".into(),
                country_code: "MX".into(),
                changes: json!({}),
            },
        };
        assert!(!subs.wants(&mx_event));

        let ack = subs.apply(Command::UnsubscribeCountry {
            country_code: "ES".into(),
        });
        assert_eq!(ack["unsubscribed"], "country:ES");
        assert!(!subs.wants(&es_event));
    }

    #[test]
    fn everyone_receives_all_room_events() {
        let subs = Subscriptions::new();
        let broadcast = Published {
            rooms: vec!["all".into(), "country:BR".into()],
            event: LoanEvent::LoanCreated {
                loan_id: "z".into(),
                country_code: "BR".into(),
                data: json!({}),
            },
        };
        assert!(subs.wants(&broadcast));
    }

    #[test]
    fn malformed_commands_are_rejected() {
        let mut subs = Subscriptions::new();
        let ack = subs.apply(Command::SubscribeCountry {
            country_code: "ESP".into(),
        });
        assert_eq!(ack["error"], "Invalid country code");

        let ack = subs.apply(Command::SubscribeLoan { loan_id: "  ".into() });
        assert_eq!(ack["error"], "loan_id required");
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let hub = LoanHub::new(16);
        let mut rx = hub.subscribe();
        hub.emit_status_changed("abc", "ES", Some("PENDING"), "VALIDATING");

        let published = rx.recv().await.unwrap();
        assert!(published.rooms.contains(&"loan:abc".to_string()));
        match published.event {
            LoanEvent::StatusChanged { new_status, .. } => assert_eq!(new_status, "VALIDATING"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
