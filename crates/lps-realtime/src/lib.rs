//! Real-time change propagation: the database notification listener and the
//! room-based fan-out hub observer sessions subscribe to.

mod hub;
mod listener;

pub use hub::{Command, LoanEvent, LoanHub, Published, Subscriptions};
pub use listener::{event_from_notification, run_listener, LoanChangeNotification, CHANNEL};
