pub mod webhook;

pub use webhook::{NotificationEvent, Notifier};
