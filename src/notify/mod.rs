pub mod message;
pub mod sink;

pub use message::{render, MessageStyle, Notification};
pub use sink::{Audience, NotifySink, StdoutSink, TelegramSink};
