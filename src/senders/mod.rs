/// Channel sender contract and result type
pub mod sender;
/// Webhook sender implementations
pub mod webhook;

pub use sender::{ChannelSender, SendResult};
pub use webhook::{
    ChatWebhookSender, GenericWebhookSender, MockSender, CHAT_WEBHOOK_TYPE, GENERIC_WEBHOOK_TYPE,
};
