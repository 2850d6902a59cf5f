use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

/// A consumed message. The scheduler only reads its identifier, for logs.
pub trait Message: Send + Sync + 'static {
    fn message_id(&self) -> &str;
}

/// Processes a message. Returning `Err` (or panicking) schedules a retry.
pub trait MessageHandler<M>: Send + Sync {
    fn process(&self, message: &M) -> Result<(), HandlerError>;
}

impl<M, F> MessageHandler<M> for F
where
    F: Fn(&M) -> Result<(), HandlerError> + Send + Sync,
{
    fn process(&self, message: &M) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Message envelope as handed over by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultMessage {
    pub msg_id: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl DefaultMessage {
    pub fn new(msg_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_id: msg_id.into(),
            topic: String::new(),
            partition: 0,
            offset: 0,
            key: None,
            payload: payload.into(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        self.topic = topic.into();
        self.partition = partition;
        self.offset = offset;
        self
    }
}

impl Message for DefaultMessage {
    fn message_id(&self) -> &str {
        &self.msg_id
    }
}
