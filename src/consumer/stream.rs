use super::{Message, MessageIdentity, ReadError, StreamReader};
use crate::broker::{LogReader, QueueConsumer};

#[async_trait]
impl StreamReader for LogReader {
    async fn next(&mut self) -> Result<Message, ReadError> {
        let msg = self.read_message().await?;
        Ok(Message {
            payload: msg.value,
            identity: MessageIdentity::Position {
                partition: msg.partition,
                offset: msg.offset,
            },
        })
    }

    fn describe(&self) -> String {
        format!("topic {:?}", self.topic())
    }
}

#[async_trait]
impl StreamReader for QueueConsumer {
    async fn next(&mut self) -> Result<Message, ReadError> {
        let delivery = self.next_delivery().await?;
        if delivery.redelivered {
            debug!(delivery_tag = delivery.delivery_tag, "redelivered message");
        }
        let identity = match delivery.properties.message_id {
            Some(id) => MessageIdentity::MessageId(id),
            None => MessageIdentity::None,
        };
        Ok(Message {
            payload: delivery.body,
            identity,
        })
    }

    fn describe(&self) -> String {
        format!("queue {:?}", self.queue())
    }
}
