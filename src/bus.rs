//! In-process publish/subscribe routing between the ECUs of one vehicle.
//!
//! Delivery is synchronous: [`MessageBus::send`] invokes every handler of the
//! topic in registration order and returns once all of them completed.

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use thiserror::Error;

pub const TOPIC_BATTERY_INVERTER: &str = "battery-inverter";
pub const TOPIC_INVERTER_MOTOR: &str = "inverter-motor";
pub const TOPIC_MOTOR_COOLING: &str = "motor-cooling";
pub const TOPIC_THERMAL: &str = "thermal";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("topic `{name}` carries {existing}, not {requested}")]
    TopicTypeMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("topic id {0} does not belong to this bus")]
    UnknownTopic(usize),

    #[error("no message delivered on topic `{topic}` yet")]
    NoMessage { topic: String },
}

/// Full ECU frame pair carried on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusMessage<I, O> {
    pub inputs: I,
    pub outputs: O,
}

/// Typed handle to one topic of one bus.
pub struct Topic<M> {
    id: usize,
    name: Rc<str>,
    _message: PhantomData<fn(&M)>,
}

impl<M> Topic<M> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<M> Clone for Topic<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Rc::clone(&self.name),
            _message: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Topic<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

type Handler = Box<dyn FnMut(&dyn Any)>;

struct Channel {
    name: Rc<str>,
    message_type: TypeId,
    type_name: &'static str,
    handlers: Vec<Handler>,
    sent: u64,
}

#[derive(Default)]
pub struct MessageBus {
    channels: Vec<Channel>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `name`, creating the topic on first use.
    pub fn topic<M: 'static>(&mut self, name: &str) -> Result<Topic<M>, BusError> {
        let requested = TypeId::of::<M>();

        if let Some((id, channel)) = self
            .channels
            .iter()
            .enumerate()
            .find(|(_, channel)| &*channel.name == name)
        {
            if channel.message_type != requested {
                return Err(BusError::TopicTypeMismatch {
                    name: name.to_string(),
                    existing: channel.type_name,
                    requested: std::any::type_name::<M>(),
                });
            }
            return Ok(Topic {
                id,
                name: Rc::clone(&channel.name),
                _message: PhantomData,
            });
        }

        let name: Rc<str> = Rc::from(name);
        self.channels.push(Channel {
            name: Rc::clone(&name),
            message_type: requested,
            type_name: std::any::type_name::<M>(),
            handlers: Vec::new(),
            sent: 0,
        });

        tracing::debug!(topic = %name, "topic created");

        Ok(Topic {
            id: self.channels.len() - 1,
            name,
            _message: PhantomData,
        })
    }

    pub fn subscribe<M, F>(&mut self, topic: &Topic<M>, mut handler: F) -> Result<(), BusError>
    where
        M: 'static,
        F: FnMut(&M) + 'static,
    {
        let channel = self.channel_mut(topic)?;
        channel.handlers.push(Box::new(move |message: &dyn Any| {
            if let Some(message) = message.downcast_ref::<M>() {
                handler(message);
            }
        }));
        Ok(())
    }

    /// Subscribes a mailbox holding the latest message of `topic`.
    pub fn mailbox<M: Clone + 'static>(&mut self, topic: &Topic<M>) -> Result<Mailbox<M>, BusError> {
        let mailbox = Mailbox::new(topic.name());
        let slot = Rc::clone(&mailbox.slot);
        self.subscribe(topic, move |message: &M| {
            *slot.borrow_mut() = Some(message.clone());
        })?;
        Ok(mailbox)
    }

    /// Delivers `message` to every handler and returns how many ran.
    pub fn send<M: 'static>(&mut self, topic: &Topic<M>, message: &M) -> Result<usize, BusError> {
        let channel = self.channel_mut(topic)?;
        for handler in channel.handlers.iter_mut() {
            handler(message);
        }
        channel.sent += 1;
        Ok(channel.handlers.len())
    }

    pub fn subscriber_count<M>(&self, topic: &Topic<M>) -> usize {
        self.channels
            .get(topic.id)
            .map_or(0, |channel| channel.handlers.len())
    }

    pub fn sent_count<M>(&self, topic: &Topic<M>) -> u64 {
        self.channels.get(topic.id).map_or(0, |channel| channel.sent)
    }

    pub fn topic_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|channel| &*channel.name)
    }

    fn channel_mut<M>(&mut self, topic: &Topic<M>) -> Result<&mut Channel, BusError> {
        match self.channels.get_mut(topic.id) {
            Some(channel) if Rc::ptr_eq(&channel.name, &topic.name) => Ok(channel),
            _ => Err(BusError::UnknownTopic(topic.id)),
        }
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.channels.iter().map(|c| (&*c.name, c.handlers.len(), c.sent)))
            .finish()
    }
}

/// Latest message seen on one topic.
#[derive(Debug)]
pub struct Mailbox<M> {
    topic: String,
    slot: Rc<RefCell<Option<M>>>,
}

impl<M: Clone> Mailbox<M> {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Removes the delivered message. Taking before anything was delivered
    /// means the pipeline ran out of order.
    pub fn take(&self) -> Result<M, BusError> {
        self.slot.borrow_mut().take().ok_or_else(|| BusError::NoMessage {
            topic: self.topic.clone(),
        })
    }

    pub fn peek(&self) -> Option<M> {
        self.slot.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.borrow().is_none()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_in_registration_order() {
        let mut bus = MessageBus::new();
        let topic = bus.topic::<u32>("numbers").unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second"] {
            let log = Rc::clone(&log);
            bus.subscribe(&topic, move |n: &u32| log.borrow_mut().push((tag, *n)))
                .unwrap();
        }

        assert_eq!(bus.send(&topic, &7).unwrap(), 2);
        assert_eq!(*log.borrow(), vec![("first", 7), ("second", 7)]);
        assert_eq!(bus.sent_count(&topic), 1);
    }

    #[test]
    fn test_topic_type_is_fixed() {
        let mut bus = MessageBus::new();
        bus.topic::<u32>("numbers").unwrap();

        let err = bus.topic::<String>("numbers").unwrap_err();
        assert!(matches!(err, BusError::TopicTypeMismatch { .. }));
        assert_eq!(bus.topic::<u32>("numbers").unwrap().id(), 0);
    }

    #[test]
    fn test_topic_from_other_bus_is_rejected() {
        let mut bus = MessageBus::new();
        let mut other = MessageBus::new();
        let foreign = other.topic::<u32>("numbers").unwrap();
        bus.topic::<u32>("numbers").unwrap();

        assert_eq!(bus.send(&foreign, &1), Err(BusError::UnknownTopic(0)));
    }

    #[test]
    fn test_mailbox_take() {
        let mut bus = MessageBus::new();
        let topic = bus.topic::<u32>("numbers").unwrap();
        let mailbox = bus.mailbox(&topic).unwrap();

        assert_eq!(
            mailbox.take(),
            Err(BusError::NoMessage {
                topic: "numbers".into()
            })
        );

        bus.send(&topic, &3).unwrap();
        bus.send(&topic, &4).unwrap();
        assert_eq!(mailbox.peek(), Some(4));
        assert_eq!(mailbox.take(), Ok(4));
        assert!(mailbox.is_empty());
    }
}
