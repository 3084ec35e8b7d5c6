//! Topic routing for bus messages.

use crate::event::Topic;

/// A message that can be routed by topic.
///
/// The routing key is the raw event type; the topic is derived from it and is
/// `None` for types this build does not know.
pub trait Routable {
    fn routing_key(&self) -> &str;

    fn topic(&self) -> Option<Topic>;
}

impl<T: Routable + ?Sized> Routable for std::sync::Arc<T> {
    fn routing_key(&self) -> &str {
        (**self).routing_key()
    }

    fn topic(&self) -> Option<Topic> {
        (**self).topic()
    }
}
