// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Ordered fan-out of gateway events with bounded per-subscriber buffering.
//!
//! Events go through one broadcast channel, so every subscriber observes the same total order.
//! The channel keeps the last `capacity` events. A subscriber that stops consuming loses its
//! oldest events first; the next time it receives, it gets one [`Event::Overflow`] carrying the
//! number of events lost since it last received, followed by the survivors.

use std::sync::Mutex;

use futures::stream::{Stream, StreamExt};
use log::{debug, trace};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::api::Event;

#[derive(Debug)]
pub struct EventBus {
    // `None` once closed. Dropping the sender ends every receiver after its buffered events.
    sender: Mutex<Option<broadcast::Sender<Event>>>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus buffering at least `capacity` (minimum 1) undelivered events per
    /// subscriber. The channel rounds the capacity up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            capacity,
        }
    }

    /// How many undelivered events a subscriber can hold before it starts losing the oldest.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds a subscriber. It receives every event published from now on.
    pub fn subscribe(&self) -> EventSubscription {
        let receiver = match &*self.sender.lock().unwrap() {
            Some(sender) => sender.subscribe(),
            None => {
                let (_, receiver) = broadcast::channel(1);
                receiver
            }
        };
        EventSubscription { receiver }
    }

    /// Delivers `event` to every current subscriber.
    pub fn publish(&self, event: Event) {
        let sender = self.sender.lock().unwrap();
        let Some(sender) = &*sender else {
            trace!("Event bus closed, dropping {:?}", event);
            return;
        };
        trace!("Publishing {:?}", event);
        if let Err(lost) = sender.send(event) {
            trace!("Lost event, while nothing subscribed: {:?}", lost.0);
        }
    }

    /// Ends every subscription once its buffered events are consumed. Later publishes are
    /// dropped.
    pub fn close(&self) {
        if self.sender.lock().unwrap().take().is_some() {
            debug!("Closing event bus");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// The receiving end of one [`EventBus`] subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<Event>,
}

impl EventSubscription {
    /// Waits for the next event. Returns `None` once the bus is closed and everything buffered
    /// has been received.
    pub async fn recv(&mut self) -> Option<Event> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(dropped)) => Some(overflow(dropped)),
            Err(RecvError::Closed) => None,
        }
    }

    /// Takes the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Lagged(dropped)) => Some(overflow(dropped)),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// Hands every buffered event to `f`, in order, and returns how many there were. Meant for
    /// callers that poll once per frame from their own thread.
    pub fn drain(&mut self, mut f: impl FnMut(Event)) -> usize {
        let mut count = 0;
        while let Some(event) = self.try_recv() {
            f(event);
            count += 1;
        }
        count
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + Unpin {
        Box::pin(BroadcastStream::new(self.receiver).map(|event| match event {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(dropped)) => overflow(dropped),
        }))
    }
}

fn overflow(dropped: u64) -> Event {
    trace!("Subscriber fell behind, {} events lost", dropped);
    Event::Overflow { dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BDAddr;
    use std::sync::Arc;

    fn connected(n: u8) -> Event {
        Event::Connected {
            address: BDAddr::from([0, 0, 0, 0, 0, n]),
        }
    }

    #[test]
    fn every_subscriber_sees_publish_order() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        for n in 0..5 {
            bus.publish(connected(n));
        }
        let mut seen_a = vec![];
        let mut seen_b = vec![];
        assert_eq!(a.drain(|e| seen_a.push(e)), 5);
        assert_eq!(b.drain(|e| seen_b.push(e)), 5);
        assert_eq!(seen_a, (0..5).map(connected).collect::<Vec<_>>());
        assert_eq!(seen_a, seen_b);
    }

    #[test]
    fn late_subscribers_only_see_later_events() {
        let bus = EventBus::new(16);
        bus.publish(connected(0));
        let mut sub = bus.subscribe();
        bus.publish(connected(1));
        assert_eq!(sub.try_recv(), Some(connected(1)));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn stalled_subscriber_gets_one_overflow_per_episode() {
        let bus = EventBus::new(4);
        let mut stalled = bus.subscribe();
        let mut live = bus.subscribe();
        for n in 0..10 {
            bus.publish(connected(n));
            assert_eq!(live.try_recv(), Some(connected(n)));
        }

        let mut seen = vec![];
        stalled.drain(|e| seen.push(e));
        let mut expected = vec![Event::Overflow { dropped: 6 }];
        expected.extend((6..10).map(connected));
        assert_eq!(seen, expected);

        // A new episode starts after the subscriber caught up.
        for n in 10..15 {
            bus.publish(connected(n));
        }
        assert_eq!(stalled.try_recv(), Some(Event::Overflow { dropped: 1 }));
        assert_eq!(stalled.try_recv(), Some(connected(11)));
    }

    #[test]
    fn subscriber_below_capacity_never_overflows() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe();
        for round in 0..3 {
            for n in 0..4 {
                bus.publish(connected(round * 4 + n));
            }
            assert_eq!(sub.drain(|e| assert_ne!(e.name(), "overflow")), 4);
        }
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        let _kept = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(sub);
        bus.publish(connected(0));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn capacity_rounds_up_to_a_power_of_two() {
        assert_eq!(EventBus::new(0).capacity(), 1);
        assert_eq!(EventBus::new(4).capacity(), 4);

        let bus = EventBus::new(5);
        assert_eq!(bus.capacity(), 8);
        let mut sub = bus.subscribe();
        for n in 0..8 {
            bus.publish(connected(n));
        }
        assert_eq!(sub.drain(|e| assert_ne!(e.name(), "overflow")), 8);

        for n in 0..10 {
            bus.publish(connected(n));
        }
        assert_eq!(sub.try_recv(), Some(Event::Overflow { dropped: 2 }));
        assert_eq!(sub.try_recv(), Some(connected(2)));
    }

    #[tokio::test]
    async fn stream_reports_overflow_then_survivors() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe();
        for n in 0..5 {
            bus.publish(connected(n));
        }
        bus.close();
        let events: Vec<Event> = sub.into_stream().collect().await;
        assert_eq!(
            events,
            vec![Event::Overflow { dropped: 3 }, connected(3), connected(4)]
        );
    }

    #[tokio::test]
    async fn recv_waits_for_publish() {
        let bus = Arc::new(EventBus::new(4));
        let mut sub = bus.subscribe();
        let publisher = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish(connected(7));
        });
        assert_eq!(sub.recv().await, Some(connected(7)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn close_ends_streams_after_buffered_events() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        bus.publish(connected(1));
        bus.close();
        bus.publish(connected(2));
        let events: Vec<Event> = sub.into_stream().collect().await;
        assert_eq!(events, vec![connected(1)]);

        let mut late = bus.subscribe();
        assert_eq!(late.recv().await, None);
    }
}
