//! Selecting the subscriptions an event should be delivered to

use crate::{Event, Subscription};

/// Whether `subscription` should receive `event`.
///
/// Disabled subscriptions never match.
pub fn matches(event: &Event, subscription: &Subscription) -> bool {
    subscription.enabled && subscription.accepts(event)
}

/// Matching subscriptions, in the order given.
///
/// Pure: the same event and subscription list always yield the same result.
pub fn select<'a, I>(event: &Event, subscriptions: I) -> Vec<&'a Subscription>
where
    I: IntoIterator<Item = &'a Subscription>,
{
    subscriptions
        .into_iter()
        .filter(|s| matches(event, s))
        .collect()
}

/// Owned variant of [`select`] for listings fetched from a store
pub fn select_owned(event: &Event, subscriptions: Vec<Subscription>) -> Vec<Subscription> {
    subscriptions
        .into_iter()
        .filter(|s| matches(event, s))
        .collect()
}
