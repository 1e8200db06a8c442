use super::EventType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Subscription lists as written on a CloudEventSource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubscription {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_event_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_event_types: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("setting included types and excluded types at the same time is not supported")]
    BothLists,

    #[error("{list}: event type {event_type} is not supported")]
    UnknownType {
        list: &'static str,
        event_type: String,
    },
}

/// Decides whether an event type is delivered to a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSubscriptionFilter {
    included: HashSet<EventType>,
    excluded: HashSet<EventType>,
}

impl EventSubscriptionFilter {
    pub fn new<S: AsRef<str>>(included: &[S], excluded: &[S]) -> Result<Self, FilterError> {
        if !included.is_empty() && !excluded.is_empty() {
            return Err(FilterError::BothLists);
        }
        Ok(Self {
            included: parse_list("includedEventTypes", included)?,
            excluded: parse_list("excludedEventTypes", excluded)?,
        })
    }

    /// A filter that lets every event through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn should_emit(&self, event_type: &str) -> bool {
        let parsed = EventType::parse(event_type);
        if !self.included.is_empty() {
            return parsed.is_some_and(|t| self.included.contains(&t));
        }
        if !self.excluded.is_empty() {
            return !parsed.is_some_and(|t| self.excluded.contains(&t));
        }
        true
    }
}

impl TryFrom<&EventSubscription> for EventSubscriptionFilter {
    type Error = FilterError;

    fn try_from(subscription: &EventSubscription) -> Result<Self, Self::Error> {
        Self::new(
            &subscription.included_event_types,
            &subscription.excluded_event_types,
        )
    }
}

fn parse_list<S: AsRef<str>>(
    list: &'static str,
    names: &[S],
) -> Result<HashSet<EventType>, FilterError> {
    names
        .iter()
        .map(|name| {
            EventType::parse(name.as_ref()).ok_or_else(|| FilterError::UnknownType {
                list,
                event_type: name.as_ref().to_string(),
            })
        })
        .collect()
}
