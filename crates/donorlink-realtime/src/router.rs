//! Declarative event routing.
//!
//! [`ROUTES`] maps every inbound event name to an ordered list of effects.
//! [`EventRouter::resolve`] turns an event into concrete [`Action`]s using
//! its payload; [`EventRouter::dispatch`] applies them to the session's
//! cache, inbox, toast queue and progression tracker.
//!
//! Missing payload fields degrade the affected effect only: an item
//! invalidation without its id is skipped, a toast falls back to its fixed
//! text, and the remaining effects still apply.

use std::time::Duration;

use tracing::{debug, trace, warn};

use donorlink_core::{names, CacheKey, Event, Notification, PointsUpdate, ResourceType};

use crate::cache::QueryCache;
use crate::gamification::ProgressionTracker;
use crate::inbox::NotificationInbox;
use crate::toast::ToastQueue;

use self::Effect::{ApplyBadge, ApplyPoints, InboxAppend, Invalidate, InvalidateItem};
use donorlink_core::ResourceType::{
    Activities, Badges, Certificates, Dashboard, Donations, Events, Gamification, HelpRequests,
    Leaderboard, Organizations,
};

/// What an event does, independent of any particular payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Invalidate a collection key.
    Invalidate(ResourceType),
    /// Invalidate an item key whose id is read from a payload field.
    InvalidateItem(ResourceType, &'static str),
    /// Enqueue a toast. Text is the payload's `message`, else `title`, else
    /// `fallback`.
    Toast {
        icon: &'static str,
        fallback: &'static str,
    },
    /// Append the payload as an inbox notification.
    InboxAppend,
    /// Apply the payload's points totals.
    ApplyPoints,
    /// Record the payload's badge.
    ApplyBadge,
}

/// One row of the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub event: &'static str,
    pub effects: &'static [Effect],
}

const fn toast(icon: &'static str, fallback: &'static str) -> Effect {
    Effect::Toast { icon, fallback }
}

/// The routing table.
pub static ROUTES: &[Route] = &[
    Route {
        event: names::DONATION_CREATED,
        effects: &[
            Invalidate(Donations),
            Invalidate(Dashboard),
            toast("💝", "New donation received"),
        ],
    },
    Route {
        event: names::DONATION_UPDATED,
        effects: &[Invalidate(Donations), InvalidateItem(Donations, "donationId")],
    },
    Route {
        event: names::DONATION_STATUS_CHANGED,
        effects: &[
            Invalidate(Donations),
            InvalidateItem(Donations, "donationId"),
            toast("📦", "Donation status updated"),
        ],
    },
    Route {
        event: names::DONATION_DELIVERED,
        effects: &[
            Invalidate(Donations),
            InvalidateItem(Donations, "donationId"),
            Invalidate(Dashboard),
            toast("✅", "Donation delivered"),
        ],
    },
    Route {
        event: names::EVENT_CREATED,
        effects: &[Invalidate(Events), toast("📅", "New event published")],
    },
    Route {
        event: names::EVENT_UPDATED,
        effects: &[Invalidate(Events), InvalidateItem(Events, "eventId")],
    },
    Route {
        event: names::EVENT_CANCELLED,
        effects: &[
            Invalidate(Events),
            InvalidateItem(Events, "eventId"),
            toast("🚫", "An event was cancelled"),
        ],
    },
    Route {
        event: names::EVENT_REGISTRATION,
        effects: &[Invalidate(Events), InvalidateItem(Events, "eventId")],
    },
    Route {
        event: names::HELP_REQUEST_CREATED,
        effects: &[Invalidate(HelpRequests), toast("🆘", "New help request")],
    },
    Route {
        event: names::HELP_REQUEST_UPDATED,
        effects: &[
            Invalidate(HelpRequests),
            InvalidateItem(HelpRequests, "helpRequestId"),
        ],
    },
    Route {
        event: names::HELP_REQUEST_FULFILLED,
        effects: &[
            Invalidate(HelpRequests),
            InvalidateItem(HelpRequests, "helpRequestId"),
            toast("🤝", "Help request fulfilled"),
        ],
    },
    Route {
        event: names::VOLUNTEER_ASSIGNED,
        effects: &[
            InvalidateItem(HelpRequests, "helpRequestId"),
            toast("🙋", "A volunteer was assigned"),
        ],
    },
    Route {
        event: names::NGO_VERIFIED,
        effects: &[
            Invalidate(Organizations),
            InvalidateItem(Organizations, "ngoId"),
            toast("🏢", "Organization verified"),
        ],
    },
    Route {
        event: names::CERTIFICATE_ISSUED,
        effects: &[Invalidate(Certificates), toast("📜", "Certificate issued")],
    },
    Route {
        event: names::BADGE_EARNED,
        effects: &[
            ApplyBadge,
            Invalidate(Badges),
            toast("🏅", "You earned a new badge"),
        ],
    },
    Route {
        event: names::POINTS_EARNED,
        effects: &[ApplyPoints, Invalidate(Gamification), Invalidate(Leaderboard)],
    },
    Route {
        event: names::LEADERBOARD_UPDATED,
        effects: &[Invalidate(Leaderboard)],
    },
    Route {
        event: names::ACTIVITY_NEW,
        effects: &[Invalidate(Activities)],
    },
    Route {
        event: names::STATS_UPDATED,
        effects: &[Invalidate(Dashboard)],
    },
    Route {
        event: names::NOTIFICATION_NEW,
        effects: &[InboxAppend, toast("🔔", "New notification")],
    },
];

/// A resolved effect, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Invalidate(CacheKey),
    Toast { icon: String, text: String },
    InboxAppend(Notification),
    ApplyPoints(PointsUpdate),
    ApplyBadge(String),
}

/// Components an action can touch.
#[derive(Debug, Clone)]
pub struct EffectTargets {
    pub cache: QueryCache,
    pub inbox: NotificationInbox,
    pub toasts: ToastQueue,
    pub progress: ProgressionTracker,
    pub toast_ttl: Duration,
}

/// Routes inbound events through [`ROUTES`].
#[derive(Debug, Clone, Copy)]
pub struct EventRouter {
    routes: &'static [Route],
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self { routes: ROUTES }
    }

    pub fn routes(&self) -> &'static [Route] {
        self.routes
    }

    /// Effects for an event name; empty for unknown names.
    pub fn effects_for(&self, event_name: &str) -> &'static [Effect] {
        self.routes
            .iter()
            .find(|route| route.event == event_name)
            .map(|route| route.effects)
            .unwrap_or(&[])
    }

    /// Resolve an event against its route, in table order.
    pub fn resolve(&self, event: &Event) -> Vec<Action> {
        let effects = self.effects_for(&event.name);
        if effects.is_empty() {
            debug!(event_name = %event.name, "No route for event");
            return Vec::new();
        }

        let mut actions = Vec::with_capacity(effects.len());
        for effect in effects {
            match *effect {
                Effect::Invalidate(resource) => {
                    actions.push(Action::Invalidate(CacheKey::collection(resource)));
                }
                Effect::InvalidateItem(resource, field) => match event.id_field(field) {
                    Some(id) => actions.push(Action::Invalidate(CacheKey::item(resource, id))),
                    None => {
                        debug!(event_name = %event.name, field, "Item id missing, skipping item invalidation")
                    }
                },
                Effect::Toast { icon, fallback } => {
                    let text = event
                        .str_field("message")
                        .or_else(|| event.str_field("title"))
                        .unwrap_or(fallback);
                    actions.push(Action::Toast {
                        icon: icon.to_string(),
                        text: text.to_string(),
                    });
                }
                Effect::InboxAppend => {
                    actions.push(Action::InboxAppend(Notification::from_event(event)));
                }
                Effect::ApplyPoints => match PointsUpdate::from_event(event) {
                    Some(update) => actions.push(Action::ApplyPoints(update)),
                    None => warn!(event_name = %event.name, "Points event without totalPoints, skipping"),
                },
                Effect::ApplyBadge => {
                    match event
                        .id_field("badgeId")
                        .or_else(|| event.id_field("badge.id"))
                    {
                        Some(badge_id) => actions.push(Action::ApplyBadge(badge_id)),
                        None => warn!(event_name = %event.name, "Badge event without badge id, skipping"),
                    }
                }
            }
        }
        actions
    }

    /// Resolve and apply an event. Returns the number of actions applied.
    pub fn dispatch(&self, event: &Event, targets: &EffectTargets) -> usize {
        let actions = self.resolve(event);
        let count = actions.len();
        for action in actions {
            match action {
                Action::Invalidate(key) => {
                    targets.cache.invalidate(&key);
                }
                Action::Toast { icon, text } => {
                    targets.toasts.enqueue(icon, text, targets.toast_ttl);
                }
                Action::InboxAppend(notification) => {
                    targets.inbox.append(notification);
                }
                Action::ApplyPoints(update) => targets.progress.apply_points_event(update),
                Action::ApplyBadge(badge_id) => {
                    targets.progress.apply_badge_event(badge_id);
                }
            }
        }
        trace!(event_name = %event.name, actions = count, "Event routed");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use serde_json::json;

    use crate::mock::{MockFetcher, MockInboxApi};

    #[test]
    fn test_every_known_event_has_exactly_one_route() {
        let router = EventRouter::new();
        let routed: HashSet<&str> = router.routes().iter().map(|r| r.event).collect();
        assert_eq!(routed.len(), router.routes().len(), "duplicate route");
        for name in names::ALL {
            assert!(routed.contains(name), "{name} has no route");
            assert!(!router.effects_for(name).is_empty());
        }
        assert_eq!(routed.len(), names::ALL.len());
    }

    #[test]
    fn test_unknown_event_resolves_to_nothing() {
        let router = EventRouter::new();
        assert!(router.effects_for("donation:teleported").is_empty());
        assert!(router
            .resolve(&Event::new("donation:teleported", json!({})))
            .is_empty());
    }

    #[test]
    fn test_donation_delivered_resolves_in_table_order() {
        let router = EventRouter::new();
        let event = Event::new(
            names::DONATION_DELIVERED,
            json!({"donationId": 17, "message": "Your blankets arrived"}),
        );
        assert_eq!(
            router.resolve(&event),
            vec![
                Action::Invalidate(CacheKey::collection(Donations)),
                Action::Invalidate(CacheKey::item(Donations, "17")),
                Action::Invalidate(CacheKey::collection(Dashboard)),
                Action::Toast {
                    icon: "✅".into(),
                    text: "Your blankets arrived".into()
                },
            ]
        );
    }

    #[test]
    fn test_missing_fields_degrade_per_effect() {
        let router = EventRouter::new();
        let event = Event::new(names::EVENT_CANCELLED, serde_json::Value::Null);
        assert_eq!(
            router.resolve(&event),
            vec![
                Action::Invalidate(CacheKey::collection(Events)),
                Action::Toast {
                    icon: "🚫".into(),
                    text: "An event was cancelled".into()
                },
            ]
        );
    }

    #[test]
    fn test_toast_prefers_message_then_title() {
        let router = EventRouter::new();
        let titled = Event::new(names::CERTIFICATE_ISSUED, json!({"title": "Volunteer of the month"}));
        assert!(router.resolve(&titled).contains(&Action::Toast {
            icon: "📜".into(),
            text: "Volunteer of the month".into()
        }));
    }

    #[test]
    fn test_points_and_badge_payloads() {
        let router = EventRouter::new();
        let points = Event::new(names::POINTS_EARNED, json!({"totalPoints": 150, "levelUp": true, "newLevel": 3}));
        assert_eq!(
            router.resolve(&points)[0],
            Action::ApplyPoints(PointsUpdate::new(150).with_level_up(3))
        );

        let no_total = Event::new(names::POINTS_EARNED, json!({"points": 5}));
        assert_eq!(
            router.resolve(&no_total),
            vec![
                Action::Invalidate(CacheKey::collection(Gamification)),
                Action::Invalidate(CacheKey::collection(Leaderboard)),
            ]
        );

        let nested = Event::new(names::BADGE_EARNED, json!({"badge": {"id": "helper"}}));
        assert_eq!(router.resolve(&nested)[0], Action::ApplyBadge("helper".into()));
    }

    #[tokio::test]
    async fn test_dispatch_applies_to_targets() {
        let fetcher = MockFetcher::new();
        let targets = EffectTargets {
            cache: QueryCache::new(Arc::new(fetcher.clone())),
            inbox: NotificationInbox::new(Arc::new(MockInboxApi::new())),
            toasts: ToastQueue::new(Duration::from_secs(5)),
            progress: ProgressionTracker::new(Duration::from_secs(4)),
            toast_ttl: Duration::from_secs(5),
        };
        let router = EventRouter::new();

        let applied = router.dispatch(
            &Event::new(names::NOTIFICATION_NEW, json!({"id": "n1", "title": "Hi"})),
            &targets,
        );
        assert_eq!(applied, 2);
        assert_eq!(targets.inbox.unread_count(), 1);
        assert_eq!(targets.toasts.active()[0].text, "Hi");

        router.dispatch(&Event::new(names::BADGE_EARNED, json!({"badgeId": "b1"})), &targets);
        router.dispatch(&Event::new(names::BADGE_EARNED, json!({"badgeId": "b1"})), &targets);
        assert_eq!(targets.progress.badges(), vec!["b1".to_string()]);
        assert_eq!(targets.toasts.len(), 3);
    }
}
