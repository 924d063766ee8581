//! Tests for the push event contract as consumed from server frames.
//!
//! Verifies that realistic frames decode into events whose payloads yield
//! the models the coordinator applies.

use donorlink_core::{
    names, Event, Notification, NotificationCategory, PointsUpdate, ResourceType,
};
use serde_json::json;

#[test]
fn test_notification_frame_to_model() {
    let frame = json!({
        "event": "notification:new",
        "data": {
            "id": 314,
            "category": "help_request",
            "title": "Someone needs blankets",
            "message": "Shelter on 5th street",
            "createdAt": "2026-03-01T10:00:00Z"
        }
    })
    .to_string();

    let event = Event::from_frame(&frame).unwrap();
    assert_eq!(event.name, names::NOTIFICATION_NEW);

    let notification = Notification::from_event(&event);
    assert_eq!(notification.id, "314");
    assert_eq!(notification.category, NotificationCategory::HelpRequest);
    assert_eq!(notification.category.presentation().label, "Help request");
    assert!(!notification.is_read);
}

#[test]
fn test_points_frame_to_update() {
    let frame = r#"{"event":"points:earned","data":{"points":25,"totalPoints":150,"levelUp":true,"newLevel":3}}"#;
    let event = Event::from_frame(frame).unwrap();

    let update = PointsUpdate::from_event(&event).unwrap();
    assert_eq!(update.total_points, 150);
    assert!(update.level_up);
    assert_eq!(update.new_level, Some(3));
}

#[test]
fn test_unknown_fields_are_ignored() {
    let frame = r#"{"event":"badge:earned","data":{"badgeId":"first-gift","future":{"x":1}},"extra":true}"#;
    let event = Event::from_frame(frame).unwrap();
    assert_eq!(event.id_field("badgeId").as_deref(), Some("first-gift"));
}

#[test]
fn test_notification_list_from_rest_body() {
    let body = json!([
        {"id": "a", "category": "donation", "title": "Thanks", "message": "", "createdAt": "2026-03-02T10:00:00Z", "isRead": true},
        {"id": "b", "category": "unheard_of", "title": "?", "createdAt": "2026-03-01T10:00:00Z"}
    ]);
    let list: Vec<Notification> = serde_json::from_value(body).unwrap();
    assert_eq!(list.len(), 2);
    assert!(list[0].is_read);
    assert_eq!(list[1].category, NotificationCategory::Other);
    assert!(!list[1].is_read);
}

#[test]
fn test_resource_names_match_rest_paths() {
    assert_eq!(ResourceType::Leaderboard.path_segment(), "leaderboard");
    assert_eq!(ResourceType::HelpRequests.path_segment(), "help-requests");
}
