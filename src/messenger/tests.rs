use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::bus::event_types::{
    EVENT_NAVIGATION, EVENT_REFRESH_REQUESTED, EVENT_UPLOAD_REQUESTED, EVENT_WIDGET_READY,
};
use crate::core::{
    CalendarSnapshot, DataSnapshot, DataType, NavigationAction, PhotoSnapshot, UserRef,
};
use crate::testing::FakeTransport;

fn setup() -> (Arc<EventBus>, Arc<FakeTransport>, Arc<WidgetMessenger>) {
    let bus = Arc::new(EventBus::new());
    let transport = FakeTransport::new();
    let messenger = WidgetMessenger::new(bus.clone(), transport.clone(), "dark");
    (bus, transport, messenger)
}

fn record(bus: &EventBus, event: &str) -> Arc<Mutex<Vec<AppEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.on(event, move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

fn photos_loaded(last_updated: i64) -> AppEvent {
    AppEvent::DataLoaded {
        snapshot: DataSnapshot::Photos(PhotoSnapshot {
            urls: vec![format!("https://cdn.example/p.jpg?sig={last_updated}")],
            folder: None,
            count: 1,
            last_updated,
        }),
    }
}

fn calendar_loaded(last_updated: i64) -> AppEvent {
    AppEvent::DataLoaded {
        snapshot: DataSnapshot::Calendar(CalendarSnapshot {
            events: Vec::new(),
            calendars: Vec::new(),
            last_updated,
        }),
    }
}

fn user(id: &str) -> UserRef {
    UserRef {
        id: id.to_string(),
        email: Some(format!("{id}@family.example")),
        display_name: None,
    }
}

fn signed_in(id: &str) -> AppEvent {
    AppEvent::AuthSuccess { user: user(id) }
}

fn theme(name: &str) -> AppEvent {
    AppEvent::ThemeChanged {
        theme: name.to_string(),
    }
}

fn handshake(messenger: &WidgetMessenger, frame: &FrameId, widget: &str) {
    messenger.handle_inbound(
        frame.clone(),
        json!({ "type": "widget-ready", "widget": widget }),
    );
}

#[test]
fn identical_snapshot_is_not_resent() {
    let (_bus, transport, messenger) = setup();
    let clock = transport.add_frame("f-clock", Some("clock"), true);
    let photos = transport.add_frame("f-photos", Some("photos"), true);
    messenger.handle_event(&signed_in("mom"));
    assert_eq!(transport.total_sent(), 0, "no widget has handshaken yet");

    messenger.handle_event(&photos_loaded(100));
    assert_eq!(transport.sent_to(&clock).len(), 1);
    assert_eq!(transport.sent_to(&photos).len(), 1);

    messenger.handle_event(&photos_loaded(100));
    assert_eq!(transport.total_sent(), 2, "same lastUpdated must be deduplicated");
    assert_eq!(
        messenger.broadcast(),
        BroadcastReport {
            sent: 0,
            skipped: 2,
            failed: 0
        }
    );

    messenger.handle_event(&photos_loaded(101));
    assert_eq!(transport.sent_to(&clock).len(), 2);
    let latest = transport.payloads_to(&photos).pop().unwrap();
    assert_eq!(latest.photos.map(|p| p.last_updated), Some(101));
}

#[test]
fn new_widget_receives_full_state_immediately() {
    let (bus, transport, messenger) = setup();
    let ready = record(&bus, EVENT_WIDGET_READY);
    messenger.handle_event(&signed_in("mom"));
    messenger.handle_event(&calendar_loaded(5));
    assert_eq!(transport.total_sent(), 0);

    let frame = transport.add_frame("f-cal", Some("calendar"), true);
    handshake(&messenger, &frame, "calendar");

    let payloads = transport.payloads_to(&frame);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].calendar.as_ref().map(|c| c.last_updated), Some(5));
    assert!(payloads[0].auth.ready);
    assert_eq!(payloads[0].theme, "dark");

    let ready = ready.lock().unwrap();
    assert!(matches!(&ready[..], [AppEvent::WidgetReady { widget, .. }] if widget == "calendar"));
    assert_eq!(messenger.registered_widgets().len(), 1);
}

#[test]
fn handshake_is_sent_even_when_state_is_unchanged() {
    let (_bus, transport, messenger) = setup();
    let frame = transport.add_frame("f-clock", Some("clock"), true);
    messenger.handle_event(&signed_in("mom"));
    messenger.handle_event(&photos_loaded(1));
    assert_eq!(transport.sent_to(&frame).len(), 1);

    // Frame reloaded: the same state must be delivered again.
    handshake(&messenger, &frame, "clock");
    handshake(&messenger, &frame, "clock");
    assert_eq!(transport.sent_to(&frame).len(), 3);
    assert_eq!(messenger.registered_widgets().len(), 1, "one session per frame");
}

#[test]
fn sign_out_clears_state_and_notifies_every_frame() {
    let (_bus, transport, messenger) = setup();
    let a = transport.add_frame("f-a", Some("calendar"), true);
    let b = transport.add_frame("f-b", Some("photos"), true);
    handshake(&messenger, &a, "calendar");
    messenger.handle_event(&AppEvent::AuthSuccess { user: user("dad") });
    messenger.handle_event(&calendar_loaded(10));
    messenger.handle_event(&photos_loaded(20));

    messenger.handle_event(&AppEvent::AuthSignout);

    for frame in [&a, &b] {
        let last = transport.payloads_to(frame).pop().unwrap();
        assert!(!last.auth.ready);
        assert!(last.auth.user.is_none());
        assert!(last.calendar.is_none());
        assert!(last.photos.is_none());
        assert_eq!(last.theme, "dark");
    }
    let widgets: Vec<String> = messenger
        .registered_widgets()
        .into_iter()
        .map(|widget| widget.name)
        .collect();
    assert_eq!(widgets, vec!["calendar".to_string()], "handshakes survive sign-out");
    assert_eq!(messenger.state(), SystemState::new("dark"));
}

#[test]
fn sign_in_after_sign_out_reaches_existing_widgets() {
    let (_bus, transport, messenger) = setup();
    let frame = transport.add_frame("f-clock", Some("clock"), true);
    handshake(&messenger, &frame, "clock");

    messenger.handle_event(&signed_in("mom"));
    messenger.handle_event(&AppEvent::AuthSignout);
    messenger.handle_event(&signed_in("mom"));

    let payloads = transport.payloads_to(&frame);
    assert_eq!(payloads.len(), 4);
    let last = payloads.last().unwrap();
    assert!(last.auth.ready);
    assert_eq!(last.auth.user.as_ref().map(|u| u.id.as_str()), Some("mom"));
}

#[test]
fn data_arriving_while_signed_out_is_dropped() {
    let (_bus, transport, messenger) = setup();
    let frame = transport.add_frame("f-photos", Some("photos"), true);
    handshake(&messenger, &frame, "photos");
    messenger.handle_event(&signed_in("dad"));
    messenger.handle_event(&AppEvent::AuthSignout);
    let sent = transport.total_sent();

    messenger.handle_event(&photos_loaded(42));

    assert!(messenger.state().photos.is_none());
    assert_eq!(transport.total_sent(), sent);
    assert!(transport.payloads_to(&frame).pop().unwrap().photos.is_none());
}

#[test]
fn each_dedup_field_triggers_exactly_one_send() {
    let (_bus, transport, messenger) = setup();
    let frame = transport.add_frame("f-clock", Some("clock"), true);
    handshake(&messenger, &frame, "clock");
    messenger.handle_event(&signed_in("mom"));
    messenger.handle_event(&photos_loaded(20));

    let steps = [
        ("calendar appears", calendar_loaded(10), 1),
        ("same calendar", calendar_loaded(10), 0),
        ("newer calendar", calendar_loaded(11), 1),
        ("same photos", photos_loaded(20), 0),
        ("newer photos", photos_loaded(21), 1),
        ("same theme", theme("dark"), 0),
        ("new theme", theme("light"), 1),
        ("same user signs in again", signed_in("mom"), 0),
        ("different user", signed_in("dad"), 1),
    ];
    for (name, event, expected) in steps {
        let before = transport.sent_to(&frame).len();
        messenger.handle_event(&event);
        assert_eq!(transport.sent_to(&frame).len() - before, expected, "{name}");
    }
}

#[test]
fn send_failure_does_not_stop_broadcast_and_heals_later() {
    let (_bus, transport, messenger) = setup();
    let a = transport.add_frame("f-a", None, true);
    let b = transport.add_frame("f-b", None, true);
    let c = transport.add_frame("f-c", None, true);
    messenger.handle_event(&signed_in("mom"));
    transport.fail_sends_to(&b);

    messenger.handle_event(&photos_loaded(1));
    assert_eq!(transport.sent_to(&a).len(), 1);
    assert_eq!(transport.sent_to(&b).len(), 0);
    assert_eq!(transport.sent_to(&c).len(), 1);

    transport.heal(&b);
    let report = messenger.broadcast();
    assert_eq!(
        report,
        BroadcastReport {
            sent: 1,
            skipped: 2,
            failed: 0
        }
    );
    let healed = &transport.payloads_to(&b)[0];
    assert_eq!(healed.photos.as_ref().map(|p| p.last_updated), Some(1));
}

#[test]
fn unchanged_theme_is_not_broadcast() {
    let (_bus, transport, messenger) = setup();
    let frame = transport.add_frame("f", None, true);

    messenger.handle_event(&theme("dark"));
    assert_eq!(transport.total_sent(), 0);

    messenger.handle_event(&theme("halloween-light"));
    assert_eq!(transport.payloads_to(&frame)[0].theme, "halloween-light");
}

#[test]
fn auth_success_waits_for_a_registered_widget() {
    let (_bus, transport, messenger) = setup();
    let frame = transport.add_frame("f", Some("clock"), false);

    messenger.handle_event(&AppEvent::AuthSuccess { user: user("kid") });
    assert_eq!(transport.total_sent(), 0);
    assert!(messenger.state().auth.ready);

    handshake(&messenger, &frame, "clock");
    messenger.handle_event(&AppEvent::AuthSuccess { user: user("grandma") });
    let last = transport.payloads_to(&frame).pop().unwrap();
    assert_eq!(last.auth.user.map(|u| u.id), Some("grandma".to_string()));
}

#[test]
fn vanished_frames_lose_their_session() {
    let (_bus, transport, messenger) = setup();
    let frame = transport.add_frame("f", Some("photos"), true);
    handshake(&messenger, &frame, "photos");
    assert_eq!(messenger.registered_widgets().len(), 1);

    transport.remove_frame(&frame);
    messenger.handle_event(&theme("light"));
    assert!(messenger.registered_widgets().is_empty());
}

#[test]
fn widget_requests_become_bus_events() {
    let (bus, transport, messenger) = setup();
    let uploads = record(&bus, EVENT_UPLOAD_REQUESTED);
    let refreshes = record(&bus, EVENT_REFRESH_REQUESTED);
    let frame = transport.add_frame("f", Some("photos"), true);

    messenger.handle_inbound(
        frame.clone(),
        json!({ "type": "request-upload-modal", "widget": "photos" }),
    );
    messenger.handle_inbound(
        frame.clone(),
        json!({ "type": "request-refresh", "widget": "photos", "dataType": "photos" }),
    );
    messenger.handle_inbound(frame, json!({ "type": "request-refresh" }));

    assert_eq!(
        uploads.lock().unwrap().clone(),
        vec![AppEvent::UploadRequested {
            widget: Some("photos".to_string())
        }]
    );
    assert_eq!(
        refreshes.lock().unwrap().clone(),
        vec![
            AppEvent::RefreshRequested {
                data_type: Some(DataType::Photos),
                widget: Some("photos".to_string()),
            },
            AppEvent::RefreshRequested {
                data_type: None,
                widget: None
            },
        ]
    );
    assert_eq!(transport.total_sent(), 0);
}

#[test]
fn unknown_and_error_messages_change_nothing() {
    let (bus, transport, messenger) = setup();
    let frame = transport.add_frame("f", None, true);
    let before = messenger.state();
    let mut events = bus.subscribe();

    messenger.handle_inbound(frame.clone(), json!({ "type": "dance", "moves": 3 }));
    messenger.handle_inbound(frame.clone(), json!("not an object"));
    assert!(events.try_recv().is_err(), "unknown messages emit nothing");

    messenger.handle_inbound(frame, json!({ "type": "widget-error", "error": "render failed" }));
    assert_eq!(messenger.state(), before);
    assert_eq!(transport.total_sent(), 0);
}

#[test]
fn navigation_is_forwarded_to_the_focused_widget() {
    let (bus, transport, messenger) = setup();
    let nav = record(&bus, EVENT_NAVIGATION);
    let cal = transport.add_frame("f-cal", Some("calendar"), true);
    let photos = transport.add_frame("f-photos", Some("photos"), true);
    handshake(&messenger, &cal, "calendar");
    handshake(&messenger, &photos, "photos");
    transport.clear_sent();

    messenger.handle_inbound(cal.clone(), json!({ "action": "down" }));
    assert_eq!(transport.total_sent(), 0, "nothing is focused yet");

    messenger.set_focus(Some("photos"));
    messenger.handle_inbound(cal.clone(), json!({ "action": "enter" }));

    assert_eq!(
        transport.sent_to(&photos),
        vec![OutboundMessage::WidgetCommand {
            action: NavigationAction::Enter
        }]
    );
    assert!(transport.sent_to(&cal).is_empty());
    assert_eq!(nav.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn started_loop_applies_bus_events_and_inbound_messages() {
    let (bus, transport, messenger) = setup();
    let frame = transport.add_frame("f", Some("clock"), true);
    let handle = messenger.start();

    bus.emit(theme("light"));
    transport.post(&frame, json!({ "type": "widget-ready", "widget": "clock" }));

    tokio::time::timeout(Duration::from_secs(2), async {
        while transport.sent_to(&frame).len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("messenger loop should process both inputs");

    assert_eq!(messenger.state().theme, "light");
    assert_eq!(messenger.registered_widgets()[0].name, "clock");
    handle.abort();
}
