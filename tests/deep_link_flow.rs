//! End-to-end exercises of the deep-link path as the OS drives it: links
//! arriving before the window exists, forwarded second-instance argv, and
//! live delivery after attach.

use std::sync::Arc;

use parking_lot::Mutex;
use suna_desktop::config::PROTOCOL_SCHEME;
use suna_desktop::deep_link::{
    deep_link_arg, AuthCallbackPayload, CallbackSink, DeepLinkDispatcher,
};

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<AuthCallbackPayload>>,
}

impl CallbackSink for RecordingSink {
    fn deliver(&self, payload: AuthCallbackPayload) {
        self.delivered.lock().push(payload);
    }
}

#[test]
fn cold_start_flow_delivers_only_the_latest_buffered_link() {
    let dispatcher = DeepLinkDispatcher::new(PROTOCOL_SCHEME);

    // Two callbacks race in before the window exists; only one OAuth flow
    // can be live, so the earlier one is dropped.
    dispatcher.handle_url("suna://auth/callback?code=stale");
    dispatcher.handle_url("suna://auth/callback?code=fresh");

    let sink = Arc::new(RecordingSink::default());
    dispatcher.attach(sink.clone());

    let delivered = sink.delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].code.as_deref(), Some("fresh"));
}

#[test]
fn second_instance_argv_reaches_the_running_window() {
    let dispatcher = DeepLinkDispatcher::new(PROTOCOL_SCHEME);
    let sink = Arc::new(RecordingSink::default());
    dispatcher.attach(sink.clone());

    // What the single-instance plugin hands the winner.
    let forwarded = vec![
        "/usr/bin/suna-desktop".to_string(),
        "suna://auth/callback?code=xyz".to_string(),
    ];
    let link = deep_link_arg(&forwarded, PROTOCOL_SCHEME).expect("protocol arg present");
    dispatcher.handle_url(&link);

    let delivered = sink.delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].code.as_deref(), Some("xyz"));
}

#[test]
fn window_reload_keeps_exactly_one_subscriber() {
    let dispatcher = DeepLinkDispatcher::new(PROTOCOL_SCHEME);

    let before_reload = Arc::new(RecordingSink::default());
    let stale = dispatcher.attach(before_reload.clone());

    // Reload: new page attaches first, old teardown runs afterwards.
    let after_reload = Arc::new(RecordingSink::default());
    dispatcher.attach(after_reload.clone());
    dispatcher.detach(stale);

    dispatcher.handle_url("suna://auth/callback?code=post-reload");

    assert!(before_reload.delivered.lock().is_empty());
    let delivered = after_reload.delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].code.as_deref(), Some("post-reload"));
}

#[test]
fn unrelated_links_never_surface() {
    let dispatcher = DeepLinkDispatcher::new(PROTOCOL_SCHEME);
    let sink = Arc::new(RecordingSink::default());
    dispatcher.attach(sink.clone());

    dispatcher.handle_url("suna://other/path");
    dispatcher.handle_url("https://example.com/auth/callback?code=web");
    dispatcher.handle_url("%%%not-a-url%%%");

    assert!(sink.delivered.lock().is_empty());
}
