//! Deep-link capture and dispatch.
//!
//! Protocol URLs arrive from the OS at arbitrary times relative to window
//! creation: as an open-url activation event, in the launch argv, or
//! forwarded from a rejected second instance. They all funnel into one
//! [`DeepLinkDispatcher`], which buffers at most one link while no delivery
//! target exists and forwards immediately once one does.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{AUTH_CALLBACK_HOST, AUTH_CALLBACK_PATH};

/// Payload delivered to the rendering context for an auth callback.
///
/// Exactly one of `code`/`error` is present on a well-formed callback;
/// payloads with neither are tolerated downstream as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCallbackPayload {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// Original raw URL, for diagnostics on the receiving side.
    pub url: String,
}

/// The single buffered link held while no delivery target is attached.
#[derive(Debug, Clone)]
pub struct PendingDeepLink {
    pub raw_url: String,
    pub received_at: DateTime<Utc>,
}

/// Receiver for parsed callback payloads. The main-window wiring implements
/// this; tests substitute a recording sink.
pub trait CallbackSink: Send + Sync {
    fn deliver(&self, payload: AuthCallbackPayload);
}

/// Proof of a live subscription. Required on detach so a stale subscriber
/// (e.g. a destroyed window racing a reload) cannot tear down its successor.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
}

struct DispatchState {
    pending: Option<PendingDeepLink>,
    sink: Option<(u64, Arc<dyn CallbackSink>)>,
    next_id: u64,
}

/// Two-state machine: `Buffering` while `sink` is `None`, `Delivering`
/// otherwise. At most one pending link is ever held; a new arrival while
/// buffering overwrites it, since only one OAuth flow can be in flight.
pub struct DeepLinkDispatcher {
    scheme: String,
    state: Mutex<DispatchState>,
}

impl DeepLinkDispatcher {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            state: Mutex::new(DispatchState {
                pending: None,
                sink: None,
                next_id: 1,
            }),
        }
    }

    /// Entry point for every raw protocol URL, regardless of source.
    pub fn handle_url(&self, raw: &str) {
        let sink = {
            let mut state = self.state.lock();
            match state.sink.as_ref() {
                Some((_, sink)) => Arc::clone(sink),
                None => {
                    debug!("[deep-link] no delivery target yet, buffering");
                    state.pending = Some(PendingDeepLink {
                        raw_url: raw.to_string(),
                        received_at: Utc::now(),
                    });
                    return;
                }
            }
        };
        self.parse_and_forward(raw, sink.as_ref());
    }

    /// Attaches the delivery target, replacing any previous one, and drains
    /// the pending slot through it. Returns the handle required to detach.
    pub fn attach(&self, sink: Arc<dyn CallbackSink>) -> SubscriptionHandle {
        let (handle, buffered) = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.sink = Some((id, Arc::clone(&sink)));
            (SubscriptionHandle { id }, state.pending.take())
        };
        if let Some(link) = buffered {
            info!(
                "[deep-link] delivering link buffered at {}",
                link.received_at.to_rfc3339()
            );
            self.parse_and_forward(&link.raw_url, sink.as_ref());
        }
        handle
    }

    /// Detaches the target identified by `handle`, re-arming buffering.
    /// A handle that no longer matches the live subscription is a no-op.
    pub fn detach(&self, handle: SubscriptionHandle) {
        let mut state = self.state.lock();
        if matches!(state.sink.as_ref(), Some((id, _)) if *id == handle.id) {
            state.sink = None;
        }
    }

    fn parse_and_forward(&self, raw: &str, sink: &dyn CallbackSink) {
        match parse_auth_callback(&self.scheme, raw) {
            Ok(Some(payload)) => {
                info!(
                    "[deep-link] auth callback received (code: {}, error: {})",
                    payload.code.is_some(),
                    payload.error.is_some()
                );
                sink.deliver(payload);
            }
            // A different deep-link feature under our scheme, or somebody
            // else's scheme entirely. Not an error.
            Ok(None) => debug!("[deep-link] ignoring non-callback URL: {raw}"),
            Err(err) => warn!("[deep-link] failed to parse deep link: {err}"),
        }
    }
}

/// Parses a raw deep link into an auth-callback payload.
///
/// Returns `Ok(None)` when the URL is valid but addresses something other
/// than `<scheme>://auth/callback`; returns `Err` only when it does not
/// parse as a URL at all.
pub fn parse_auth_callback(
    scheme: &str,
    raw: &str,
) -> Result<Option<AuthCallbackPayload>, url::ParseError> {
    let parsed = Url::parse(raw)?;

    if parsed.scheme() != scheme
        || parsed.host_str() != Some(AUTH_CALLBACK_HOST)
        || parsed.path() != AUTH_CALLBACK_PATH
    {
        return Ok(None);
    }

    let mut payload = AuthCallbackPayload {
        code: None,
        error: None,
        error_description: None,
        url: raw.to_string(),
    };
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.into_owned()),
            "error" => payload.error = Some(value.into_owned()),
            "error_description" => payload.error_description = Some(value.into_owned()),
            _ => {}
        }
    }
    Ok(Some(payload))
}

/// Scans a launch argument list for a protocol URL (Windows-style protocol
/// delivery; also applied to argv forwarded from a second instance).
pub fn deep_link_arg<S: AsRef<str>>(args: &[S], scheme: &str) -> Option<String> {
    let prefix = format!("{scheme}://");
    args.iter()
        .map(|arg| arg.as_ref())
        .find(|arg| arg.starts_with(&prefix))
        .map(|arg| arg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<AuthCallbackPayload>>,
    }

    impl CallbackSink for RecordingSink {
        fn deliver(&self, payload: AuthCallbackPayload) {
            self.delivered.lock().push(payload);
        }
    }

    fn dispatcher() -> DeepLinkDispatcher {
        DeepLinkDispatcher::new("suna")
    }

    #[test]
    fn buffers_last_link_only_before_target_exists() {
        let dispatcher = dispatcher();
        dispatcher.handle_url("suna://auth/callback?code=first");
        dispatcher.handle_url("suna://auth/callback?code=second");

        let sink = Arc::new(RecordingSink::default());
        dispatcher.attach(sink.clone());

        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].code.as_deref(), Some("second"));
    }

    #[test]
    fn forwards_immediately_and_in_order_while_attached() {
        let dispatcher = dispatcher();
        let sink = Arc::new(RecordingSink::default());
        dispatcher.attach(sink.clone());

        dispatcher.handle_url("suna://auth/callback?code=a");
        dispatcher.handle_url("suna://auth/callback?code=b");

        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].code.as_deref(), Some("a"));
        assert_eq!(delivered[1].code.as_deref(), Some("b"));
    }

    #[test]
    fn detach_rearms_buffering() {
        let dispatcher = dispatcher();
        let first = Arc::new(RecordingSink::default());
        let handle = dispatcher.attach(first.clone());
        dispatcher.detach(handle);

        dispatcher.handle_url("suna://auth/callback?code=later");
        assert!(first.delivered.lock().is_empty());

        let second = Arc::new(RecordingSink::default());
        dispatcher.attach(second.clone());
        assert_eq!(second.delivered.lock().len(), 1);
    }

    #[test]
    fn stale_handle_cannot_detach_replacement_subscriber() {
        let dispatcher = dispatcher();
        let first = Arc::new(RecordingSink::default());
        let stale = dispatcher.attach(first);

        let second = Arc::new(RecordingSink::default());
        let _live = dispatcher.attach(second.clone());

        dispatcher.detach(stale);
        dispatcher.handle_url("suna://auth/callback?code=kept");
        assert_eq!(second.delivered.lock().len(), 1);
    }

    #[test]
    fn parses_code_callback() {
        let payload = parse_auth_callback("suna", "suna://auth/callback?code=abc123")
            .unwrap()
            .unwrap();
        assert_eq!(payload.code.as_deref(), Some("abc123"));
        assert_eq!(payload.error, None);
        assert_eq!(payload.error_description, None);
        assert_eq!(payload.url, "suna://auth/callback?code=abc123");
    }

    #[test]
    fn parses_error_callback_with_form_encoding() {
        let payload = parse_auth_callback(
            "suna",
            "suna://auth/callback?error=access_denied&error_description=User+cancelled",
        )
        .unwrap()
        .unwrap();
        assert_eq!(payload.code, None);
        assert_eq!(payload.error.as_deref(), Some("access_denied"));
        assert_eq!(payload.error_description.as_deref(), Some("User cancelled"));
    }

    #[test]
    fn ignores_other_paths_and_schemes() {
        assert_eq!(parse_auth_callback("suna", "suna://other/path"), Ok(None));
        assert_eq!(
            parse_auth_callback("suna", "https://auth/callback?code=x"),
            Ok(None)
        );
    }

    #[test]
    fn malformed_url_is_an_error_not_a_panic() {
        assert!(parse_auth_callback("suna", "not a url").is_err());
    }

    #[test]
    fn malformed_url_while_attached_delivers_nothing() {
        let dispatcher = dispatcher();
        let sink = Arc::new(RecordingSink::default());
        dispatcher.attach(sink.clone());

        dispatcher.handle_url("::::");
        dispatcher.handle_url("suna://settings/general");
        assert!(sink.delivered.lock().is_empty());
    }

    #[test]
    fn scans_argv_for_protocol_argument() {
        let args = ["--flag".to_string(), "suna://auth/callback?code=xyz".to_string()];
        assert_eq!(
            deep_link_arg(&args, "suna").as_deref(),
            Some("suna://auth/callback?code=xyz")
        );
        assert_eq!(deep_link_arg(&["--flag".to_string()], "suna"), None);
    }
}
