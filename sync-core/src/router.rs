//! Classifies an inbound payload by role and phase.
//!
//! Control sentinels are matched against the whole payload before any JSON
//! parsing. Everything else is interpreted according to what the current
//! phase is waiting for.

use p2psync_types::{
    AuthorizationDetails, ControlSignal, InboundPayload, Payload, PeerIdentity, ReceiveHistory,
};

use crate::event::Role;
use crate::ledger::Phase;

/// Reason reported when the peer's authorization details cannot be decoded.
pub const REASON_AUTHORIZATION_DETAILS_INVALID: &str = "authorization details invalid";

/// What the machine should do with an inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Nothing; the phase is not expecting this payload.
    Ignore,
    /// The peer asked to skip the token scan.
    PromptSkip,
    /// The peer vouched for the connection; treat local authentication as done.
    AuthenticationShortcut,
    /// The peer's authorization details, ready to check.
    Authorize(AuthorizationDetails),
    /// The authorization details were unusable.
    RejectAuthorization(String),
    /// The peer's identity.
    RegisterIdentity(PeerIdentity),
    /// Unusable payload where an identity was required.
    DisconnectMalformed(String),
    /// The peer's receive-history summary.
    History(ReceiveHistory),
    /// Free text from the peer.
    Status(String),
    /// Sync record bytes.
    Records(Vec<u8>),
}

/// Route a payload received while in `phase`.
pub fn route(role: Role, phase: Phase, payload: &Payload) -> Route {
    let Some(bytes) = payload.as_bytes() else {
        return match phase {
            Phase::Authenticated => {
                Route::RejectAuthorization(REASON_AUTHORIZATION_DETAILS_INVALID.to_string())
            }
            Phase::Authorized => Route::DisconnectMalformed("expected a bytes payload".into()),
            Phase::KeyExchanged if role == Role::Responder => {
                Route::DisconnectMalformed("expected a bytes payload".into())
            }
            _ => Route::Ignore,
        };
    };

    match (phase, InboundPayload::decode(bytes)) {
        (Phase::Idle, _) => Route::Ignore,

        (Phase::Connecting, InboundPayload::Control(ControlSignal::SkipConfirmation)) => {
            Route::PromptSkip
        }
        (Phase::Connecting, InboundPayload::Control(ControlSignal::ConnectionAccept)) => {
            Route::AuthenticationShortcut
        }
        (Phase::Connecting, InboundPayload::Data(_)) => Route::Ignore,

        (Phase::Authenticated, InboundPayload::Data(data)) => {
            match AuthorizationDetails::from_bytes(&data) {
                Ok(details) => Route::Authorize(details),
                Err(_) => {
                    Route::RejectAuthorization(REASON_AUTHORIZATION_DETAILS_INVALID.to_string())
                }
            }
        }
        // A sentinel overtaken by local authentication.
        (Phase::Authenticated, InboundPayload::Control(_)) => Route::Ignore,

        (Phase::Authorized, inbound) => identity_route(inbound),
        (Phase::KeyExchanged, inbound) if role == Role::Responder => identity_route(inbound),

        (Phase::KeyExchanged, InboundPayload::Data(data)) => {
            if let Ok(history) = ReceiveHistory::from_bytes(&data) {
                return Route::History(history);
            }
            if let Ok(identity) = PeerIdentity::from_bytes(&data) {
                return Route::RegisterIdentity(identity);
            }
            match String::from_utf8(data) {
                Ok(text) => Route::Status(text),
                Err(_) => Route::Ignore,
            }
        }
        (Phase::KeyExchanged, InboundPayload::Control(_)) => Route::Ignore,

        (Phase::HistorySent | Phase::DataTransfer, InboundPayload::Control(_)) => {
            Route::AuthenticationShortcut
        }
        (Phase::HistorySent | Phase::DataTransfer, InboundPayload::Data(data)) => {
            Route::Records(data)
        }
    }
}

fn identity_route(inbound: InboundPayload) -> Route {
    match inbound {
        InboundPayload::Data(data) => match PeerIdentity::from_bytes(&data) {
            Ok(identity) => Route::RegisterIdentity(identity),
            Err(e) => Route::DisconnectMalformed(e.to_string()),
        },
        InboundPayload::Control(signal) => {
            Route::DisconnectMalformed(format!("unexpected control signal {:?}", signal))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2psync_types::{PayloadKind, TransferId};

    fn bytes(data: &[u8]) -> Payload {
        Payload::bytes(TransferId::new(1), data.to_vec())
    }

    fn stream() -> Payload {
        Payload {
            id: TransferId::new(1),
            kind: PayloadKind::Stream,
        }
    }

    #[test]
    fn sentinels_in_connecting() {
        assert_eq!(
            route(Role::Responder, Phase::Connecting, &bytes(b"SKIP_QR_CODE_SCAN")),
            Route::PromptSkip
        );
        assert_eq!(
            route(Role::Responder, Phase::Connecting, &bytes(b"CONNECTION_ACCEPT")),
            Route::AuthenticationShortcut
        );
    }

    #[test]
    fn data_in_connecting_is_ignored() {
        assert_eq!(
            route(Role::Responder, Phase::Connecting, &bytes(b"{\"a\":1}")),
            Route::Ignore
        );
    }

    #[test]
    fn sentinel_prefix_is_data() {
        assert_eq!(
            route(Role::Responder, Phase::Connecting, &bytes(b"CONNECTION_ACCEPTED")),
            Route::Ignore
        );
    }

    #[test]
    fn authenticated_decodes_details() {
        let route = route(
            Role::Initiator,
            Phase::Authenticated,
            &bytes(br#"{"org":"acme"}"#),
        );
        match route {
            Route::Authorize(details) => assert_eq!(details.get("org").unwrap(), "acme"),
            other => panic!("unexpected route {:?}", other),
        }
    }

    #[test]
    fn authenticated_rejects_undecodable_details() {
        let expected =
            Route::RejectAuthorization(REASON_AUTHORIZATION_DETAILS_INVALID.to_string());
        assert_eq!(
            route(Role::Initiator, Phase::Authenticated, &bytes(b"dsk")),
            expected
        );
        assert_eq!(
            route(Role::Initiator, Phase::Authenticated, &bytes(b"[1,2]")),
            expected
        );
        assert_eq!(route(Role::Responder, Phase::Authenticated, &stream()), expected);
    }

    #[test]
    fn authenticated_ignores_late_sentinels() {
        assert_eq!(
            route(Role::Responder, Phase::Authenticated, &bytes(b"CONNECTION_ACCEPT")),
            Route::Ignore
        );
        assert_eq!(
            route(Role::Initiator, Phase::Authenticated, &bytes(b"SKIP_QR_CODE_SCAN")),
            Route::Ignore
        );
    }

    #[test]
    fn authorized_expects_identity() {
        let route = route(
            Role::Responder,
            Phase::Authorized,
            &bytes(br#"{"device_id":"d1","app_lifetime_key":"k1"}"#),
        );
        assert_eq!(
            route,
            Route::RegisterIdentity(PeerIdentity::new("d1", "k1"))
        );
    }

    #[test]
    fn malformed_identity_disconnects() {
        assert!(matches!(
            route(Role::Initiator, Phase::Authorized, &bytes(br#"{"app_lifetime_key":"k1"}"#)),
            Route::DisconnectMalformed(_)
        ));
        assert!(matches!(
            route(Role::Initiator, Phase::Authorized, &stream()),
            Route::DisconnectMalformed(_)
        ));
    }

    #[test]
    fn responder_accepts_identity_after_sending_its_own() {
        assert_eq!(
            route(
                Role::Responder,
                Phase::KeyExchanged,
                &bytes(br#"{"device_id":"d1","app_lifetime_key":"k1"}"#)
            ),
            Route::RegisterIdentity(PeerIdentity::new("d1", "k1"))
        );
    }

    #[test]
    fn initiator_key_exchanged_routes_history_identity_and_text() {
        let history = br#"[{"entity_type":"note","last_record_id":4,"app_lifetime_key":"k1"}]"#;
        assert!(matches!(
            route(Role::Initiator, Phase::KeyExchanged, &bytes(history)),
            Route::History(h) if h.len() == 1
        ));
        assert_eq!(
            route(Role::Initiator, Phase::KeyExchanged, &bytes(b"[]")),
            Route::History(ReceiveHistory::default())
        );
        assert_eq!(
            route(
                Role::Initiator,
                Phase::KeyExchanged,
                &bytes(br#"{"device_id":"d2","app_lifetime_key":"k2"}"#)
            ),
            Route::RegisterIdentity(PeerIdentity::new("d2", "k2"))
        );
        assert_eq!(
            route(Role::Initiator, Phase::KeyExchanged, &bytes(b"syncing soon")),
            Route::Status("syncing soon".to_string())
        );
    }

    #[test]
    fn history_descriptors_are_opaque() {
        let data = br#"[{"entity":"client","lastRecordId":7}]"#;
        match route(Role::Initiator, Phase::KeyExchanged, &bytes(data)) {
            Route::History(history) => {
                assert_eq!(history.to_bytes().unwrap(), data.to_vec());
            }
            other => panic!("unexpected route {:?}", other),
        }
        assert!(matches!(
            route(Role::Initiator, Phase::KeyExchanged, &bytes(b"[\"a\",2,null]")),
            Route::History(h) if h.len() == 3
        ));
    }

    #[test]
    fn late_sentinels_route_to_shortcut() {
        for phase in [Phase::HistorySent, Phase::DataTransfer] {
            assert_eq!(
                route(Role::Responder, phase, &bytes(b"CONNECTION_ACCEPT")),
                Route::AuthenticationShortcut
            );
        }
    }

    #[test]
    fn late_data_is_records() {
        assert_eq!(
            route(Role::Responder, Phase::HistorySent, &bytes(b"rec")),
            Route::Records(b"rec".to_vec())
        );
    }

    #[test]
    fn idle_ignores_everything() {
        assert_eq!(
            route(Role::Initiator, Phase::Idle, &bytes(b"CONNECTION_ACCEPT")),
            Route::Ignore
        );
    }
}
