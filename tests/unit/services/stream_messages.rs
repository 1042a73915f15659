//! Unit tests for the provider wire protocol

use scantrix::services::stream::messages::{
    auth_frame, parse_frame, subscribe_frame, unsubscribe_frame, ProviderEvent, StatusCode,
};

#[test]
fn parses_a_mixed_event_frame() {
    let frame = r#"[
        {"ev":"status","status":"auth_success","message":"authenticated"},
        {"ev":"trade","symbol":"AAA","price":101.5,"size":200.0,"timestamp":1709560800000},
        {"ev":"quote","symbol":"AAA","bid":101.4,"ask":101.6,"bid_size":10.0,"ask_size":12.0,"timestamp":1709560800001},
        {"ev":"agg","symbol":"AAA","open":100.0,"high":102.0,"low":99.5,"close":101.5,"volume":5000.0,"vwap":100.9,"timestamp":1709560800002}
    ]"#;

    let events = parse_frame(frame).unwrap();
    assert_eq!(events.len(), 4);

    match &events[0] {
        ProviderEvent::Status(status) => {
            assert_eq!(status.status, StatusCode::AuthSuccess);
        }
        other => panic!("expected status event, got {other:?}"),
    }
    match &events[1] {
        ProviderEvent::Trade(trade) => {
            let trade = trade.clone().into_trade();
            assert_eq!(trade.symbol, "AAA");
            assert_eq!(trade.price, 101.5);
        }
        other => panic!("expected trade event, got {other:?}"),
    }
    match &events[3] {
        ProviderEvent::Aggregate(agg) => {
            let bar = agg.clone().into_bar();
            assert_eq!(bar.vwap, Some(100.9));
            assert_eq!(bar.volume, 5000.0);
        }
        other => panic!("expected aggregate event, got {other:?}"),
    }
}

#[test]
fn malformed_elements_are_dropped_not_fatal() {
    let frame = r#"[
        {"ev":"trade","symbol":"AAA","price":101.5,"size":200.0,"timestamp":1709560800000},
        {"ev":"trade","symbol":"BBB"},
        {"what":"even is this"}
    ]"#;
    let events = parse_frame(frame).unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn non_array_frames_are_rejected() {
    assert!(parse_frame(r#"{"ev":"trade"}"#).is_err());
    assert!(parse_frame("not json").is_err());
}

#[test]
fn unknown_status_codes_still_parse() {
    let frame = r#"[{"ev":"status","status":"something_new"}]"#;
    let events = parse_frame(frame).unwrap();
    match &events[0] {
        ProviderEvent::Status(status) => assert_eq!(status.status, StatusCode::Other),
        other => panic!("expected status event, got {other:?}"),
    }
}

#[test]
fn control_frames_have_the_action_params_shape() {
    let auth = auth_frame("secret-key");
    assert!(auth.contains(r#""action":"auth""#));
    assert!(auth.contains("secret-key"));

    let symbols = vec!["AAA".to_string(), "BBB".to_string()];
    let sub = subscribe_frame(&symbols);
    assert!(sub.contains(r#""action":"subscribe""#));
    assert!(sub.contains("AAA,BBB"));

    let unsub = unsubscribe_frame(&symbols);
    assert!(unsub.contains(r#""action":"unsubscribe""#));
}
