//! JSON-RPC framing scenarios: batch-with-notification (S2) and the two
//! malformed-input scenarios (S3/S4 share ground here with the parser
//! itself; S3's method-not-found is exercised in dispatch_scenarios.rs).

use nano_gateway::protocol::{Frame, JsonRpcError, JsonRpcMessage, RequestId};

#[test]
fn s2_batch_with_notification_yields_exactly_one_addressable_request() {
    let bytes = br#"[
        {"jsonrpc":"2.0","id":10,"method":"is_running","params":{"handle_id":1}},
        {"jsonrpc":"2.0","method":"abort","params":{"handle_id":1}}
    ]"#;
    let frame = nano_gateway::protocol::parse_frame(bytes).unwrap();
    let requests = frame.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id, RequestId::Number(10));
    assert_eq!(requests[0].method, "is_running");

    match &frame {
        Frame::Batch(messages) => {
            assert_eq!(messages.len(), 2);
            assert!(matches!(messages[1], JsonRpcMessage::Notification(_)));
        }
        Frame::Single(_) => panic!("expected a batch"),
    }
}

#[test]
fn s4_parse_error_on_malformed_json() {
    let err = nano_gateway::protocol::parse_frame(b"{bad json").unwrap_err();
    assert_eq!(err.error_code(), JsonRpcError::PARSE_ERROR);
}

#[test]
fn invariant_6_batch_response_ids_are_distinct_and_bounded_by_n() {
    let bytes = br#"[
        {"jsonrpc":"2.0","id":1,"method":"is_running","params":{"handle_id":1}},
        {"jsonrpc":"2.0","method":"log","params":{}},
        {"jsonrpc":"2.0","id":2,"method":"abort","params":{"handle_id":1}},
        {"jsonrpc":"2.0","method":"log","params":{}}
    ]"#;
    let frame = nano_gateway::protocol::parse_frame(bytes).unwrap();
    let requests = frame.requests();
    assert!(requests.len() <= 4);
    assert_eq!(requests.len(), 2);
    let ids: Vec<&RequestId> = requests.iter().map(|r| &r.id).collect();
    assert_ne!(ids[0], ids[1]);
}
