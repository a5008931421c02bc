#![no_main]

use ledger_rpc::{decode_response, unwrap_call_result, RpcError, RpcOutcome};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    for content_type in [Some("application/json"), Some("text/event-stream"), None] {
        match decode_response(&raw, content_type) {
            Ok(envelope) => {
                if let RpcOutcome::Result(result) = envelope.outcome {
                    let _ = unwrap_call_result(result);
                }
            }
            Err(error) => assert!(matches!(error, RpcError::MalformedEnvelope { .. })),
        }
    }
});
