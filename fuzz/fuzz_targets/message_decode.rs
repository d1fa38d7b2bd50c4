//! Fuzz target for `ServerMessage::decode` and `Session::handle_message`
//!
//! Arbitrary bytes are fed to the decoder and to a fresh session. Neither may
//! panic: malformed text is an error for the decoder and a warning for the
//! session.

#![no_main]

use callsig_core::{ServerMessage, Session};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(message) = ServerMessage::decode(text) {
        let encoded = message.encode().unwrap();
        assert!(ServerMessage::decode(&encoded).is_ok());
    }

    let mut session = Session::new();
    session.connect();
    let _ = session.handle_message(text);
    assert!(session.namespaces().next().is_none());
    assert_eq!(session.pending_transactions(), 0);
});
