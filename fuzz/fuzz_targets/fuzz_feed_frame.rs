#![no_main]

use guess_lobby_client::protocol::FeedFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(FeedFrame::Snapshot(state)) = FeedFrame::parse(text) {
        // Anything the server pushes must survive normalization and projection.
        let state = state.normalized();
        let _ = guess_lobby_client::view::project(&state, chrono::Utc::now());
    }
});
