#![no_main]

use guess_lobby_client::protocol::LobbyState;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw-byte path, including serde_json's own UTF-8 validation.
    if let Ok(state) = serde_json::from_slice::<LobbyState>(data) {
        if let Some(deadline) = state.active_deadline() {
            let _ = guess_lobby_client::view::format_countdown(deadline, chrono::Utc::now());
        }
        let _ = serde_json::to_string(&state);
    }
});
