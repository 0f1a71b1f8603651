//! Presentation projection of the lobby state.
//!
//! Nothing here is stored: [`project`] is recomputed from the current
//! [`LobbyState`] on every state change and on every clock tick.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{LobbyState, RoomStatus};

/// Read-only view of the lobby for the banner and the rest of the UI.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LobbyView {
    pub status: RoomStatus,
    pub code: String,
    /// `"<m> min <s> s"` while a timer runs, empty otherwise.
    pub time_left_formatted: String,
    pub round_number: Option<u32>,
    pub question: String,
    pub character_name: String,
    pub character_image: Option<String>,
    pub guesses_submitted: u32,
    pub guesses_needed: u32,
}

/// Whole seconds left until `deadline`, never negative.
pub fn seconds_remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((deadline - now).num_seconds()).unwrap_or(0)
}

/// Format the time left until `deadline` as `"<m> min <s> s"`.
///
/// ```
/// use chrono::{Duration, Utc};
/// use guess_lobby_client::view::format_countdown;
///
/// let now = Utc::now();
/// assert_eq!(format_countdown(now + Duration::seconds(63), now), "1 min 3 s");
/// assert_eq!(format_countdown(now - Duration::seconds(5), now), "0 min 0 s");
/// ```
pub fn format_countdown(deadline: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let total = seconds_remaining(deadline, now);
    format!("{} min {} s", total / 60, total % 60)
}

/// Project `state` as seen at `now`.
pub fn project(state: &LobbyState, now: DateTime<Utc>) -> LobbyView {
    let round = match state.status {
        RoomStatus::InProgress => state.current_round.as_ref(),
        _ => None,
    };

    LobbyView {
        status: state.status,
        code: state.code.clone(),
        time_left_formatted: state
            .active_deadline()
            .map(|deadline| format_countdown(deadline, now))
            .unwrap_or_default(),
        round_number: round.map(|r| r.round_number),
        question: round.map(|r| r.question.clone()).unwrap_or_default(),
        character_name: state
            .my_character
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_default(),
        character_image: state.my_character.as_ref().and_then(|c| c.image.clone()),
        guesses_submitted: state.guesses_submitted,
        guesses_needed: state.guesses_needed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::{Character, CurrentRound};
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn countdown_formats_minutes_and_seconds() {
        assert_eq!(format_countdown(at(63), at(0)), "1 min 3 s");
        assert_eq!(format_countdown(at(600), at(0)), "10 min 0 s");
        assert_eq!(format_countdown(at(59), at(0)), "0 min 59 s");
    }

    #[test]
    fn countdown_never_goes_negative() {
        assert_eq!(format_countdown(at(0), at(1)), "0 min 0 s");
        assert_eq!(format_countdown(at(0), at(3_600)), "0 min 0 s");
        assert_eq!(seconds_remaining(at(0), at(90)), 0);
    }

    #[test]
    fn partial_seconds_round_down() {
        let deadline = at(10);
        let now = at(0) + Duration::milliseconds(300);
        assert_eq!(format_countdown(deadline, now), "0 min 9 s");
    }

    #[test]
    fn in_progress_view_shows_round() {
        let state = LobbyState {
            status: RoomStatus::InProgress,
            code: "ABCDEF".into(),
            current_round: Some(CurrentRound {
                round_number: 2,
                question: "Is your character a wizard?".into(),
                end_time: Some(at(75)),
            }),
            my_character: Some(Character {
                name: "Gandalf".into(),
                image: Some("/media/gandalf.png".into()),
            }),
            ..LobbyState::default()
        };

        let view = project(&state, at(0));
        assert_eq!(view.time_left_formatted, "1 min 15 s");
        assert_eq!(view.question, "Is your character a wizard?");
        assert_eq!(view.round_number, Some(2));
        assert_eq!(view.character_name, "Gandalf");
        assert_eq!(view.character_image.as_deref(), Some("/media/gandalf.png"));
    }

    #[test]
    fn guessing_view_counts_down_to_deadline() {
        let state = LobbyState {
            status: RoomStatus::Guessing,
            code: "ABCDEF".into(),
            guess_deadline: Some(at(30)),
            guesses_submitted: 1,
            guesses_needed: 3,
            ..LobbyState::default()
        };

        let view = project(&state, at(0));
        assert_eq!(view.time_left_formatted, "0 min 30 s");
        assert!(view.question.is_empty());
        assert_eq!((view.guesses_submitted, view.guesses_needed), (1, 3));
    }

    #[test]
    fn empty_state_falls_back_to_blanks() {
        let view = project(&LobbyState::default(), at(0));
        assert_eq!(view.status, RoomStatus::JoinCreate);
        assert!(view.time_left_formatted.is_empty());
        assert!(view.question.is_empty());
        assert!(view.character_name.is_empty());
        assert!(view.character_image.is_none());
    }

    #[test]
    fn ticking_recomputes_from_the_same_state() {
        let state = LobbyState {
            status: RoomStatus::Guessing,
            guess_deadline: Some(at(2)),
            ..LobbyState::default()
        };
        let texts: Vec<String> = (0..4)
            .map(|t| project(&state, at(t)).time_left_formatted)
            .collect();
        assert_eq!(texts, ["0 min 2 s", "0 min 1 s", "0 min 0 s", "0 min 0 s"]);
    }
}
