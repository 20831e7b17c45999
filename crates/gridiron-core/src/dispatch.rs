// Message dispatcher: decode one inbound frame and apply it to the store.
//
// A bad frame never escapes this module as an error; it is logged and
// reported back as `Dispatched::Dropped` so the connection keeps running.

use tracing::{debug, warn};

use crate::game::GameStore;
use crate::protocol::{self, DecodeError, Inbound};

/// What happened to a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    GameUpdated,
    /// `appended` is false when the play was a redelivered duplicate.
    PlayAdded { appended: bool },
    SecondaryUpdated { bucket: String },
    Heartbeat,
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    UnknownType(String),
}

/// Decode `frame` and run the store operation bound to its type.
///
/// The store mutation and its subscriber notifications have completed by the
/// time this returns.
pub fn dispatch(store: &mut GameStore, frame: &[u8]) -> Dispatched {
    let inbound = match protocol::decode(frame) {
        Ok(inbound) => inbound,
        Err(e) => {
            log_decode_failure(&e, frame);
            return Dispatched::Dropped(DropReason::Malformed);
        }
    };

    match inbound {
        Inbound::GameUpdate(patch) => {
            store.update_game_state(patch);
            Dispatched::GameUpdated
        }
        Inbound::PlayResult(entry) => {
            let appended = store.add_play(entry);
            Dispatched::PlayAdded { appended }
        }
        Inbound::EngineUpdate(update) => {
            store.update_secondary_data(&update.bucket, update.data);
            Dispatched::SecondaryUpdated {
                bucket: update.bucket,
            }
        }
        Inbound::Pong => {
            debug!("Heartbeat acknowledged");
            Dispatched::Heartbeat
        }
        Inbound::Unknown { kind } => {
            warn!("Dropping frame with unknown type {kind:?}");
            Dispatched::Dropped(DropReason::UnknownType(kind))
        }
    }
}

fn log_decode_failure(error: &DecodeError, frame: &[u8]) {
    const PREVIEW: usize = 200;
    let text = String::from_utf8_lossy(frame);
    let preview: String = text.chars().take(PREVIEW).collect();
    warn!("Dropping undecodable frame: {error} (frame: {preview})");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameState;
    use serde_json::json;

    #[test]
    fn scoring_drive_scenario() {
        let mut store = GameStore::new();

        assert_eq!(
            dispatch(
                &mut store,
                br#"{"type":"GAME_UPDATE","payload":{"homeScore":3,"quarter":1,"timeLeft":"10:00"}}"#
            ),
            Dispatched::GameUpdated
        );
        assert_eq!(
            dispatch(
                &mut store,
                br#"{"type":"PLAY_RESULT","payload":{"yards_gained":7,"description":"TOUCHDOWN!"}}"#
            ),
            Dispatched::PlayAdded { appended: true }
        );
        assert_eq!(
            dispatch(&mut store, br#"{"type":"GAME_UPDATE","payload":{"homeScore":7}}"#),
            Dispatched::GameUpdated
        );

        let game = store.game();
        assert_eq!(game.home_score, 7);
        assert_eq!(game.quarter, 1);
        assert_eq!(game.time_left, "10:00");
        assert_eq!(store.play_count(), 1);
        assert_eq!(store.play_log()[0].description, "TOUCHDOWN!");
    }

    #[test]
    fn engine_update_fills_named_bucket() {
        let mut store = GameStore::new();
        let outcome = dispatch(
            &mut store,
            br#"{"type":"ENGINE_UPDATE","payload":{"bucket":"drive_chart","data":{"plays":4}}}"#,
        );
        assert_eq!(
            outcome,
            Dispatched::SecondaryUpdated {
                bucket: "drive_chart".into()
            }
        );
        assert_eq!(store.secondary("drive_chart"), Some(&json!({"plays": 4})));
    }

    #[test]
    fn pong_has_no_state_effect() {
        let mut store = GameStore::new();
        assert_eq!(
            dispatch(&mut store, br#"{"type":"PONG","payload":{}}"#),
            Dispatched::Heartbeat
        );
        assert_eq!(store.game(), &GameState::default());
        assert!(store.updated_at().is_none());
    }

    #[test]
    fn bad_frames_are_dropped_without_touching_state() {
        let mut store = GameStore::new();
        dispatch(&mut store, br#"{"type":"GAME_UPDATE","payload":{"awayScore":6}}"#);
        let before = store.game().clone();

        let frames: [&[u8]; 5] = [
            b"",
            b"not json at all",
            br#"{"payload":{"homeScore":99}}"#,
            br#"{"type":"GAME_UPDATE","payload":{"homeScore":"lots"}}"#,
            br#"{"type":"PLAY_RESULT","payload":"oops"}"#,
        ];
        for frame in frames {
            assert_eq!(
                dispatch(&mut store, frame),
                Dispatched::Dropped(DropReason::Malformed)
            );
        }

        assert_eq!(store.game(), &before);
        assert_eq!(store.play_count(), 0);
    }

    #[test]
    fn unknown_type_is_dropped() {
        let mut store = GameStore::new();
        assert_eq!(
            dispatch(&mut store, br#"{"type":"DRAFT_PICK","payload":{"round":1}}"#),
            Dispatched::Dropped(DropReason::UnknownType("DRAFT_PICK".into()))
        );
        assert!(store.updated_at().is_none());
    }

    #[test]
    fn redelivered_play_reports_not_appended() {
        let mut store = GameStore::new();
        let frame = br#"{"type":"PLAY_RESULT","payload":{"play_id":"p-44","yards_gained":12}}"#;
        assert_eq!(dispatch(&mut store, frame), Dispatched::PlayAdded { appended: true });
        assert_eq!(dispatch(&mut store, frame), Dispatched::PlayAdded { appended: false });
        assert_eq!(store.play_count(), 1);
    }

    #[test]
    fn n_play_results_give_n_entries_newest_first() {
        let mut store = GameStore::new();
        for n in 0..12 {
            let frame = format!(
                r#"{{"type":"PLAY_RESULT","payload":{{"yards_gained":{n},"description":"play {n}"}}}}"#
            );
            dispatch(&mut store, frame.as_bytes());
            assert_eq!(store.play_count(), n as usize + 1);
            assert_eq!(store.play_log()[0].yards_gained, n);
        }
    }
}
