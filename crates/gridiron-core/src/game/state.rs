// Game state: scoreboard, clock, field position and the play log records.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Clock value shown at the start of every quarter.
pub const QUARTER_LENGTH: &str = "15:00";

/// Which side has the ball.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Possession {
    #[default]
    Home,
    Away,
}

impl fmt::Display for Possession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Possession::Home => f.write_str("home"),
            Possession::Away => f.write_str("away"),
        }
    }
}

/// The live scoreboard of a single game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub home_score: u32,
    pub away_score: u32,
    /// 1-based quarter number (overtime continues past 4).
    pub quarter: u32,
    /// Game clock as `MM:SS`.
    pub time_left: String,
    pub possession: Possession,
    /// 1..=4.
    pub down: u8,
    /// Yards to go for a first down.
    pub distance: u32,
    /// Field position, 0..=100.
    pub yard_line: u8,
    /// Player id -> fatigue in `[0, 1]`.
    pub player_fatigue: HashMap<String, f64>,
}

impl Default for GameState {
    fn default() -> Self {
        GameState {
            home_score: 0,
            away_score: 0,
            quarter: 1,
            time_left: QUARTER_LENGTH.to_string(),
            possession: Possession::Home,
            down: 1,
            distance: 10,
            yard_line: 25,
            player_fatigue: HashMap::new(),
        }
    }
}

impl GameState {
    /// Shallow-merge every field present in `patch`. Nested values (the
    /// fatigue map) are replaced, not merged.
    pub fn apply(&mut self, patch: GameStatePatch) {
        if let Some(v) = patch.home_score {
            self.home_score = v;
        }
        if let Some(v) = patch.away_score {
            self.away_score = v;
        }
        if let Some(v) = patch.quarter {
            self.quarter = v;
        }
        if let Some(v) = patch.time_left {
            self.time_left = v;
        }
        if let Some(v) = patch.possession {
            self.possession = v;
        }
        if let Some(v) = patch.down {
            self.down = v;
        }
        if let Some(v) = patch.distance {
            self.distance = v;
        }
        if let Some(v) = patch.yard_line {
            self.yard_line = v;
        }
        if let Some(v) = patch.player_fatigue {
            self.player_fatigue = v;
        }
    }

    /// Seconds remaining in the quarter, or `None` if the clock string is not
    /// `MM:SS`.
    pub fn clock_seconds(&self) -> Option<u32> {
        let (minutes, seconds) = self.time_left.split_once(':')?;
        let minutes: u32 = minutes.trim().parse().ok()?;
        let seconds: u32 = seconds.trim().parse().ok()?;
        if seconds >= 60 {
            return None;
        }
        Some(minutes * 60 + seconds)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Q{} {} | HOME {} - {} AWAY | {} & {} at {} | ball: {}",
            self.quarter,
            self.time_left,
            self.home_score,
            self.away_score,
            ordinal(self.down),
            self.distance,
            self.yard_line,
            self.possession
        )
    }
}

fn ordinal(down: u8) -> String {
    let suffix = match down {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    };
    format!("{down}{suffix}")
}

/// Partial `GameState` carried by a `GAME_UPDATE` frame. Absent fields are
/// left untouched by [`GameState::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possession: Option<Possession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yard_line: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_fatigue: Option<HashMap<String, f64>>,
}

// ---------------------------------------------------------------------------
// Play log
// ---------------------------------------------------------------------------

/// Result of one matchup inside a play (block, route, tackle attempt...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOutcome {
    OffenseWin,
    DefenseWin,
    Neutral,
    /// Any classification this client does not know yet.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub outcome: InteractionOutcome,
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub players: Vec<String>,
}

/// One completed play as reported by a `PLAY_RESULT` frame.
///
/// Every field has a default so partially-populated results still decode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayLogEntry {
    /// Stable server identity, used to drop redelivered plays.
    #[serde(default)]
    pub play_id: Option<String>,
    #[serde(default)]
    pub play_type: Option<String>,
    #[serde(default)]
    pub yards_gained: i32,
    #[serde(default)]
    pub is_touchdown: bool,
    #[serde(default)]
    pub is_turnover: bool,
    #[serde(default)]
    pub is_sack: bool,
    #[serde(default)]
    pub is_penalty: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub interaction_events: Vec<InteractionEvent>,
}
