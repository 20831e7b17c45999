// Resync client: one-shot REST snapshot of the server's game status.
//
// Used whenever the stream (re)opens to realign the store with the server.
// Failures are reported to the caller and never retried here; the next
// reconnect cycle asks again.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::game::{GameState, GameStatePatch, Possession};

#[derive(Debug, Error)]
pub enum ResyncError {
    #[error("status request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("status endpoint returned {0}")]
    Status(StatusCode),
}

/// Body of `GET /api/simulation/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub is_running: bool,
    pub current_quarter: u32,
    pub time_left: String,
    pub home_score: u32,
    pub away_score: u32,
    pub possession: Possession,
    pub down: u8,
    pub distance: u32,
    pub yard_line: u8,
}

impl GameStatus {
    /// The status as a full-field patch for
    /// [`GameStore::update_game_state`](crate::game::GameStore::update_game_state).
    /// Fatigue is not part of the snapshot and is left as is.
    pub fn to_patch(&self) -> GameStatePatch {
        GameStatePatch {
            home_score: Some(self.home_score),
            away_score: Some(self.away_score),
            quarter: Some(self.current_quarter),
            time_left: Some(self.time_left.clone()),
            possession: Some(self.possession),
            down: Some(self.down),
            distance: Some(self.distance),
            yard_line: Some(self.yard_line),
            player_fatigue: None,
        }
    }

    /// The snapshot as a patch against a store that kept streaming while the
    /// request was in flight.
    ///
    /// `baseline` is the game state when the snapshot was requested and
    /// `current` the state now. Any field that live frames moved in between
    /// is left out, since the stream is newer than the snapshot. Scores are
    /// also never lowered.
    pub fn reconcile(&self, baseline: &GameState, current: &GameState) -> GameStatePatch {
        fn unmoved<T: PartialEq>(baseline: &T, current: &T, value: T) -> Option<T> {
            (baseline == current).then_some(value)
        }

        GameStatePatch {
            home_score: unmoved(
                &baseline.home_score,
                &current.home_score,
                self.home_score.max(current.home_score),
            ),
            away_score: unmoved(
                &baseline.away_score,
                &current.away_score,
                self.away_score.max(current.away_score),
            ),
            quarter: unmoved(&baseline.quarter, &current.quarter, self.current_quarter),
            time_left: unmoved(&baseline.time_left, &current.time_left, self.time_left.clone()),
            possession: unmoved(&baseline.possession, &current.possession, self.possession),
            down: unmoved(&baseline.down, &current.down, self.down),
            distance: unmoved(&baseline.distance, &current.distance, self.distance),
            yard_line: unmoved(&baseline.yard_line, &current.yard_line, self.yard_line),
            player_fatigue: None,
        }
    }
}

/// Anything that can produce an authoritative status snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<GameStatus, ResyncError>;
}

/// HTTP snapshot client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ResyncClient {
    http: reqwest::Client,
    status_url: String,
}

impl ResyncClient {
    pub fn new(status_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            status_url: status_url.into(),
        }
    }

    /// Use a preconfigured HTTP client (timeouts, proxy settings).
    pub fn with_client(http: reqwest::Client, status_url: impl Into<String>) -> Self {
        Self {
            http,
            status_url: status_url.into(),
        }
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }
}

#[async_trait]
impl SnapshotSource for ResyncClient {
    async fn fetch_snapshot(&self) -> Result<GameStatus, ResyncError> {
        let response = self.http.get(&self.status_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResyncError::Status(status));
        }
        let snapshot: GameStatus = response.json().await?;
        debug!(
            running = snapshot.is_running,
            quarter = snapshot.current_quarter,
            "Fetched status snapshot"
        );
        Ok(snapshot)
    }
}
