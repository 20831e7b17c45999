// Game state store: the single owner of the live scoreboard and play log.
//
// All mutation goes through the methods below. Subscribers are plain
// callbacks invoked synchronously, in registration order, after each mutation
// has fully completed.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::state::{GameState, GameStatePatch, PlayLogEntry};

/// What a mutation changed. Passed to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    GameUpdated,
    PlayAdded,
    SecondaryUpdated { bucket: String },
    Reset,
}

/// Handle returned by [`GameStore::subscribe`]; pass it to
/// [`GameStore::unsubscribe`] to stop receiving notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Read-only view handed to subscribers.
#[derive(Debug, Clone, Copy)]
pub struct StoreView<'a> {
    pub game: &'a GameState,
    /// Most recent play first.
    pub play_log: &'a VecDeque<PlayLogEntry>,
    pub secondary: &'a HashMap<String, Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub type Subscriber = Box<dyn FnMut(&StoreChange, StoreView<'_>) + Send>;

#[derive(Default)]
pub struct GameStore {
    game: GameState,
    play_log: VecDeque<PlayLogEntry>,
    /// `play_id`s already in `play_log`; cleared on reset.
    seen_play_ids: HashSet<String>,
    secondary: HashMap<String, Value>,
    updated_at: Option<DateTime<Utc>>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl GameStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Reads ---

    pub fn game(&self) -> &GameState {
        &self.game
    }

    /// The play log, most recent play first.
    pub fn play_log(&self) -> &VecDeque<PlayLogEntry> {
        &self.play_log
    }

    pub fn play_count(&self) -> usize {
        self.play_log.len()
    }

    pub fn secondary(&self, bucket: &str) -> Option<&Value> {
        self.secondary.get(bucket)
    }

    /// When the last mutation was applied, `None` for a fresh or reset store.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn view(&self) -> StoreView<'_> {
        StoreView {
            game: &self.game,
            play_log: &self.play_log,
            secondary: &self.secondary,
            updated_at: self.updated_at,
        }
    }

    // --- Subscriptions ---

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&StoreChange, StoreView<'_>) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Returns `false` if the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // --- Mutations ---

    /// Shallow-merge `patch` into the game state.
    ///
    /// Nothing is rejected: a score that goes backwards is applied as sent
    /// and logged.
    pub fn update_game_state(&mut self, patch: GameStatePatch) {
        if patch.home_score.is_some_and(|s| s < self.game.home_score)
            || patch.away_score.is_some_and(|s| s < self.game.away_score)
        {
            warn!(
                "Score regression from server: {}-{} -> {:?}-{:?}",
                self.game.home_score, self.game.away_score, patch.home_score, patch.away_score
            );
        }
        self.game.apply(patch);
        self.touch_and_notify(StoreChange::GameUpdated);
    }

    /// Prepend a play to the log.
    ///
    /// Returns `false` (and leaves the store untouched) when the play carries a
    /// `play_id` that is already in the log.
    pub fn add_play(&mut self, entry: PlayLogEntry) -> bool {
        if let Some(id) = &entry.play_id {
            if !self.seen_play_ids.insert(id.clone()) {
                debug!("Dropping duplicate play {id}");
                return false;
            }
        }
        self.play_log.push_front(entry);
        self.touch_and_notify(StoreChange::PlayAdded);
        true
    }

    /// Replace a secondary data bucket wholesale.
    pub fn update_secondary_data(&mut self, bucket: &str, data: Value) {
        self.secondary.insert(bucket.to_string(), data);
        self.touch_and_notify(StoreChange::SecondaryUpdated {
            bucket: bucket.to_string(),
        });
    }

    /// Restore the default game state and clear the play log and all
    /// secondary buckets. Subscriptions survive a reset.
    pub fn reset(&mut self) {
        self.game = GameState::default();
        self.play_log.clear();
        self.seen_play_ids.clear();
        self.secondary.clear();
        self.updated_at = None;
        self.notify(StoreChange::Reset);
    }

    fn touch_and_notify(&mut self, change: StoreChange) {
        self.updated_at = Some(Utc::now());
        self.notify(change);
    }

    fn notify(&mut self, change: StoreChange) {
        let view = StoreView {
            game: &self.game,
            play_log: &self.play_log,
            secondary: &self.secondary,
            updated_at: self.updated_at,
        };
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&change, view);
        }
    }
}

impl std::fmt::Debug for GameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameStore")
            .field("game", &self.game)
            .field("plays", &self.play_log.len())
            .field("secondary_buckets", &self.secondary.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
