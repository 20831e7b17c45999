pub mod state;
pub mod store;

pub use state::{GameState, GameStatePatch, InteractionEvent, InteractionOutcome, PlayLogEntry, Possession};
pub use store::{GameStore, StoreChange, StoreView, SubscriptionId};
