/// Events emitted by the engine and the hub delivering them.
pub mod events;
/// Match state model: players, round history, tie-breaks.
pub mod game;
/// Phase state machine.
pub mod phase;
/// Game preferences and application settings.
pub mod preferences;
/// Score sheets and the win condition.
pub mod scoring;
