/// Caller-supplied roster entries.
pub mod player;
/// Input validation helpers.
pub mod validation;
