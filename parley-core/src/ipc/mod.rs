//! Types crossing from the session to its host (UI, CLI, or bindings).
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever event bus it uses.

pub mod events;
