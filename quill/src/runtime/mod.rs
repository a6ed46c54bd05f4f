//! Lua-scripted plan execution for the Redis store.

pub mod commands;
pub mod executor;
pub mod scripts;

pub use commands::{PlanPayload, build_plan_payload};
pub use executor::{ScriptChange, ScriptResponse, execute_plan};
