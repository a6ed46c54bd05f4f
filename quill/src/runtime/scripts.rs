use once_cell::sync::Lazy;
use redis::Script;

pub const APPLY_PLAN_SCRIPT_BODY: &str = include_str!("../../lua/apply_plan.lua");

pub static APPLY_PLAN_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(APPLY_PLAN_SCRIPT_BODY));
