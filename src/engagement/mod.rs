//! 互动层：候选拉取与互动计划

pub mod planner;

pub use planner::{fetch_candidates, Candidate, EngagementPlan, EngagementPlanner, PlannedAction};
