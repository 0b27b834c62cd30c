//! Multi-stakeholder fairness-aware re-ranking.
//!
//! Each round, a base recommender's list is rescored by every fairness
//! agent, an allocation mechanism weights the agents by how fair the recent
//! history has been to them, and a choice mechanism merges the weighted
//! lists into the final list that is appended to the history.

pub mod agent;
pub mod allocation;
pub mod analysis;
pub mod choice;
pub mod compatibility;
pub mod config;
pub mod context;
pub mod data;
pub mod engine;
pub mod error;
pub mod fairness;
pub mod history;
pub mod kernel;
pub mod manager;
pub mod preference;
pub mod properties;
pub mod registry;
pub mod results;
pub mod stats;
