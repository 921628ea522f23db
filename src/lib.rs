//! # Meal Planning Engine
//!
//! Planning and shopping consolidation for collaborative meal planning:
//! dense item ordering inside services, a confirmation-based cache in front
//! of the ingredient generator, and per-person shopping list aggregation.

pub mod config;
pub mod db;
pub mod generator;
pub mod ingredient_cache;
pub mod memory_store;
pub mod ordering;
pub mod planner;
pub mod planning_errors;
pub mod planning_model;
pub mod quantity;
pub mod shopping_list;
pub mod store;
