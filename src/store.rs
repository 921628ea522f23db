//! # Store Traits
//!
//! Narrow storage interfaces consumed by the planning engine. Each trait
//! covers one concern; `PlanningStore` combines them for the planner.
//! Implementations: [`crate::db::PgPlanningStore`] and
//! [`crate::memory_store::MemoryPlanningStore`].

use async_trait::async_trait;

use crate::planning_errors::PlanningResult;
use crate::planning_model::{
    GeneratedIngredient, Ingredient, IngredientCacheEntry, Item, NewItem, PlannedItem, SourceRef,
};

/// One step of an order update batch
///
/// A batch is applied atomically: either every step takes effect or none.
/// Stores apply a batch only after locking every service it touches, so the
/// `Expect*` guards and the order computed by `Place` see the state the
/// following steps write to. A failed guard aborts the batch with a retryable
/// [`PlanningError::Storage`](crate::planning_errors::PlanningError::Storage).
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOp {
    /// Fail unless the service holds exactly these items
    ExpectMembers { service_id: i64, item_ids: Vec<i64> },
    /// Fail unless the item sits in the service at the given order
    ExpectPosition {
        item_id: i64,
        service_id: i64,
        order: i32,
    },
    /// Set the order of an item that stays in `service_id`
    Assign {
        service_id: i64,
        item_id: i64,
        order: i32,
    },
    /// Decrement the order of every item in the service whose order exceeds `after`
    CloseGap { service_id: i64, after: i32 },
    /// Put an item into a service, shifting the items at or after its slot
    ///
    /// The slot is computed when the step runs: `None` appends, other values
    /// are clamped to the current size of the service.
    Place {
        item_id: i64,
        service_id: i64,
        order: Option<i32>,
    },
    /// Delete an item (and its ingredients) from its service
    Remove { item_id: i64, service_id: i64 },
}

impl OrderOp {
    pub fn service_id(&self) -> i64 {
        match self {
            OrderOp::ExpectMembers { service_id, .. }
            | OrderOp::ExpectPosition { service_id, .. }
            | OrderOp::Assign { service_id, .. }
            | OrderOp::CloseGap { service_id, .. }
            | OrderOp::Place { service_id, .. }
            | OrderOp::Remove { service_id, .. } => *service_id,
        }
    }
}

/// Clamp a requested position into `0..=len`; `None` appends
pub fn clamp_target(target_order: Option<i32>, len: usize) -> i32 {
    let len = i32::try_from(len).unwrap_or(i32::MAX);
    target_order.map_or(len, |order| order.clamp(0, len))
}

/// Services touched by a batch, ascending and without duplicates
///
/// Stores lock services in this order so crossing moves cannot deadlock.
pub fn touched_services(ops: &[OrderOp]) -> Vec<i64> {
    let mut services: Vec<i64> = ops.iter().map(OrderOp::service_id).collect();
    services.sort_unstable();
    services.dedup();
    services
}

/// Item reads and order-preserving writes
#[async_trait]
pub trait ItemRepo: Send + Sync {
    async fn find_item(&self, item_id: i64) -> PlanningResult<Option<Item>>;

    async fn service_exists(&self, service_id: i64) -> PlanningResult<bool>;

    /// Items of a service sorted by order
    async fn list_service_items(&self, service_id: i64) -> PlanningResult<Vec<Item>>;

    /// Apply a batch of order operations in one transaction
    async fn apply_order_ops(&self, ops: &[OrderOp]) -> PlanningResult<()>;

    /// Insert an item at the end of its service; the order is computed under lock
    async fn append_item(&self, service_id: i64, item: &NewItem) -> PlanningResult<Item>;
}

/// Ingredient rows owned by items
#[async_trait]
pub trait IngredientRepo: Send + Sync {
    /// Delete the item's ingredients and insert the new set in list order
    async fn replace_item_ingredients(
        &self,
        item_id: i64,
        ingredients: &[GeneratedIngredient],
    ) -> PlanningResult<Vec<Ingredient>>;

    /// Ingredients of an item sorted by order
    async fn list_item_ingredients(&self, item_id: i64) -> PlanningResult<Vec<Ingredient>>;

    /// Set the checked flag of every listed source in one transaction
    async fn set_checked(&self, sources: &[SourceRef], checked: bool) -> PlanningResult<()>;
}

/// Shared ingredient cache entries
#[async_trait]
pub trait CacheRepo: Send + Sync {
    async fn find_cache_entry(
        &self,
        dish_key: &str,
        serving_count: i32,
    ) -> PlanningResult<Option<IngredientCacheEntry>>;

    /// Insert or overwrite the entry for its (dish key, serving count)
    async fn upsert_cache_entry(&self, entry: &IngredientCacheEntry) -> PlanningResult<()>;
}

/// Read-only snapshot used to build shopping lists
#[async_trait]
pub trait ShoppingRepo: Send + Sync {
    /// Items assigned to the person with their ingredients and provenance
    async fn list_person_items(&self, person_id: i64) -> PlanningResult<Vec<PlannedItem>>;
}

/// Every storage concern the planner needs
pub trait PlanningStore: ItemRepo + IngredientRepo + CacheRepo + ShoppingRepo {}

impl<T> PlanningStore for T where T: ItemRepo + IngredientRepo + CacheRepo + ShoppingRepo {}
