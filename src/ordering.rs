//! # Item Ordering Module
//!
//! Keeps the `order` of items inside each service a dense `0..N-1` sequence,
//! including when an item moves from one service to another.
//!
//! The maintainer only plans [`OrderOp`] batches; the store applies each batch
//! in a single transaction so no reader ever sees a half-renumbered service.
//!
//! Plans are made from reads taken before that transaction. Every batch
//! starts with guards restating what the plan assumed (the membership of the
//! service, or the position of the moved item), and slots that depend on the
//! size of a service are resolved by the store under lock. A guard that no
//! longer holds aborts the batch with a retryable storage error.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::planning_errors::{PlanningError, PlanningResult};
use crate::planning_model::{Item, NewItem};
use crate::store::{clamp_target, ItemRepo, OrderOp};

/// Plans and applies order-preserving item mutations
#[derive(Clone)]
pub struct OrderMaintainer {
    store: Arc<dyn ItemRepo>,
}

impl OrderMaintainer {
    pub fn new(store: Arc<dyn ItemRepo>) -> Self {
        Self { store }
    }

    /// Renumber a service to follow `ordered_item_ids`
    ///
    /// The ids must be exactly the current members of the service, each once.
    /// Anything else is rejected with [`PlanningError::MembershipMismatch`]
    /// before any write.
    pub async fn reorder(&self, service_id: i64, ordered_item_ids: &[i64]) -> PlanningResult<()> {
        self.ensure_service(service_id).await?;

        let members = self.store.list_service_items(service_id).await?;
        validate_membership(service_id, &members, ordered_item_ids)?;

        let ops = plan_reorder(service_id, ordered_item_ids);
        self.store.apply_order_ops(&ops).await?;

        info!(service_id, items = ordered_item_ids.len(), "Reordered service");
        Ok(())
    }

    /// Move an item to `target_service_id` at `target_order`
    ///
    /// Without a target order the item is appended. The target order is
    /// clamped to the size of the destination when the move applies.
    pub async fn move_item(
        &self,
        item_id: i64,
        target_service_id: i64,
        target_order: Option<i32>,
    ) -> PlanningResult<()> {
        let item = self
            .store
            .find_item(item_id)
            .await?
            .ok_or_else(|| PlanningError::NotFound(format!("item {item_id}")))?;
        self.ensure_service(target_service_id).await?;

        if item.service_id == target_service_id {
            let members = self.store.list_service_items(target_service_id).await?;
            let ops = plan_move_within(&item, &members, target_order);
            self.store.apply_order_ops(&ops).await?;

            debug!(item_id, service_id = target_service_id, ?target_order, "Moved item within service");
            return Ok(());
        }

        let ops = plan_move_across(&item, target_service_id, target_order);
        self.store.apply_order_ops(&ops).await?;

        info!(
            item_id,
            from_service = item.service_id,
            to_service = target_service_id,
            ?target_order,
            "Moved item across services"
        );
        Ok(())
    }

    /// Append a new item at the end of a service
    pub async fn append_item(&self, service_id: i64, item: &NewItem) -> PlanningResult<Item> {
        self.ensure_service(service_id).await?;

        let created = self.store.append_item(service_id, item).await?;
        debug!(item_id = created.id, service_id, order = created.order, "Appended item");
        Ok(created)
    }

    /// Delete an item and close the gap it leaves in its service
    pub async fn remove_item(&self, item_id: i64) -> PlanningResult<()> {
        let item = self
            .store
            .find_item(item_id)
            .await?
            .ok_or_else(|| PlanningError::NotFound(format!("item {item_id}")))?;

        let ops = plan_remove(&item);
        self.store.apply_order_ops(&ops).await?;

        info!(item_id, service_id = item.service_id, "Removed item");
        Ok(())
    }

    async fn ensure_service(&self, service_id: i64) -> PlanningResult<()> {
        if self.store.service_exists(service_id).await? {
            Ok(())
        } else {
            Err(PlanningError::NotFound(format!("service {service_id}")))
        }
    }
}

/// Check that `ordered_item_ids` lists every member of the service exactly once
pub fn validate_membership(
    service_id: i64,
    members: &[Item],
    ordered_item_ids: &[i64],
) -> PlanningResult<()> {
    let requested: HashSet<i64> = ordered_item_ids.iter().copied().collect();
    if requested.len() != ordered_item_ids.len() {
        warn!(service_id, "Reorder request contains duplicate item ids");
        return Err(PlanningError::MembershipMismatch(format!(
            "duplicate item ids for service {service_id}"
        )));
    }

    let current: HashSet<i64> = members.iter().map(|item| item.id).collect();
    if requested != current {
        let missing = current.difference(&requested).count();
        let foreign = requested.difference(&current).count();
        warn!(service_id, missing, foreign, "Reorder request does not match service membership");
        return Err(PlanningError::MembershipMismatch(format!(
            "service {service_id} has {} items, request lists {} ({missing} missing, {foreign} foreign)",
            current.len(),
            requested.len()
        )));
    }

    Ok(())
}

/// Guard the membership, then number the items in sequence
pub fn plan_reorder(service_id: i64, item_ids: &[i64]) -> Vec<OrderOp> {
    let mut ops = Vec::with_capacity(item_ids.len() + 1);
    ops.push(OrderOp::ExpectMembers {
        service_id,
        item_ids: item_ids.to_vec(),
    });
    ops.extend(item_ids.iter().zip(0..).map(|(&item_id, order)| OrderOp::Assign {
        service_id,
        item_id,
        order,
    }));
    ops
}

/// Splice the item into its own service's membership and renumber everything
pub fn plan_move_within(item: &Item, members: &[Item], target_order: Option<i32>) -> Vec<OrderOp> {
    let mut ids: Vec<i64> = members
        .iter()
        .filter(|member| member.id != item.id)
        .map(|member| member.id)
        .collect();

    let position = clamp_target(target_order, ids.len()) as usize;
    ids.insert(position, item.id);

    plan_reorder(item.service_id, &ids)
}

/// Close the gap in the source, then place the item in the destination
pub fn plan_move_across(item: &Item, target_service_id: i64, target_order: Option<i32>) -> Vec<OrderOp> {
    vec![
        OrderOp::ExpectPosition {
            item_id: item.id,
            service_id: item.service_id,
            order: item.order,
        },
        OrderOp::CloseGap {
            service_id: item.service_id,
            after: item.order,
        },
        OrderOp::Place {
            item_id: item.id,
            service_id: target_service_id,
            order: target_order,
        },
    ]
}

/// Delete the item and close the gap it leaves
pub fn plan_remove(item: &Item) -> Vec<OrderOp> {
    vec![
        OrderOp::ExpectPosition {
            item_id: item.id,
            service_id: item.service_id,
            order: item.order,
        },
        OrderOp::Remove {
            item_id: item.id,
            service_id: item.service_id,
        },
        OrderOp::CloseGap {
            service_id: item.service_id,
            after: item.order,
        },
    ]
}
