//! # Ordering Tests
//!
//! Dense ordering of items inside services across reorders, moves, appends
//! and removals, exercised against the in-memory store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mealplan::memory_store::MemoryPlanningStore;
use mealplan::ordering::OrderMaintainer;
use mealplan::planning_errors::{PlanningError, PlanningResult};
use mealplan::planning_model::{Item, NewItem};
use mealplan::store::{ItemRepo, OrderOp};

/// A mutation committed by another request
enum Concurrent {
    Remove(i64),
    Move {
        item_id: i64,
        service_id: i64,
        order: Option<i32>,
    },
    Reorder {
        service_id: i64,
        item_ids: Vec<i64>,
    },
}

/// Store that commits one other mutation between planning and applying
struct InterleavingStore {
    inner: Arc<MemoryPlanningStore>,
    pending: Mutex<Option<Concurrent>>,
}

impl InterleavingStore {
    fn new(inner: Arc<MemoryPlanningStore>, concurrent: Concurrent) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(concurrent)),
        }
    }
}

#[async_trait]
impl ItemRepo for InterleavingStore {
    async fn find_item(&self, item_id: i64) -> PlanningResult<Option<Item>> {
        self.inner.find_item(item_id).await
    }

    async fn service_exists(&self, service_id: i64) -> PlanningResult<bool> {
        self.inner.service_exists(service_id).await
    }

    async fn list_service_items(&self, service_id: i64) -> PlanningResult<Vec<Item>> {
        self.inner.list_service_items(service_id).await
    }

    async fn apply_order_ops(&self, ops: &[OrderOp]) -> PlanningResult<()> {
        let pending = self.pending.lock().unwrap().take();
        if let Some(concurrent) = pending {
            let other = OrderMaintainer::new(self.inner.clone());
            match concurrent {
                Concurrent::Remove(item_id) => other.remove_item(item_id).await?,
                Concurrent::Move {
                    item_id,
                    service_id,
                    order,
                } => other.move_item(item_id, service_id, order).await?,
                Concurrent::Reorder {
                    service_id,
                    item_ids,
                } => other.reorder(service_id, &item_ids).await?,
            }
        }
        self.inner.apply_order_ops(ops).await
    }

    async fn append_item(&self, service_id: i64, item: &NewItem) -> PlanningResult<Item> {
        self.inner.append_item(service_id, item).await
    }
}

async fn setup() -> (Arc<MemoryPlanningStore>, OrderMaintainer) {
    let store = Arc::new(MemoryPlanningStore::new());
    let maintainer = OrderMaintainer::new(store.clone());
    (store, maintainer)
}

async fn fill(maintainer: &OrderMaintainer, service_id: i64, names: &[&str]) -> Vec<i64> {
    let mut ids = Vec::new();
    for name in names {
        let item = maintainer
            .append_item(service_id, &NewItem::new(name))
            .await
            .unwrap();
        ids.push(item.id);
    }
    ids
}

async fn ids_in_order(store: &MemoryPlanningStore, service_id: i64) -> Vec<i64> {
    store
        .list_service_items(service_id)
        .await
        .unwrap()
        .iter()
        .map(|item| item.id)
        .collect()
}

async fn assert_dense(store: &MemoryPlanningStore, service_id: i64) {
    let orders: Vec<i32> = store
        .list_service_items(service_id)
        .await
        .unwrap()
        .iter()
        .map(|item| item.order)
        .collect();
    let expected: Vec<i32> = (0..orders.len() as i32).collect();
    assert_eq!(orders, expected, "service {service_id} is not densely ordered");
}

#[tokio::test]
async fn test_append_keeps_dense_order() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Samedi soir", "Apéritif").await;

    let ids = fill(&maintainer, service, &["Chips", "Olives", "Rosé"]).await;

    assert_eq!(ids_in_order(&store, service).await, ids);
    assert_dense(&store, service).await;
}

#[tokio::test]
async fn test_append_to_missing_service_fails() {
    let (_store, maintainer) = setup().await;

    let result = maintainer.append_item(404, &NewItem::new("Chips")).await;
    assert!(matches!(result, Err(PlanningError::NotFound(_))));
}

#[tokio::test]
async fn test_reorder_assigns_positions() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Samedi soir", "Plat").await;
    let ids = fill(&maintainer, service, &["Gratin", "Salade", "Pain"]).await;

    let wanted = vec![ids[2], ids[0], ids[1]];
    maintainer.reorder(service, &wanted).await.unwrap();

    assert_eq!(ids_in_order(&store, service).await, wanted);
    assert_dense(&store, service).await;
}

#[tokio::test]
async fn test_reorder_rejects_partial_or_foreign_lists() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Samedi soir", "Plat").await;
    let other = store.add_service("Samedi soir", "Dessert").await;
    let ids = fill(&maintainer, service, &["Gratin", "Salade", "Pain"]).await;
    let foreign = fill(&maintainer, other, &["Tarte"]).await;

    let partial = maintainer.reorder(service, &[ids[1], ids[0]]).await;
    assert!(matches!(partial, Err(PlanningError::MembershipMismatch(_))));

    let with_foreign = maintainer
        .reorder(service, &[ids[1], ids[0], foreign[0]])
        .await;
    assert!(matches!(with_foreign, Err(PlanningError::MembershipMismatch(_))));

    let duplicated = maintainer.reorder(service, &[ids[1], ids[1], ids[0]]).await;
    assert!(matches!(duplicated, Err(PlanningError::MembershipMismatch(_))));

    // Nothing was written by the rejected requests
    assert_eq!(ids_in_order(&store, service).await, ids);
    assert_eq!(ids_in_order(&store, other).await, foreign);
}

#[tokio::test]
async fn test_reorder_missing_service_is_not_found() {
    let (_store, maintainer) = setup().await;

    let result = maintainer.reorder(404, &[]).await;
    assert!(matches!(result, Err(PlanningError::NotFound(_))));
}

#[tokio::test]
async fn test_move_within_service_to_front() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Dimanche midi", "Entrée").await;
    let ids = fill(&maintainer, service, &["Radis", "Melon", "Jambon", "Beurre"]).await;

    maintainer.move_item(ids[3], service, Some(0)).await.unwrap();

    assert_eq!(
        ids_in_order(&store, service).await,
        vec![ids[3], ids[0], ids[1], ids[2]]
    );
    assert_dense(&store, service).await;
}

#[tokio::test]
async fn test_move_within_service_defaults_to_append() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Dimanche midi", "Entrée").await;
    let ids = fill(&maintainer, service, &["Radis", "Melon", "Jambon"]).await;

    maintainer.move_item(ids[0], service, None).await.unwrap();

    assert_eq!(
        ids_in_order(&store, service).await,
        vec![ids[1], ids[2], ids[0]]
    );
    assert_dense(&store, service).await;
}

#[tokio::test]
async fn test_move_across_services_into_middle() {
    let (store, maintainer) = setup().await;
    let source = store.add_service("Dimanche midi", "Plat").await;
    let destination = store.add_service("Dimanche midi", "Dessert").await;
    let plats = fill(&maintainer, source, &["Poulet", "Frites", "Salade"]).await;
    let desserts = fill(&maintainer, destination, &["Tarte", "Glace"]).await;

    maintainer.move_item(plats[1], destination, Some(1)).await.unwrap();

    assert_eq!(ids_in_order(&store, source).await, vec![plats[0], plats[2]]);
    assert_eq!(
        ids_in_order(&store, destination).await,
        vec![desserts[0], plats[1], desserts[1]]
    );
    assert_dense(&store, source).await;
    assert_dense(&store, destination).await;

    let moved = store.find_item(plats[1]).await.unwrap().unwrap();
    assert_eq!(moved.service_id, destination);
    assert_eq!(moved.order, 1);
}

#[tokio::test]
async fn test_move_across_clamps_target_order() {
    let (store, maintainer) = setup().await;
    let source = store.add_service("Vendredi", "Apéritif").await;
    let destination = store.add_service("Vendredi", "Plat").await;
    let aperitif = fill(&maintainer, source, &["Chips", "Olives"]).await;
    let plats = fill(&maintainer, destination, &["Pizza"]).await;

    maintainer.move_item(aperitif[0], destination, Some(42)).await.unwrap();
    maintainer.move_item(aperitif[1], destination, Some(-3)).await.unwrap();

    assert_eq!(
        ids_in_order(&store, destination).await,
        vec![aperitif[1], plats[0], aperitif[0]]
    );
    assert!(ids_in_order(&store, source).await.is_empty());
    assert_dense(&store, destination).await;
}

#[tokio::test]
async fn test_move_across_into_empty_service_appends() {
    let (store, maintainer) = setup().await;
    let source = store.add_service("Vendredi", "Plat").await;
    let destination = store.add_service("Vendredi", "Dessert").await;
    let ids = fill(&maintainer, source, &["Pizza", "Tiramisu"]).await;

    maintainer.move_item(ids[1], destination, None).await.unwrap();

    assert_eq!(ids_in_order(&store, destination).await, vec![ids[1]]);
    assert_eq!(ids_in_order(&store, source).await, vec![ids[0]]);
    assert_dense(&store, source).await;
    assert_dense(&store, destination).await;
}

#[tokio::test]
async fn test_move_missing_item_or_service_is_not_found() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Vendredi", "Plat").await;
    let ids = fill(&maintainer, service, &["Pizza"]).await;

    let missing_item = maintainer.move_item(999, service, None).await;
    assert!(matches!(missing_item, Err(PlanningError::NotFound(_))));

    let missing_service = maintainer.move_item(ids[0], 999, None).await;
    assert!(matches!(missing_service, Err(PlanningError::NotFound(_))));

    assert_eq!(ids_in_order(&store, service).await, ids);
}

#[tokio::test]
async fn test_remove_closes_gap() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Vendredi", "Plat").await;
    let ids = fill(&maintainer, service, &["Pizza", "Salade", "Pain", "Fromage"]).await;

    maintainer.remove_item(ids[1]).await.unwrap();

    assert_eq!(
        ids_in_order(&store, service).await,
        vec![ids[0], ids[2], ids[3]]
    );
    assert_dense(&store, service).await;
    assert!(store.find_item(ids[1]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_many_moves_keep_every_service_dense() {
    let (store, maintainer) = setup().await;
    let services = vec![
        store.add_service("Week-end", "Entrée").await,
        store.add_service("Week-end", "Plat").await,
        store.add_service("Week-end", "Dessert").await,
    ];

    let mut all_ids = Vec::new();
    for &service in &services {
        all_ids.extend(fill(&maintainer, service, &["a", "b", "c", "d"]).await);
    }

    // Deterministic walk over items, targets and positions
    for step in 0..30usize {
        let item_id = all_ids[(step * 7) % all_ids.len()];
        let target = services[(step * 5) % services.len()];
        let order = if step % 4 == 0 { None } else { Some((step % 6) as i32) };

        maintainer.move_item(item_id, target, order).await.unwrap();

        for &service in &services {
            assert_dense(&store, service).await;
        }
    }

    let mut total = 0;
    for &service in &services {
        total += ids_in_order(&store, service).await.len();
    }
    assert_eq!(total, all_ids.len());
}

#[tokio::test]
async fn test_move_slot_follows_concurrent_removal() {
    let (store, maintainer) = setup().await;
    let source = store.add_service("Dimanche", "Apéritif").await;
    let destination = store.add_service("Dimanche", "Plat").await;
    let moved = fill(&maintainer, source, &["Olives"]).await;
    let plats = fill(&maintainer, destination, &["Poulet", "Frites", "Salade"]).await;

    let racing = OrderMaintainer::new(Arc::new(InterleavingStore::new(
        store.clone(),
        Concurrent::Remove(plats[0]),
    )));
    racing.move_item(moved[0], destination, Some(3)).await.unwrap();

    assert_eq!(
        ids_in_order(&store, destination).await,
        vec![plats[1], plats[2], moved[0]]
    );
    assert_dense(&store, destination).await;
    assert!(ids_in_order(&store, source).await.is_empty());
}

#[tokio::test]
async fn test_append_move_follows_concurrent_removal() {
    let (store, maintainer) = setup().await;
    let source = store.add_service("Dimanche", "Apéritif").await;
    let destination = store.add_service("Dimanche", "Plat").await;
    let moved = fill(&maintainer, source, &["Olives", "Chips"]).await;
    let plats = fill(&maintainer, destination, &["Poulet", "Frites", "Salade"]).await;

    let racing = OrderMaintainer::new(Arc::new(InterleavingStore::new(
        store.clone(),
        Concurrent::Remove(plats[1]),
    )));
    racing.move_item(moved[0], destination, None).await.unwrap();

    assert_eq!(
        ids_in_order(&store, destination).await,
        vec![plats[0], plats[2], moved[0]]
    );
    assert_dense(&store, destination).await;
    assert_dense(&store, source).await;
}

#[tokio::test]
async fn test_reorder_aborts_when_an_item_arrives_meanwhile() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Lundi", "Plat").await;
    let other = store.add_service("Lundi", "Dessert").await;
    let ids = fill(&maintainer, service, &["Gratin", "Salade"]).await;
    let arriving = fill(&maintainer, other, &["Tarte"]).await;

    let racing = OrderMaintainer::new(Arc::new(InterleavingStore::new(
        store.clone(),
        Concurrent::Move {
            item_id: arriving[0],
            service_id: service,
            order: Some(0),
        },
    )));
    let error = racing.reorder(service, &[ids[1], ids[0]]).await.unwrap_err();

    assert!(matches!(error, PlanningError::Storage(_)));
    assert!(error.is_retryable());
    assert_eq!(
        ids_in_order(&store, service).await,
        vec![arriving[0], ids[0], ids[1]]
    );
    assert_dense(&store, service).await;
}

#[tokio::test]
async fn test_move_within_aborts_when_an_item_arrives_meanwhile() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Lundi", "Plat").await;
    let other = store.add_service("Lundi", "Dessert").await;
    let ids = fill(&maintainer, service, &["Gratin", "Salade", "Pain"]).await;
    let arriving = fill(&maintainer, other, &["Tarte"]).await;

    let racing = OrderMaintainer::new(Arc::new(InterleavingStore::new(
        store.clone(),
        Concurrent::Move {
            item_id: arriving[0],
            service_id: service,
            order: None,
        },
    )));
    let result = racing.move_item(ids[0], service, None).await;

    assert!(matches!(result, Err(PlanningError::Storage(_))));
    assert_eq!(
        ids_in_order(&store, service).await,
        vec![ids[0], ids[1], ids[2], arriving[0]]
    );
    assert_dense(&store, service).await;
}

#[tokio::test]
async fn test_remove_aborts_when_item_was_reordered_meanwhile() {
    let (store, maintainer) = setup().await;
    let service = store.add_service("Mardi", "Entrée").await;
    let ids = fill(&maintainer, service, &["Radis", "Melon", "Jambon"]).await;

    let racing = OrderMaintainer::new(Arc::new(InterleavingStore::new(
        store.clone(),
        Concurrent::Reorder {
            service_id: service,
            item_ids: vec![ids[1], ids[2], ids[0]],
        },
    )));
    let result = racing.remove_item(ids[0]).await;

    assert!(matches!(result, Err(PlanningError::Storage(_))));
    assert_eq!(
        ids_in_order(&store, service).await,
        vec![ids[1], ids[2], ids[0]]
    );
    assert_dense(&store, service).await;

    // Retrying reads the new position and succeeds
    racing.remove_item(ids[0]).await.unwrap();
    assert_eq!(ids_in_order(&store, service).await, vec![ids[1], ids[2]]);
    assert_dense(&store, service).await;
}
