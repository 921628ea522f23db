//! # PostgreSQL Planning Store
//!
//! Schema management and the sqlx-backed implementation of every store trait.
//!
//! Order batches run in one transaction. Before mutating, the transaction
//! locks the touched service rows (`FOR UPDATE`, ascending id) so concurrent
//! moves and appends on the same service are serialized. The
//! `(service_id, position)` uniqueness constraint is deferred to commit so
//! the shifting updates may pass through transient duplicates.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};

use crate::config::PlannerConfig;
use crate::planning_errors::{PlanningError, PlanningResult};
use crate::planning_model::{
    GeneratedIngredient, Ingredient, IngredientCacheEntry, Item, NewItem, PlannedItem, SourceRef,
};
use crate::store::{clamp_target, touched_services, CacheRepo, IngredientRepo, ItemRepo, OrderOp, ShoppingRepo};

const ITEM_COLUMNS: &str =
    "id, service_id, name, quantity, note, price, assigned_person_id, position, checked";
const INGREDIENT_COLUMNS: &str = "id, item_id, name, quantity, category, position, checked";

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS events (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create events table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS meals (
            id BIGSERIAL PRIMARY KEY,
            event_id BIGINT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create meals table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS services (
            id BIGSERIAL PRIMARY KEY,
            meal_id BIGINT NOT NULL REFERENCES meals(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create services table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS people (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create people table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS items (
            id BIGSERIAL PRIMARY KEY,
            service_id BIGINT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            quantity TEXT,
            note TEXT,
            price DOUBLE PRECISION,
            assigned_person_id BIGINT REFERENCES people(id) ON DELETE SET NULL,
            position INTEGER NOT NULL,
            checked BOOLEAN NOT NULL DEFAULT FALSE,
            CONSTRAINT items_service_position_key UNIQUE (service_id, position)
                DEFERRABLE INITIALLY DEFERRED
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create items table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS items_assigned_person_idx ON items(assigned_person_id)",
    )
    .execute(pool)
    .await
    .context("Failed to create items person index")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ingredients (
            id BIGSERIAL PRIMARY KEY,
            item_id BIGINT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            quantity TEXT,
            category TEXT,
            position INTEGER NOT NULL,
            checked BOOLEAN NOT NULL DEFAULT FALSE
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create ingredients table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS ingredients_item_idx ON ingredients(item_id, position)")
        .execute(pool)
        .await
        .context("Failed to create ingredients index")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ingredient_cache (
            dish_key TEXT NOT NULL,
            serving_count INTEGER NOT NULL,
            ingredients TEXT NOT NULL,
            confirmations INTEGER NOT NULL DEFAULT 1,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (dish_key, serving_count)
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create ingredient_cache table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Create a new event
pub async fn create_event(pool: &PgPool, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar("INSERT INTO events (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .context("Failed to insert new event")?;

    debug!(event_id = id, "Event created");
    Ok(id)
}

/// Create a new meal inside an event
pub async fn create_meal(pool: &PgPool, event_id: i64, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO meals (event_id, name, position)
         VALUES ($1, $2, (SELECT COALESCE(MAX(position), -1) + 1 FROM meals WHERE event_id = $1))
         RETURNING id",
    )
    .bind(event_id)
    .bind(name)
    .fetch_one(pool)
    .await
    .context("Failed to insert new meal")?;

    debug!(meal_id = id, event_id, "Meal created");
    Ok(id)
}

/// Create a new service inside a meal
pub async fn create_service(pool: &PgPool, meal_id: i64, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO services (meal_id, name, position)
         VALUES ($1, $2, (SELECT COALESCE(MAX(position), -1) + 1 FROM services WHERE meal_id = $1))
         RETURNING id",
    )
    .bind(meal_id)
    .bind(name)
    .fetch_one(pool)
    .await
    .context("Failed to insert new service")?;

    debug!(service_id = id, meal_id, "Service created");
    Ok(id)
}

/// Create a new person who can be assigned items
pub async fn create_person(pool: &PgPool, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar("INSERT INTO people (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .context("Failed to insert new person")?;

    debug!(person_id = id, "Person created");
    Ok(id)
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    dish_key: String,
    serving_count: i32,
    ingredients: String,
    confirmations: i32,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PersonItemRow {
    #[sqlx(flatten)]
    item: Item,
    meal_name: String,
    service_name: String,
}

/// Planning store on a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgPlanningStore {
    pool: PgPool,
}

impl PgPlanningStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool using the configured URL and pool size
    pub async fn connect(config: &PlannerConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Lock a service row for the rest of the transaction
async fn lock_service(tx: &mut Transaction<'_, Postgres>, service_id: i64) -> PlanningResult<()> {
    let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM services WHERE id = $1 FOR UPDATE")
        .bind(service_id)
        .fetch_optional(&mut **tx)
        .await?;

    locked
        .map(|_| ())
        .ok_or_else(|| PlanningError::NotFound(format!("service {service_id}")))
}

async fn apply_op(tx: &mut Transaction<'_, Postgres>, op: &OrderOp) -> PlanningResult<()> {
    match *op {
        OrderOp::ExpectMembers {
            service_id,
            ref item_ids,
        } => {
            let current: Vec<i64> = sqlx::query_scalar("SELECT id FROM items WHERE service_id = $1")
                .bind(service_id)
                .fetch_all(&mut **tx)
                .await?;
            let current: HashSet<i64> = current.into_iter().collect();
            let expected: HashSet<i64> = item_ids.iter().copied().collect();
            if current != expected || expected.len() != item_ids.len() {
                return Err(PlanningError::Storage(format!(
                    "service {service_id} changed since the request was planned"
                )));
            }
        }
        OrderOp::ExpectPosition {
            item_id,
            service_id,
            order,
        } => {
            let unchanged: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM items WHERE id = $1 AND service_id = $2 AND position = $3)",
            )
            .bind(item_id)
            .bind(service_id)
            .bind(order)
            .fetch_one(&mut **tx)
            .await?;
            if !unchanged {
                return Err(PlanningError::Storage(format!(
                    "item {item_id} changed since the request was planned"
                )));
            }
        }
        OrderOp::Assign {
            service_id,
            item_id,
            order,
        } => {
            let result =
                sqlx::query("UPDATE items SET position = $1 WHERE id = $2 AND service_id = $3")
                    .bind(order)
                    .bind(item_id)
                    .bind(service_id)
                    .execute(&mut **tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(PlanningError::NotFound(format!(
                    "item {item_id} in service {service_id}"
                )));
            }
        }
        OrderOp::CloseGap { service_id, after } => {
            sqlx::query(
                "UPDATE items SET position = position - 1 WHERE service_id = $1 AND position > $2",
            )
            .bind(service_id)
            .bind(after)
            .execute(&mut **tx)
            .await?;
        }
        OrderOp::Place {
            item_id,
            service_id,
            order,
        } => {
            let others: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE service_id = $1 AND id <> $2")
                    .bind(service_id)
                    .bind(item_id)
                    .fetch_one(&mut **tx)
                    .await?;
            let slot = clamp_target(order, usize::try_from(others).unwrap_or_default());

            sqlx::query(
                "UPDATE items SET position = position + 1
                 WHERE service_id = $1 AND id <> $2 AND position >= $3",
            )
            .bind(service_id)
            .bind(item_id)
            .bind(slot)
            .execute(&mut **tx)
            .await?;

            let result = sqlx::query("UPDATE items SET service_id = $1, position = $2 WHERE id = $3")
                .bind(service_id)
                .bind(slot)
                .bind(item_id)
                .execute(&mut **tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(PlanningError::NotFound(format!("item {item_id}")));
            }
        }
        OrderOp::Remove {
            item_id,
            service_id,
        } => {
            let result = sqlx::query("DELETE FROM items WHERE id = $1 AND service_id = $2")
                .bind(item_id)
                .bind(service_id)
                .execute(&mut **tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(PlanningError::NotFound(format!("item {item_id}")));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ItemRepo for PgPlanningStore {
    async fn find_item(&self, item_id: i64) -> PlanningResult<Option<Item>> {
        let item = sqlx::query_as::<_, Item>(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    async fn service_exists(&self, service_id: i64) -> PlanningResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM services WHERE id = $1)")
            .bind(service_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list_service_items(&self, service_id: i64) -> PlanningResult<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE service_id = $1 ORDER BY position, id"
        ))
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn apply_order_ops(&self, ops: &[OrderOp]) -> PlanningResult<()> {
        let mut tx = self.pool.begin().await?;

        for service_id in touched_services(ops) {
            lock_service(&mut tx, service_id).await?;
        }
        for op in ops {
            apply_op(&mut tx, op).await?;
        }

        tx.commit().await?;
        debug!(steps = ops.len(), "Applied order batch");
        Ok(())
    }

    async fn append_item(&self, service_id: i64, item: &NewItem) -> PlanningResult<Item> {
        let mut tx = self.pool.begin().await?;
        lock_service(&mut tx, service_id).await?;

        let created = sqlx::query_as::<_, Item>(&format!(
            "INSERT INTO items (service_id, name, quantity, note, price, assigned_person_id, position)
             VALUES ($1, $2, $3, $4, $5, $6,
                     (SELECT COALESCE(MAX(position), -1) + 1 FROM items WHERE service_id = $1))
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(service_id)
        .bind(&item.name)
        .bind(&item.quantity)
        .bind(&item.note)
        .bind(item.price)
        .bind(item.assigned_person_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }
}

#[async_trait]
impl IngredientRepo for PgPlanningStore {
    async fn replace_item_ingredients(
        &self,
        item_id: i64,
        ingredients: &[GeneratedIngredient],
    ) -> PlanningResult<Vec<Ingredient>> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM items WHERE id = $1 FOR UPDATE")
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(PlanningError::NotFound(format!("item {item_id}")));
        }

        sqlx::query("DELETE FROM ingredients WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        let mut created = Vec::with_capacity(ingredients.len());
        for (generated, order) in ingredients.iter().zip(0i32..) {
            let ingredient = sqlx::query_as::<_, Ingredient>(&format!(
                "INSERT INTO ingredients (item_id, name, quantity, category, position)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING {INGREDIENT_COLUMNS}"
            ))
            .bind(item_id)
            .bind(&generated.name)
            .bind(&generated.quantity)
            .bind(&generated.category)
            .bind(order)
            .fetch_one(&mut *tx)
            .await?;
            created.push(ingredient);
        }

        tx.commit().await?;
        info!(item_id, count = created.len(), "Replaced item ingredients");
        Ok(created)
    }

    async fn list_item_ingredients(&self, item_id: i64) -> PlanningResult<Vec<Ingredient>> {
        let ingredients = sqlx::query_as::<_, Ingredient>(&format!(
            "SELECT {INGREDIENT_COLUMNS} FROM ingredients WHERE item_id = $1 ORDER BY position, id"
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ingredients)
    }

    async fn set_checked(&self, sources: &[SourceRef], checked: bool) -> PlanningResult<()> {
        let mut tx = self.pool.begin().await?;

        for source in sources {
            let query = match source {
                SourceRef::Ingredient(id) => sqlx::query("UPDATE ingredients SET checked = $1 WHERE id = $2")
                    .bind(checked)
                    .bind(*id),
                SourceRef::Item(id) => sqlx::query("UPDATE items SET checked = $1 WHERE id = $2")
                    .bind(checked)
                    .bind(*id),
            };
            let result = query.execute(&mut *tx).await?;
            if result.rows_affected() == 0 {
                return Err(PlanningError::NotFound(source.to_string()));
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CacheRepo for PgPlanningStore {
    async fn find_cache_entry(
        &self,
        dish_key: &str,
        serving_count: i32,
    ) -> PlanningResult<Option<IngredientCacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT dish_key, serving_count, ingredients, confirmations, updated_at
             FROM ingredient_cache WHERE dish_key = $1 AND serving_count = $2",
        )
        .bind(dish_key)
        .bind(serving_count)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(IngredientCacheEntry {
            dish_key: row.dish_key,
            serving_count: row.serving_count,
            ingredients: serde_json::from_str(&row.ingredients)?,
            confirmations: row.confirmations,
            updated_at: row.updated_at,
        }))
    }

    async fn upsert_cache_entry(&self, entry: &IngredientCacheEntry) -> PlanningResult<()> {
        let payload = serde_json::to_string(&entry.ingredients)?;

        sqlx::query(
            "INSERT INTO ingredient_cache (dish_key, serving_count, ingredients, confirmations, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (dish_key, serving_count) DO UPDATE
             SET ingredients = EXCLUDED.ingredients,
                 confirmations = EXCLUDED.confirmations,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&entry.dish_key)
        .bind(entry.serving_count)
        .bind(payload)
        .bind(entry.confirmations)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ShoppingRepo for PgPlanningStore {
    async fn list_person_items(&self, person_id: i64) -> PlanningResult<Vec<PlannedItem>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query_as::<_, PersonItemRow>(
            "SELECT i.id, i.service_id, i.name, i.quantity, i.note, i.price,
                    i.assigned_person_id, i.position, i.checked,
                    m.name AS meal_name, s.name AS service_name
             FROM items i
             JOIN services s ON s.id = i.service_id
             JOIN meals m ON m.id = s.meal_id
             WHERE i.assigned_person_id = $1
             ORDER BY m.event_id, m.position, m.id, s.position, s.id, i.position",
        )
        .bind(person_id)
        .fetch_all(&mut *tx)
        .await?;

        let item_ids: Vec<i64> = rows.iter().map(|row| row.item.id).collect();
        let ingredients = sqlx::query_as::<_, Ingredient>(&format!(
            "SELECT {INGREDIENT_COLUMNS} FROM ingredients
             WHERE item_id = ANY($1) ORDER BY item_id, position, id"
        ))
        .bind(&item_ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut by_item: HashMap<i64, Vec<Ingredient>> = HashMap::new();
        for ingredient in ingredients {
            by_item.entry(ingredient.item_id).or_default().push(ingredient);
        }

        Ok(rows
            .into_iter()
            .map(|row| PlannedItem {
                ingredients: by_item.remove(&row.item.id).unwrap_or_default(),
                item: row.item,
                meal_name: row.meal_name,
                service_name: row.service_name,
            })
            .collect())
    }
}
