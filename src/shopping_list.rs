//! # Shopping List Module
//!
//! Turns everything assigned to one person into a deduplicated, summed and
//! category-grouped shopping list.
//!
//! ## Aggregation
//!
//! - An item with ingredients contributes one source per ingredient; an item
//!   without ingredients contributes itself
//! - Sources merge only when both the name and the unit match (case and
//!   surrounding spaces ignored): "200g" and "1 cup" of flour stay apart
//! - Numeric quantities are summed; quantities without a leading number are
//!   listed but add nothing
//! - A merged line is checked only when every one of its sources is checked
//!
//! The computation is pure and rebuilt on every view.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde::Serialize;

use crate::planning_model::{Category, PlannedItem, SourceRef};
use crate::quantity::{format_aggregated_quantity, parse_optional_quantity};

/// One checkable row feeding the shopping list
#[derive(Debug, Clone, PartialEq)]
pub struct ShoppingSource {
    pub source: SourceRef,
    pub name: String,
    pub quantity: Option<String>,
    pub checked: bool,
    pub category: Category,
    /// Name of the item the row belongs to (the item itself for item rows)
    pub item_name: String,
    pub meal_name: String,
    pub service_name: String,
}

/// A source as listed under a merged line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceEntry {
    pub source: SourceRef,
    /// Quantity exactly as written on the source
    pub quantity: Option<String>,
    pub checked: bool,
    pub item_name: String,
    pub meal_name: String,
    pub service_name: String,
}

/// A merged shopping line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedShoppingItem {
    /// Name of the first source seen, original casing
    pub name: String,
    /// Sum of the numeric quantities; `None` when no source had a number
    pub quantity: Option<f64>,
    pub unit: String,
    pub checked: bool,
    pub category: Category,
    pub sources: Vec<SourceEntry>,
}

impl AggregatedShoppingItem {
    /// Quantity as shown to the user ("400g", "10 oeufs")
    pub fn display_quantity(&self) -> String {
        format_aggregated_quantity(self.quantity, &self.unit)
    }

    /// Rows to update when the merged line is checked or unchecked
    pub fn source_refs(&self) -> Vec<SourceRef> {
        self.sources.iter().map(|entry| entry.source).collect()
    }
}

/// Merged lines of one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryGroup {
    pub category: Category,
    pub items: Vec<AggregatedShoppingItem>,
}

/// Flatten planned items into shopping sources
pub fn collect_sources(planned: &[PlannedItem]) -> Vec<ShoppingSource> {
    let mut sources = Vec::new();

    for planned_item in planned {
        let item = &planned_item.item;

        if planned_item.ingredients.is_empty() {
            sources.push(ShoppingSource {
                source: SourceRef::Item(item.id),
                name: item.name.clone(),
                quantity: item.quantity.clone(),
                checked: item.checked,
                category: Category::Uncategorized,
                item_name: item.name.clone(),
                meal_name: planned_item.meal_name.clone(),
                service_name: planned_item.service_name.clone(),
            });
            continue;
        }

        for ingredient in &planned_item.ingredients {
            sources.push(ShoppingSource {
                source: SourceRef::Ingredient(ingredient.id),
                name: ingredient.name.clone(),
                quantity: ingredient.quantity.clone(),
                checked: ingredient.checked,
                category: Category::from_label(ingredient.category.as_deref()),
                item_name: item.name.clone(),
                meal_name: planned_item.meal_name.clone(),
                service_name: planned_item.service_name.clone(),
            });
        }
    }

    sources
}

/// Merge sources sharing a name and unit, keeping first-seen order
pub fn aggregate_sources(sources: Vec<ShoppingSource>) -> Vec<AggregatedShoppingItem> {
    let mut merged: Vec<AggregatedShoppingItem> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for source in sources {
        let parsed = parse_optional_quantity(source.quantity.as_deref());
        let key = (source.name.trim().to_lowercase(), parsed.unit_key());

        let entry = SourceEntry {
            source: source.source,
            quantity: source.quantity.clone(),
            checked: source.checked,
            item_name: source.item_name,
            meal_name: source.meal_name,
            service_name: source.service_name,
        };

        match index.get(&key) {
            Some(&position) => {
                let line = &mut merged[position];
                if let Some(value) = parsed.value {
                    line.quantity = Some(line.quantity.unwrap_or(0.0) + value);
                }
                line.checked = line.checked && source.checked;
                if line.category == Category::Uncategorized {
                    line.category = source.category;
                }
                line.sources.push(entry);
            }
            None => {
                index.insert(key, merged.len());
                merged.push(AggregatedShoppingItem {
                    name: source.name.trim().to_string(),
                    quantity: parsed.value,
                    unit: parsed.unit,
                    checked: source.checked,
                    category: source.category,
                    sources: vec![entry],
                });
            }
        }
    }

    merged
}

/// Bucket merged lines by category; "misc" comes last, the rest alphabetically
pub fn group_by_category(items: Vec<AggregatedShoppingItem>) -> Vec<CategoryGroup> {
    let mut buckets: BTreeMap<Category, Vec<AggregatedShoppingItem>> = BTreeMap::new();
    for item in items {
        buckets.entry(item.category.clone()).or_default().push(item);
    }

    buckets
        .into_iter()
        .map(|(category, items)| CategoryGroup { category, items })
        .collect()
}

/// Build the grouped shopping list from a person's planned items
pub fn build_shopping_list(planned: &[PlannedItem]) -> Vec<CategoryGroup> {
    let sources = collect_sources(planned);
    let source_count = sources.len();
    let merged = aggregate_sources(sources);
    debug!(
        "Aggregated {} sources into {} shopping lines",
        source_count,
        merged.len()
    );
    group_by_category(merged)
}

/// Plain-text rendering, one category header followed by its lines
pub fn render_shopping_list(groups: &[CategoryGroup]) -> String {
    let mut output = String::new();

    for group in groups {
        output.push_str(&format!("## {}\n", group.category));
        for item in &group.items {
            let mark = if item.checked { "[x]" } else { "[ ]" };
            let quantity = item.display_quantity();
            if quantity.is_empty() {
                output.push_str(&format!("{mark} {}\n", item.name));
            } else {
                output.push_str(&format!("{mark} {} ({quantity})\n", item.name));
            }
        }
        output.push('\n');
    }

    output
}
