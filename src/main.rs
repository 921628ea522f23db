use anyhow::{bail, Context, Result};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mealplan::config::PlannerConfig;
use mealplan::db::{self, PgPlanningStore};
use mealplan::generator::HttpIngredientGenerator;
use mealplan::planner::Planner;
use mealplan::shopping_list::render_shopping_list;

const USAGE: &str = "usage: mealplan <command>
  init
  shopping-list <person-id>
  move <item-id> <service-id> [order]
  reorder <service-id> <item-id>...
  ingredients <item-id> <servings> <dish name...>";

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn parse_id(raw: Option<&String>, what: &str) -> Result<i64> {
    let raw = raw.with_context(|| format!("missing {what}\n{USAGE}"))?;
    raw.parse()
        .with_context(|| format!("{what} must be a number, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!("{USAGE}");
    };

    let config = PlannerConfig::from_env()?;
    let store = Arc::new(PgPlanningStore::connect(&config).await?);
    db::init_database_schema(store.pool()).await?;

    if command == "init" {
        info!("Schema ready");
        return Ok(());
    }

    let generator = Arc::new(HttpIngredientGenerator::new(config.generator.clone())?);
    let planner = Planner::new(store, generator, config.cache.clone());

    match command.as_str() {
        "shopping-list" => {
            let person_id = parse_id(args.get(1), "person id")?;
            let groups = planner.build_shopping_list(person_id).await?;
            print!("{}", render_shopping_list(&groups));
        }
        "move" => {
            let item_id = parse_id(args.get(1), "item id")?;
            let service_id = parse_id(args.get(2), "service id")?;
            let order = args
                .get(3)
                .map(|raw| raw.parse::<i32>().with_context(|| format!("invalid order '{raw}'")))
                .transpose()?;
            planner.move_item(item_id, service_id, order).await?;
            println!("Moved item {item_id} to service {service_id}");
        }
        "reorder" => {
            let service_id = parse_id(args.get(1), "service id")?;
            let ids = args
                .iter()
                .skip(2)
                .map(|raw| raw.parse::<i64>().with_context(|| format!("invalid item id '{raw}'")))
                .collect::<Result<Vec<_>>>()?;
            planner.reorder_items(service_id, &ids).await?;
            println!("Reordered {} items in service {service_id}", ids.len());
        }
        "ingredients" => {
            let item_id = parse_id(args.get(1), "item id")?;
            let servings: i32 = args
                .get(2)
                .context("missing servings")?
                .parse()
                .context("servings must be a number")?;
            let dish = args.iter().skip(3).cloned().collect::<Vec<_>>().join(" ");
            let ingredients = planner.resolve_ingredients(item_id, &dish, servings).await?;
            for ingredient in ingredients {
                match ingredient.quantity {
                    Some(quantity) => println!("- {} ({quantity})", ingredient.name),
                    None => println!("- {}", ingredient.name),
                }
            }
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }

    Ok(())
}
