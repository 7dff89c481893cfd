//! Strata Card Catalog Walkthrough
//!
//! Builds the schema of a trading-card collection tracker through three
//! migration steps, then walks it forward and back.
//!
//! Features demonstrated:
//! - Declarative steps with automatically derived reverts
//! - Durable ledger and catalog snapshot under a data directory
//! - Status reporting and the consistency check
//!
//! Run with `cargo run -p strata-core --example card_catalog`.

use std::sync::Arc;

use anyhow::Context;
use strata_core::prelude::*;

const CONDITIONS: [&str; 5] = ["NM", "LP", "MP", "HP", "DMG"];
const RARITIES: [&str; 6] = ["common", "uncommon", "rare", "mythic", "special", "bonus"];

fn cards() -> anyhow::Result<CollectionDescriptor> {
    Ok(CollectionDescriptor::builder("cards")
        .field(FieldDescriptor::text("scryfall_id").required())
        .field(FieldDescriptor::text("name").required())
        .field(FieldDescriptor::text("set_code").required())
        .field(FieldDescriptor::text("set_name").required())
        .field(FieldDescriptor::select("rarity", RARITIES).required())
        .field(FieldDescriptor::text("mana_cost"))
        .field(FieldDescriptor::text("type_line").required())
        .field(FieldDescriptor::json("colors"))
        .field(FieldDescriptor::file("image_file").with_max_select(1))
        .field(FieldDescriptor::number("price_usd"))
        .field(FieldDescriptor::date("last_updated"))
        .index(IndexDefinition::unique(["scryfall_id"]))
        .index(IndexDefinition::new(["name"]))
        .index(IndexDefinition::new(["set_code"]))
        .index(IndexDefinition::new(["type_line"]))
        .index(
            IndexDefinition::new(["name"])
                .named("idx_cards_name_search")
                .with_collation(Collation::Nocase),
        )
        .index(IndexDefinition::new(["set_name"]))
        .build()?)
}

fn collections() -> anyhow::Result<CollectionDescriptor> {
    Ok(CollectionDescriptor::builder("collections")
        .field(FieldDescriptor::text("user_id").required())
        .field(FieldDescriptor::text("card_id").required())
        .field(
            FieldDescriptor::number("quantity")
                .required()
                .integer_only()
                .with_range(Some(1.0), None),
        )
        .field(FieldDescriptor::select("condition", CONDITIONS).required())
        .field(FieldDescriptor::bool("foil"))
        .field(FieldDescriptor::date("acquired_date"))
        .field(FieldDescriptor::text("notes"))
        .index(IndexDefinition::new(["user_id"]))
        .index(IndexDefinition::new(["card_id"]))
        .index(IndexDefinition::new(["user_id", "card_id"]).named("idx_collections_user_card"))
        .build()?)
}

fn sync_status() -> anyhow::Result<CollectionDescriptor> {
    Ok(CollectionDescriptor::builder("sync_status")
        .field(FieldDescriptor::select("data_type", ["cards", "sets", "prices"]).required())
        .field(FieldDescriptor::date("last_sync"))
        .field(FieldDescriptor::select("status", ["success", "failed", "in_progress"]).required())
        .field(FieldDescriptor::number("records_processed"))
        .field(FieldDescriptor::text("error_message"))
        .index(IndexDefinition::unique(["data_type"]))
        .build()?)
}

fn card_prices(cards: &CollectionDescriptor) -> anyhow::Result<CollectionDescriptor> {
    Ok(CollectionDescriptor::builder("card_prices")
        .field(
            FieldDescriptor::relation("card_id", cards.id().clone())
                .required()
                .cascade_delete(),
        )
        .field(FieldDescriptor::number("price_usd"))
        .field(FieldDescriptor::number("price_usd_foil"))
        .field(FieldDescriptor::number("price_eur"))
        .field(FieldDescriptor::number("price_tix"))
        .field(FieldDescriptor::date("last_updated"))
        .index(IndexDefinition::unique(["card_id"]))
        .build()?)
}

fn registry() -> anyhow::Result<MigrationRegistry> {
    let cards = cards()?;
    let prices = card_prices(&cards)?;

    let steps: Vec<Box<dyn Migration>> = vec![
        Box::new(
            DeclarativeStep::builder("1752710000_create_collections")
                .describe("Create cards, collections and sync_status")
                .create_collection(cards)
                .create_collection(collections()?)
                .create_collection(sync_status()?)
                .build()?,
        ),
        Box::new(
            DeclarativeStep::builder("1753835663_create_card_prices")
                .describe("Move pricing into its own collection")
                .create_collection(prices)
                .build()?,
        ),
        Box::new(
            DeclarativeStep::builder("1755560718_updated_cards")
                .describe("Drop the inline price from cards")
                .drop_field("cards", FieldDescriptor::number("price_usd"))
                .build()?,
        ),
    ];
    Ok(MigrationRegistry::new(steps)?)
}

async fn print_status(runner: &MigrationRunner) -> anyhow::Result<()> {
    for status in runner.status().await? {
        let marker = match &status.state {
            StepState::Applied { at } => format!("✅ applied {}", at.format("%Y-%m-%d %H:%M:%S")),
            StepState::Pending => "⏳ pending".to_string(),
            StepState::Unregistered { .. } => "⚠️  unregistered".to_string(),
        };
        println!("   {:<36} {} {}", status.id, marker, status.description);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir().context("creating scratch data directory")?;
    let config = StrataConfig::load()?.with_data_dir(data_dir.path());
    config.validate()?;
    init_logging(&config.logging.to_logger_config()?)?;

    println!("🗂️  Strata Card Catalog Walkthrough");
    println!("===================================");
    println!("📁 Data directory: {}", data_dir.path().display());

    let runner = MigrationRunner::from_config(&config, Arc::new(registry()?))?;

    println!("\n📋 Before migrating:");
    print_status(&runner).await?;

    let applied = runner.apply_up(None).await?;
    println!("\n⬆️  Applied {} step(s)", applied.len());
    print_status(&runner).await?;

    runner.verify().await?;
    println!("\n🔍 Live catalog matches the applied steps");

    for collection in runner.backend().list_collections().await? {
        println!(
            "   {} ({} fields, {} indexes)",
            collection.name(),
            collection.fields().len(),
            collection.indexes().len()
        );
    }

    let reverted = runner.apply_down(None).await?;
    let reverted: Vec<String> = reverted.iter().map(ToString::to_string).collect();
    println!("\n⬇️  Reverted {}", reverted.join(", "));
    let cards = runner
        .backend()
        .find_collection("cards")
        .await?
        .context("cards collection should still exist")?;
    println!("   cards.price_usd restored: {}", cards.field("price_usd").is_some());

    let target = StepId::parse("1752710000_create_collections")?;
    runner.apply_down(Some(&target)).await?;
    println!("\n⬇️  Reverted everything newer than {target}");
    println!("   card_prices present: {}", runner.backend().find_collection("card_prices").await?.is_some());
    print_status(&runner).await?;

    println!("\n✅ Walkthrough completed");
    Ok(())
}
