use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use shopper_api::{ItemPatch, NewItem, ShopperApi};
use shopper_core::ItemId;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "shopper")]
#[command(about = "Shopper shopping-list CLI")]
struct Cli {
    #[arg(long, default_value = "./data/db.json")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Item {
        #[command(subcommand)]
        command: ItemCommand,
    },
    List {
        #[command(subcommand)]
        command: ListCommand,
    },
    Inventory {
        #[command(subcommand)]
        command: InventoryCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ItemCommand {
    Add(ItemAddArgs),
    List,
    Show(ItemIdArg),
    Update(ItemUpdateArgs),
    Delete(ItemIdArg),
}

#[derive(Debug, Args)]
struct ItemAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    default_store: Option<String>,
}

#[derive(Debug, Args)]
struct ItemIdArg {
    id: String,
}

#[derive(Debug, Args)]
struct ItemUpdateArgs {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    default_store: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ListCommand {
    Show,
    Add(EntryIdArg),
    Remove(EntryIdArg),
    Clear,
    Picked(FlagArgs),
    Unavailable(FlagArgs),
}

#[derive(Debug, Args)]
struct EntryIdArg {
    item_id: String,
}

#[derive(Debug, Args)]
struct FlagArgs {
    item_id: String,
    // Positional bool; without an explicit action clap derives SetTrue,
    // which cannot take a value.
    #[arg(action = clap::ArgAction::Set)]
    value: bool,
}

#[derive(Debug, Subcommand)]
enum InventoryCommand {
    Add(NoteAddArgs),
    List(NoteListArgs),
    Latest,
}

#[derive(Debug, Args)]
struct NoteAddArgs {
    item_id: String,
    #[arg(long)]
    note: String,
}

#[derive(Debug, Args)]
struct NoteListArgs {
    #[arg(long)]
    item: Option<String>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_item_id(raw: &str) -> Result<ItemId> {
    ItemId::from_str(raw).map_err(|err| anyhow!("invalid item id `{raw}`: {err}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = ShopperApi::new(cli.db);
    match cli.command {
        Command::Item { command } => run_item(command, &api),
        Command::List { command } => run_list(command, &api),
        Command::Inventory { command } => run_inventory(command, &api),
    }
}

fn run_item(command: ItemCommand, api: &ShopperApi) -> Result<()> {
    match command {
        ItemCommand::Add(args) => {
            let item = api.create_item(NewItem {
                name: args.name,
                category: args.category,
                default_store: args.default_store,
            })?;
            emit_json(serde_json::json!({ "item": item }))
        }
        ItemCommand::List => {
            let items = api.list_items()?;
            emit_json(serde_json::json!({ "items": items }))
        }
        ItemCommand::Show(args) => {
            let id = parse_item_id(&args.id)?;
            let item = api.get_item(id)?.ok_or_else(|| anyhow!("item not found: {id}"))?;
            emit_json(serde_json::json!({ "item": item }))
        }
        ItemCommand::Update(args) => {
            let id = parse_item_id(&args.id)?;
            let patch = ItemPatch {
                name: args.name,
                category: args.category,
                default_store: args.default_store,
            };
            let item = api.update_item(id, patch)?.ok_or_else(|| anyhow!("item not found: {id}"))?;
            emit_json(serde_json::json!({ "item": item }))
        }
        ItemCommand::Delete(args) => {
            let id = parse_item_id(&args.id)?;
            if !api.delete_item(id)? {
                return Err(anyhow!("item not found: {id}"));
            }
            emit_json(serde_json::json!({ "deleted": true }))
        }
    }
}

fn run_list(command: ListCommand, api: &ShopperApi) -> Result<()> {
    match command {
        ListCommand::Show => {
            let list = api.get_list()?;
            emit_json(serde_json::json!({ "list": list }))
        }
        ListCommand::Add(args) => {
            let id = parse_item_id(&args.item_id)?;
            let entry = api.add_to_list(id)?.ok_or_else(|| anyhow!("item not found: {id}"))?;
            emit_json(serde_json::json!({ "entry": entry }))
        }
        ListCommand::Remove(args) => {
            let id = parse_item_id(&args.item_id)?;
            if !api.remove_from_list(id)? {
                return Err(anyhow!("item not on the list: {id}"));
            }
            emit_json(serde_json::json!({ "removed": true }))
        }
        ListCommand::Clear => {
            let cleared = api.clear_list()?;
            emit_json(serde_json::json!({ "cleared": cleared }))
        }
        ListCommand::Picked(args) => {
            let id = parse_item_id(&args.item_id)?;
            let entry = api
                .set_picked_up(id, args.value)?
                .ok_or_else(|| anyhow!("item not on the list: {id}"))?;
            emit_json(serde_json::json!({ "entry": entry }))
        }
        ListCommand::Unavailable(args) => {
            let id = parse_item_id(&args.item_id)?;
            let entry = api
                .set_unavailable(id, args.value)?
                .ok_or_else(|| anyhow!("item not on the list: {id}"))?;
            emit_json(serde_json::json!({ "entry": entry }))
        }
    }
}

fn run_inventory(command: InventoryCommand, api: &ShopperApi) -> Result<()> {
    match command {
        InventoryCommand::Add(args) => {
            let id = parse_item_id(&args.item_id)?;
            let note = api
                .add_inventory_note(id, &args.note)?
                .ok_or_else(|| anyhow!("item not found: {id}"))?;
            emit_json(serde_json::json!({ "note": note }))
        }
        InventoryCommand::List(args) => {
            let notes = match args.item {
                Some(raw) => api.notes_for_item(parse_item_id(&raw)?)?,
                None => api.list_inventory_notes()?,
            };
            emit_json(serde_json::json!({ "notes": notes }))
        }
        InventoryCommand::Latest => {
            let latest = api.latest_note_by_item()?;
            emit_json(serde_json::json!({ "latest": latest }))
        }
    }
}
