use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ItemId(pub Ulid);

impl ItemId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ulid::DecodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(value)?))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NoteId(pub Ulid);

impl NoteId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One catalog entry. `id` and `created_at` are assigned on creation and
/// never change; `name` is non-empty trimmed text.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub category: Option<String>,
    pub default_store: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Membership of one item on the active shopping list. At most one entry
/// exists per `item_id`; the flags are independent of each other.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub item_id: ItemId,
    pub picked_up: bool,
    // Datasets written before the flag existed deserialize as available.
    #[serde(default)]
    pub unavailable: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
}

/// A timestamped free-text stock observation. Notes are append-only: never
/// edited, removed only when the parent item is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryNote {
    pub id: NoteId,
    pub item_id: ItemId,
    pub note: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// The complete persisted state: three collections loaded and stored as one
/// unit. Vector order is insertion order and serves as the stable tiebreak
/// wherever timestamps collide.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub list_entries: Vec<ListEntry>,
    #[serde(default)]
    pub inventory_notes: Vec<InventoryNote>,
}

impl Dataset {
    #[must_use]
    pub fn find_item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    #[must_use]
    pub fn has_item(&self, id: ItemId) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    #[must_use]
    pub fn find_entry_mut(&mut self, item_id: ItemId) -> Option<&mut ListEntry> {
        self.list_entries.iter_mut().find(|entry| entry.item_id == item_id)
    }
}

/// A list entry joined with its parent item, the shape served on the list
/// boundary. Serializes flat: item fields and entry fields side by side.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ListEntryWithItem {
    #[serde(flatten)]
    pub item: Item,
    #[serde(flatten)]
    pub entry: ListEntry,
}

/// Validate and trim required text such as an item name or a note body.
///
/// # Errors
/// Returns [`DomainError::Validation`] when the text trims to empty.
pub fn normalize_required(field: &str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation(format!("{field} must be non-empty text")));
    }
    Ok(trimmed.to_string())
}

/// Trim optional text; empty input collapses to `None`.
#[must_use]
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// All items ordered newest `created_at` first; equal timestamps keep the
/// later-appended item first.
#[must_use]
pub fn items_newest_first(items: &[Item]) -> Vec<Item> {
    let mut indexed: Vec<(usize, &Item)> = items.iter().enumerate().collect();
    indexed.sort_by(|(lhs_index, lhs), (rhs_index, rhs)| {
        rhs.created_at.cmp(&lhs.created_at).then_with(|| rhs_index.cmp(lhs_index))
    });
    indexed.into_iter().map(|(_, item)| item.clone()).collect()
}

/// All notes ordered newest `created_at` first; equal timestamps keep the
/// later-appended note first, matching [`latest_note_by_item`].
#[must_use]
pub fn notes_newest_first(notes: &[InventoryNote]) -> Vec<InventoryNote> {
    let mut indexed: Vec<(usize, &InventoryNote)> = notes.iter().enumerate().collect();
    indexed.sort_by(|(lhs_index, lhs), (rhs_index, rhs)| {
        rhs.created_at.cmp(&lhs.created_at).then_with(|| rhs_index.cmp(lhs_index))
    });
    indexed.into_iter().map(|(_, note)| note.clone()).collect()
}

/// The single most recent note per item, derived from the append-only note
/// collection. Ties on `created_at` resolve toward the later-appended note,
/// so "latest" stays unambiguous under same-instant writes.
#[must_use]
pub fn latest_note_by_item(notes: &[InventoryNote]) -> BTreeMap<ItemId, InventoryNote> {
    let mut latest: BTreeMap<ItemId, InventoryNote> = BTreeMap::new();
    for note in notes {
        match latest.get(&note.item_id) {
            Some(current) if note.created_at < current.created_at => {}
            _ => {
                latest.insert(note.item_id, note.clone());
            }
        }
    }
    latest
}

/// Join list entries with their items, in list insertion order. Entries
/// whose item no longer exists are dropped rather than reported: the join
/// tolerates dangling references instead of failing the whole read.
#[must_use]
pub fn join_list_with_items(dataset: &Dataset) -> Vec<ListEntryWithItem> {
    dataset
        .list_entries
        .iter()
        .filter_map(|entry| {
            dataset.find_item(entry.item_id).map(|item| ListEntryWithItem {
                item: item.clone(),
                entry: entry.clone(),
            })
        })
        .collect()
}
