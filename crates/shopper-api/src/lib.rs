use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use shopper_core::{
    items_newest_first, join_list_with_items, latest_note_by_item, normalize_optional,
    normalize_required, notes_newest_first, DomainError, InventoryNote, Item, ItemId, ListEntry,
    ListEntryWithItem, NoteId,
};
use shopper_store_json::{JsonStore, StoreError};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Fields accepted when creating an item. Optional text that trims to empty
/// collapses to null.
#[derive(Debug, Clone, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub default_store: Option<String>,
}

/// Partial update for an item. Absent fields are left unchanged; a supplied
/// optional field that trims to empty clears the stored value to null.
#[derive(Debug, Clone, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub default_store: Option<String>,
}

/// The record store: every operation is one lock → load → mutate → store
/// cycle over the whole dataset. The in-process lock serializes the cycles,
/// so concurrent callers on one process cannot clobber each other's writes.
/// Absence is reported as `None`/`false`, never as an error; only validation
/// failures and storage faults are errors, and a failed validation never
/// reaches the storage medium.
#[derive(Debug, Clone)]
pub struct ShopperApi {
    store: JsonStore,
    guard: Arc<Mutex<()>>,
}

impl ShopperApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { store: JsonStore::new(db_path), guard: Arc::new(Mutex::new(())) }
    }

    fn locked(&self) -> MutexGuard<'_, ()> {
        // A poisoned lock only means another cycle panicked after its write
        // was already complete or not started; the dataset itself is intact.
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All catalog items, newest first.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when the dataset cannot be loaded.
    pub fn list_items(&self) -> Result<Vec<Item>, ApiError> {
        let _guard = self.locked();
        let dataset = self.store.load()?;
        Ok(items_newest_first(&dataset.items))
    }

    /// Look up one item by id.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when the dataset cannot be loaded.
    pub fn get_item(&self, id: ItemId) -> Result<Option<Item>, ApiError> {
        let _guard = self.locked();
        let dataset = self.store.load()?;
        Ok(dataset.find_item(id).cloned())
    }

    /// Create a catalog item with a fresh id and the current timestamp.
    ///
    /// # Errors
    /// Returns [`ApiError::Domain`] when the name trims to empty (nothing is
    /// persisted), or [`ApiError::Storage`] on load/store failure.
    pub fn create_item(&self, input: NewItem) -> Result<Item, ApiError> {
        let name = normalize_required("name", &input.name)?;
        let _guard = self.locked();
        let mut dataset = self.store.load()?;

        let item = Item {
            id: ItemId::new(),
            name,
            category: normalize_optional(input.category),
            default_store: normalize_optional(input.default_store),
            created_at: OffsetDateTime::now_utc(),
        };
        dataset.items.push(item.clone());
        self.store.store(&dataset)?;
        Ok(item)
    }

    /// Apply a partial update to an item. Unknown id is `None`, not an
    /// error, and leaves the dataset untouched.
    ///
    /// # Errors
    /// Returns [`ApiError::Domain`] when a supplied name trims to empty, or
    /// [`ApiError::Storage`] on load/store failure.
    pub fn update_item(&self, id: ItemId, patch: ItemPatch) -> Result<Option<Item>, ApiError> {
        let name = patch.name.as_deref().map(|name| normalize_required("name", name)).transpose()?;

        let _guard = self.locked();
        let mut dataset = self.store.load()?;
        let Some(item) = dataset.items.iter_mut().find(|item| item.id == id) else {
            return Ok(None);
        };

        if let Some(name) = name {
            item.name = name;
        }
        if let Some(category) = patch.category {
            item.category = normalize_optional(Some(category));
        }
        if let Some(default_store) = patch.default_store {
            item.default_store = normalize_optional(Some(default_store));
        }

        let updated = item.clone();
        self.store.store(&dataset)?;
        Ok(Some(updated))
    }

    /// Delete an item and cascade: its list entry and all of its inventory
    /// notes are removed in the same persisted write. Unknown id is a
    /// `false` no-op.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] on load/store failure.
    pub fn delete_item(&self, id: ItemId) -> Result<bool, ApiError> {
        let _guard = self.locked();
        let mut dataset = self.store.load()?;
        let before = dataset.items.len();
        dataset.items.retain(|item| item.id != id);
        if dataset.items.len() == before {
            return Ok(false);
        }

        dataset.list_entries.retain(|entry| entry.item_id != id);
        dataset.inventory_notes.retain(|note| note.item_id != id);
        self.store.store(&dataset)?;
        Ok(true)
    }

    /// The shopping list joined with item details, in list order. Entries
    /// whose item vanished are dropped from the result.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when the dataset cannot be loaded.
    pub fn get_list(&self) -> Result<Vec<ListEntryWithItem>, ApiError> {
        let _guard = self.locked();
        let dataset = self.store.load()?;
        Ok(join_list_with_items(&dataset))
    }

    /// Put an item on the list. Re-adding an item already on the list
    /// refreshes it instead of duplicating: `picked_up` resets to false and
    /// `added_at` moves to now, while `unavailable` is left as it was.
    /// Unknown item is `None`.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] on load/store failure.
    pub fn add_to_list(&self, item_id: ItemId) -> Result<Option<ListEntry>, ApiError> {
        let _guard = self.locked();
        let mut dataset = self.store.load()?;
        if !dataset.has_item(item_id) {
            return Ok(None);
        }

        let entry = if let Some(existing) = dataset.find_entry_mut(item_id) {
            existing.picked_up = false;
            existing.added_at = OffsetDateTime::now_utc();
            existing.clone()
        } else {
            let entry = ListEntry {
                item_id,
                picked_up: false,
                unavailable: false,
                added_at: OffsetDateTime::now_utc(),
            };
            dataset.list_entries.push(entry.clone());
            entry
        };

        self.store.store(&dataset)?;
        Ok(Some(entry))
    }

    /// Set the picked-up flag on an existing list entry. No entry is `None`.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] on load/store failure.
    pub fn set_picked_up(
        &self,
        item_id: ItemId,
        picked_up: bool,
    ) -> Result<Option<ListEntry>, ApiError> {
        self.update_entry(item_id, |entry| entry.picked_up = picked_up)
    }

    /// Set the unavailable flag on an existing list entry. Independent of
    /// `picked_up`: setting one never clears the other.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] on load/store failure.
    pub fn set_unavailable(
        &self,
        item_id: ItemId,
        unavailable: bool,
    ) -> Result<Option<ListEntry>, ApiError> {
        self.update_entry(item_id, |entry| entry.unavailable = unavailable)
    }

    fn update_entry(
        &self,
        item_id: ItemId,
        apply: impl FnOnce(&mut ListEntry),
    ) -> Result<Option<ListEntry>, ApiError> {
        let _guard = self.locked();
        let mut dataset = self.store.load()?;
        let Some(entry) = dataset.find_entry_mut(item_id) else {
            return Ok(None);
        };

        apply(entry);
        let updated = entry.clone();
        self.store.store(&dataset)?;
        Ok(Some(updated))
    }

    /// Remove the entry for one item from the list; `false` if none existed.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] on load/store failure.
    pub fn remove_from_list(&self, item_id: ItemId) -> Result<bool, ApiError> {
        let _guard = self.locked();
        let mut dataset = self.store.load()?;
        let before = dataset.list_entries.len();
        dataset.list_entries.retain(|entry| entry.item_id != item_id);
        if dataset.list_entries.len() == before {
            return Ok(false);
        }

        self.store.store(&dataset)?;
        Ok(true)
    }

    /// Empty the list. An already-empty list is a `false` no-op with no
    /// write.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] on load/store failure.
    pub fn clear_list(&self) -> Result<bool, ApiError> {
        let _guard = self.locked();
        let mut dataset = self.store.load()?;
        if dataset.list_entries.is_empty() {
            return Ok(false);
        }

        dataset.list_entries.clear();
        self.store.store(&dataset)?;
        Ok(true)
    }

    /// All inventory notes, newest first.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when the dataset cannot be loaded.
    pub fn list_inventory_notes(&self) -> Result<Vec<InventoryNote>, ApiError> {
        let _guard = self.locked();
        let dataset = self.store.load()?;
        Ok(notes_newest_first(&dataset.inventory_notes))
    }

    /// Notes for one item, newest first.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when the dataset cannot be loaded.
    pub fn notes_for_item(&self, item_id: ItemId) -> Result<Vec<InventoryNote>, ApiError> {
        let notes = self.list_inventory_notes()?;
        Ok(notes.into_iter().filter(|note| note.item_id == item_id).collect())
    }

    /// The single most recent note per item, derived from the append-only
    /// note collection on every call.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when the dataset cannot be loaded.
    pub fn latest_note_by_item(&self) -> Result<BTreeMap<ItemId, InventoryNote>, ApiError> {
        let _guard = self.locked();
        let dataset = self.store.load()?;
        Ok(latest_note_by_item(&dataset.inventory_notes))
    }

    /// Append a stock note for an item. Unknown item is `None`.
    ///
    /// # Errors
    /// Returns [`ApiError::Domain`] when the note trims to empty (nothing is
    /// persisted), or [`ApiError::Storage`] on load/store failure.
    pub fn add_inventory_note(
        &self,
        item_id: ItemId,
        note: &str,
    ) -> Result<Option<InventoryNote>, ApiError> {
        let note = normalize_required("note", note)?;
        let _guard = self.locked();
        let mut dataset = self.store.load()?;
        if !dataset.has_item(item_id) {
            return Ok(None);
        }

        let note = InventoryNote {
            id: NoteId::new(),
            item_id,
            note,
            created_at: OffsetDateTime::now_utc(),
        };
        dataset.inventory_notes.push(note.clone());
        self.store.store(&dataset)?;
        Ok(Some(note))
    }
}
