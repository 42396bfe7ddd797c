use rand::{seq::SliceRandom, Rng};
use shared::domain::{ItemId, ListId};

/// Per-view selection, random pick and search query. Lives as long as the
/// mounted view and is never sent anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListViewState {
    list_id: ListId,
    selected: Vec<ItemId>,
    picked: Option<ItemId>,
    search_query: String,
}

impl ListViewState {
    pub fn new(list_id: ListId) -> Self {
        Self {
            list_id,
            selected: Vec::new(),
            picked: None,
            search_query: String::new(),
        }
    }

    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    pub fn selected(&self) -> &[ItemId] {
        &self.selected
    }

    pub fn is_selected(&self, item_id: &ItemId) -> bool {
        self.selected.contains(item_id)
    }

    pub fn picked(&self) -> Option<&ItemId> {
        self.picked.as_ref()
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn toggle_selection(&mut self, item_id: &ItemId) {
        if let Some(position) = self.selected.iter().position(|id| id == item_id) {
            self.selected.remove(position);
        } else {
            self.selected.push(item_id.clone());
        }
    }

    /// Replaces the selection; later duplicates are dropped.
    pub fn select_items(&mut self, item_ids: impl IntoIterator<Item = ItemId>) {
        self.selected.clear();
        for item_id in item_ids {
            if !self.selected.contains(&item_id) {
                self.selected.push(item_id);
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Picks uniformly from the current selection. With nothing selected the
    /// previous pick is cleared and `None` returned.
    pub fn pick_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<ItemId> {
        self.picked = self.selected.choose(rng).cloned();
        self.picked.clone()
    }

    pub fn clear_pick(&mut self) {
        self.picked = None;
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }
}

#[cfg(test)]
#[path = "tests/view_state_tests.rs"]
mod tests;
