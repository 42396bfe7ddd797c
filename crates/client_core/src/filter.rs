use std::cmp::Ordering;

use shared::protocol::{ItemSnapshot, ItemsFilter, SortBy, SortOrder};

use crate::view_state::ListViewState;

/// Items as the view shows them: search and priority filters applied, the
/// random pick first, unwatched before watched, then the requested order.
pub fn visible_items(
    items: &[ItemSnapshot],
    filter: &ItemsFilter,
    view_state: &ListViewState,
) -> Vec<ItemSnapshot> {
    let query = view_state.search_query().trim().to_lowercase();
    let mut visible: Vec<ItemSnapshot> = items
        .iter()
        .filter(|item| query.is_empty() || item.title.to_lowercase().contains(&query))
        .filter(|item| filter.priority.matches(item.priority))
        .cloned()
        .collect();

    let picked = view_state.picked();
    visible.sort_by(|a, b| {
        let a_picked = picked == Some(&a.id);
        let b_picked = picked == Some(&b.id);
        b_picked
            .cmp(&a_picked)
            .then_with(|| a.is_watched().cmp(&b.is_watched()))
            .then_with(|| compare_by(filter, a, b))
    });
    visible
}

fn compare_by(filter: &ItemsFilter, a: &ItemSnapshot, b: &ItemSnapshot) -> Ordering {
    let ordering = sort_key(filter.sort_by, a).cmp(&sort_key(filter.sort_by, b));
    match filter.sort_order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn sort_key(sort_by: SortBy, item: &ItemSnapshot) -> i64 {
    match sort_by {
        SortBy::DateAdded => item
            .watched_at
            .unwrap_or(item.created_at)
            .timestamp_millis(),
        SortBy::Duration => item.duration.unwrap_or(i64::MAX),
        SortBy::Rating => item.rating.unwrap_or(i64::MAX),
        SortBy::Priority => item.priority,
    }
}

#[cfg(test)]
#[path = "tests/filter_tests.rs"]
mod tests;
