// src/core/rpc/paginator.rs

//! Cursor pagination for List RPCs. Cursors are opaque server-supplied
//! tokens: the key of the next entity in iteration order.

use serde::{Deserialize, Serialize};

/// Pagination fields shared by List payloads.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PageRequest {
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub next_token: String,
    /// A boolean filter expression applied before pagination.
    #[serde(default)]
    pub filter: String,
}

/// Pagination metadata returned with a truncated page.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Pages `items` (already sorted in iteration order) according to the
/// request. `key` extracts each item's cursor key.
pub fn paginate<T, F>(items: Vec<T>, page: &PageRequest, key: F) -> (Vec<T>, PageMeta)
where
    F: Fn(&T) -> String,
{
    let mut items = items;
    if !page.next_token.is_empty() {
        items.retain(|item| key(item) >= page.next_token);
    }
    if page.per_page == 0 || items.len() <= page.per_page as usize {
        return (items, PageMeta::default());
    }
    let next = key(&items[page.per_page as usize]);
    items.truncate(page.per_page as usize);
    (
        items,
        PageMeta {
            next_token: Some(next),
        },
    )
}
