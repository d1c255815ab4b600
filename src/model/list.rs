use std::future::Future;

use serde::{Deserialize, Serialize};

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResult<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Cursor for the next page; `None` once the listing is exhausted.
    #[serde(rename = "paginationKey")]
    pub pagination_key: Option<String>,
}

impl<T> ListResult<T> {
    /// Build a page.
    pub fn of(items: Vec<T>, pagination_key: Option<String>) -> Self {
        Self {
            items,
            pagination_key,
        }
    }
}

/// Eagerly drain every page produced by `producer`.
///
/// The producer receives the pagination key of the page to fetch; the first
/// call receives `None`.
pub async fn all_list_results<T, E, F, Fut>(mut producer: F) -> Result<Vec<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListResult<T>, E>>,
{
    let mut items = Vec::new();
    let mut pagination_key = None;
    loop {
        let page = producer(pagination_key.take()).await?;
        items.extend(page.items);
        match page.pagination_key {
            Some(key) if !key.is_empty() => pagination_key = Some(key),
            _ => return Ok(items),
        }
    }
}
