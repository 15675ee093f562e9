//! Fetching server-paginated collections in full.

use std::future::Future;

use log::debug;

use crate::portal::error::ClientError;
use crate::portal::models::Record;

/// Page size used when the caller does not choose one.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Sort order requested for list calls.
pub const DEFAULT_SORT: &str = "name=asc";

/// Parameters for one page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Records per page, always at least 1.
    pub page_size: usize,
    /// 1-based page number.
    pub page_number: usize,
    /// Server sort expression, e.g. `name=asc`.
    pub sort: String,
}

impl PageRequest {
    /// Form fields for the request, in the order the service expects.
    #[must_use]
    pub fn form_fields(&self) -> [(&'static str, String); 3] {
        [
            ("pageSize", self.page_size.to_string()),
            ("pageNumber", self.page_number.to_string()),
            ("sort", self.sort.clone()),
        ]
    }
}

/// Drives page fetches until the collection is exhausted.
#[derive(Debug, Clone)]
pub struct Paginator {
    page_size: usize,
    sort: String,
}

impl Paginator {
    /// Create a paginator. A page size of 0 is treated as 1.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            sort: DEFAULT_SORT.to_string(),
        }
    }

    /// Use a different sort expression.
    #[must_use]
    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = sort.into();
        self
    }

    /// Configured page size.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch every page and concatenate the records in page order.
    ///
    /// Page 1 is requested first. A page holding exactly `page_size` records
    /// means another may follow; the first short (or empty) page ends the
    /// walk. Pages are requested one after another.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `fetch_page`.
    pub async fn fetch_all<T, F, Fut>(&self, mut fetch_page: F) -> Result<Vec<T>, ClientError>
    where
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ClientError>>,
    {
        let mut records = Vec::new();
        let mut page_number = 1;

        loop {
            let page = fetch_page(PageRequest {
                page_size: self.page_size,
                page_number,
                sort: self.sort.clone(),
            })
            .await?;

            let count = page.len();
            debug!("page {page_number}: {count} record(s)");
            records.extend(page);

            if count < self.page_size {
                return Ok(records);
            }
            page_number += 1;
        }
    }
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// Take the record array stored under `key` in a page body.
///
/// # Errors
///
/// Returns [`ClientError::Decode`] if `key` is missing or is not an array of objects.
pub fn records_from_page(body: &serde_json::Value, key: &str) -> Result<Vec<Record>, ClientError> {
    let items = body
        .get(key)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ClientError::Decode(format!("missing `{key}` array in response")))?;

    items
        .iter()
        .map(|item| {
            item.as_object()
                .cloned()
                .ok_or_else(|| ClientError::Decode(format!("non-object entry in `{key}`")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn source(len: usize) -> Vec<String> {
        let mut names: Vec<String> = (1..len).map(|i| format!("Phone {i}")).collect();
        names.push("The last phone".to_string());
        names
    }

    async fn collect(source: &[String], page_size: usize) -> (Vec<String>, usize) {
        let calls = Cell::new(0);
        let paginator = Paginator::new(page_size);
        let records = paginator
            .fetch_all(|page| {
                calls.set(calls.get() + 1);
                let start = (page.page_number - 1) * page.page_size;
                let slice: Vec<String> = source.iter().skip(start).take(page.page_size).cloned().collect();
                async move { Ok(slice) }
            })
            .await
            .expect("fetch");
        (records, calls.get())
    }

    #[tokio::test]
    async fn result_is_invariant_to_page_size() {
        let source = source(9);

        let (small, small_calls) = collect(&source, 8).await;
        let (large, large_calls) = collect(&source, 500).await;

        assert_eq!(small_calls, 2);
        assert_eq!(large_calls, 1);
        assert_eq!(small, source);
        assert_eq!(large, small);
        assert_eq!(small.last().map(String::as_str), Some("The last phone"));
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_empty_page() {
        let source = source(8);
        let (records, calls) = collect(&source, 4).await;
        assert_eq!(calls, 3);
        assert_eq!(records.len(), 8);
    }

    #[tokio::test]
    async fn empty_collection_is_one_call() {
        let (records, calls) = collect(&[], 500).await;
        assert_eq!(calls, 1);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn page_requests_carry_size_number_and_sort() {
        let seen = std::cell::RefCell::new(Vec::new());
        let paginator = Paginator::new(2).with_sort("name=desc");
        let _ = paginator
            .fetch_all(|page| {
                let full = page.page_number == 1;
                seen.borrow_mut().push(page);
                async move { Ok(if full { vec![1, 2] } else { vec![3] }) }
            })
            .await
            .expect("fetch");

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].page_number, 2);
        assert_eq!(
            seen[1].form_fields(),
            [
                ("pageSize", "2".to_string()),
                ("pageNumber", "2".to_string()),
                ("sort", "name=desc".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn errors_stop_the_walk() {
        let paginator = Paginator::new(1);
        let result: Result<Vec<u8>, _> = paginator
            .fetch_all(|page| async move {
                if page.page_number == 2 {
                    Err(ClientError::SessionExpired)
                } else {
                    Ok(vec![1])
                }
            })
            .await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
    }

    #[test]
    fn records_are_read_from_the_named_array() {
        let body = serde_json::json!({"devices": [{"name": "a"}, {"name": "b"}], "resultCode": 0});
        let records = records_from_page(&body, "devices").expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("name"), Some(&serde_json::json!("b")));

        assert!(matches!(
            records_from_page(&body, "appIds"),
            Err(ClientError::Decode(_))
        ));
    }

    #[test]
    fn default_page_size_is_500() {
        assert_eq!(Paginator::default().page_size(), 500);
        assert_eq!(Paginator::new(0).page_size(), 1);
    }
}
