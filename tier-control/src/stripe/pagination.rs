//! Cursor pagination over Stripe list endpoints.
//!
//! Stripe lists respond with `{data: [...], has_more: bool}` and continue
//! from a cursor passed as `starting_after=<last id>`. [`slurp`] walks the
//! cursor until `has_more` is false and concatenates the pages, preserving
//! provider order and any caller-supplied form values.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::client::Client;
use super::form::Form;
use crate::error::Result;

/// The largest page size Stripe accepts; used unless the caller sets
/// `limit` themselves.
pub const MAX_PAGE_SIZE: u64 = 100;

/// One page of a Stripe list response.
#[derive(Debug, Deserialize)]
pub struct List<T> {
    /// The elements of this page, in provider order.
    pub data: Vec<T>,
    /// Whether another page exists past the last element.
    #[serde(default)]
    pub has_more: bool,
}

/// A list element that exposes its provider id, used as the pagination
/// cursor.
pub trait PageItem {
    /// The provider id of this element.
    fn page_id(&self) -> &str;
}

/// Fetches every element of a paginated list.
///
/// Repeats the request with `starting_after` set to the previous page's
/// last id until the provider reports `has_more == false`. Caller-supplied
/// form values are preserved across pages.
///
/// # Errors
///
/// Returns the first error from [`Client::do_request`]; pages fetched so
/// far are discarded.
pub async fn slurp<T>(client: &Client, method: &str, path: &str, form: Form) -> Result<Vec<T>>
where
    T: DeserializeOwned + PageItem,
{
    let mut form = form;
    if form.get("limit").is_none() {
        form.set("limit", MAX_PAGE_SIZE);
    }

    let mut all = Vec::new();
    loop {
        let page: List<T> = client.do_request(method, path, &form).await?;
        let has_more = page.has_more;
        let cursor = page.data.last().map(|item| item.page_id().to_owned());
        all.extend(page.data);

        match (has_more, cursor) {
            (true, Some(id)) => form.set("starting_after", id),
            _ => return Ok(all),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Obj {
        id: String,
    }

    impl PageItem for Obj {
        fn page_id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn list_decodes_with_and_without_has_more() {
        let page: List<Obj> =
            serde_json::from_str(r#"{"data": [{"id": "a"}], "has_more": true}"#).unwrap();
        assert!(page.has_more);
        assert_eq!(page.data[0].id, "a");

        let page: List<Obj> = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(!page.has_more);
        assert!(page.data.is_empty());
    }
}
