use std::collections::VecDeque;

use log::debug;
use serde_json::Value;

use crate::{Error, FlickrApi, ResponseFormat, Result, Transport};

const PAGE_KEY: &str = "page";
const PER_PAGE_KEY: &str = "per_page";
const FORMAT_KEY: &str = "format";

/// Items per page the walkers ask for unless told otherwise.
pub const DEFAULT_PER_PAGE: u32 = 50;

/// Calls a paginated method with `page=1`, `page=2`, ... until the `pages`
/// reported by the service have been visited, yielding every item listed.
///
/// Pages are fetched lazily, as the walker is iterated. A failed page ends
/// the walk after its error has been yielded.
#[derive(Debug)]
pub struct PageWalker<'a, T: Transport> {
    api: &'a FlickrApi<T>,
    method: String,
    item_key: &'static str,
    params: Vec<(String, String)>,
    per_page: String,
    page: u64,
    pages: u64,
    items: VecDeque<Value>,
    failed: bool,
}

impl<'a, T: Transport> PageWalker<'a, T> {
    fn new(
        api: &'a FlickrApi<T>,
        method: &str,
        item_key: &'static str,
        per_page: u32,
        params: &[(&str, &str)],
    ) -> Self {
        PageWalker {
            api,
            method: method.to_string(),
            item_key,
            params: params
                .iter()
                .filter(|(k, _)| ![PAGE_KEY, PER_PAGE_KEY, FORMAT_KEY].contains(k))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            per_page: per_page.to_string(),
            page: 1,
            // not known before the first page arrives
            pages: 1,
            items: VecDeque::new(),
            failed: false,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    fn fetch_page(&mut self) -> Result<()> {
        let page = self.page.to_string();
        let mut params: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        params.push((PAGE_KEY, &page));
        params.push((PER_PAGE_KEY, &self.per_page));

        debug!("calling {} (page {} of {})", self.method, self.page, self.pages);
        let response = self
            .api
            .call_as(&self.method, &params, ResponseFormat::ParsedJson)?;
        let listing = response
            .as_json()
            .and_then(find_listing)
            .ok_or_else(|| Error::MissingPages {
                method: self.method.clone(),
            })?;
        let pages = listing.get("pages").and_then(as_count).ok_or_else(|| Error::MissingPages {
            method: self.method.clone(),
        })?;
        let items = listing
            .get(self.item_key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        self.pages = pages;
        self.items.extend(items);
        self.page += 1;
        Ok(())
    }
}

impl<T: Transport> Iterator for PageWalker<'_, T> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.items.pop_front() {
                return Some(Ok(item));
            }
            if self.failed || self.page > self.pages {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}

/// The object carrying the page counters, e.g. `photos` or `photoset`.
fn find_listing(response: &Value) -> Option<&Value> {
    response
        .as_object()?
        .values()
        .find(|value| value.get("pages").is_some())
}

/// Counters come as numbers or as numeric strings, depending on the method.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl<T: Transport> FlickrApi<T> {
    /// Walks `method`, yielding the elements of the `item_key` array of every
    /// page. `page`, `per_page` and `format` in `params` are ignored.
    pub fn data_walker(
        &self,
        method: &str,
        item_key: &'static str,
        per_page: u32,
        params: &[(&str, &str)],
    ) -> PageWalker<'_, T> {
        PageWalker::new(self, method, item_key, per_page, params)
    }

    /// Every photo of a photo search (`flickr.photos.search`).
    pub fn walk(&self, per_page: u32, params: &[(&str, &str)]) -> PageWalker<'_, T> {
        self.data_walker("flickr.photos.search", "photo", per_page, params)
    }

    /// Every photo in the set `photoset_id`.
    pub fn walk_set(&self, photoset_id: &str, per_page: u32, params: &[(&str, &str)]) -> PageWalker<'_, T> {
        let mut params = params.to_vec();
        params.push(("photoset_id", photoset_id));
        self.data_walker("flickr.photosets.getPhotos", "photo", per_page, &params)
    }

    /// Every photo in the photostream of `user_id`, or `me`.
    pub fn walk_user(&self, user_id: &str, per_page: u32, params: &[(&str, &str)]) -> PageWalker<'_, T> {
        let mut params = params.to_vec();
        params.push(("user_id", user_id));
        self.data_walker("flickr.people.getPhotos", "photo", per_page, &params)
    }

    /// Every photo of the calling user updated since `min_date`.
    pub fn walk_user_updates(
        &self,
        min_date: &str,
        per_page: u32,
        params: &[(&str, &str)],
    ) -> PageWalker<'_, T> {
        let mut params = params.to_vec();
        params.push(("min_date", min_date));
        self.data_walker("flickr.photos.recentlyUpdated", "photo", per_page, &params)
    }

    pub fn walk_photosets(&self, per_page: u32, params: &[(&str, &str)]) -> PageWalker<'_, T> {
        self.data_walker("flickr.photosets.getList", "photoset", per_page, params)
    }

    pub fn walk_contacts(&self, per_page: u32, params: &[(&str, &str)]) -> PageWalker<'_, T> {
        self.data_walker("flickr.contacts.getList", "contact", per_page, params)
    }
}
