#![forbid(unsafe_code)]

//! List items captured from the archive page and the collections built from
//! them.
//!
//! Identity is the `(title, link)` pair after normalization: titles are
//! trimmed, links have whitespace removed and are resolved to absolute URLs.
//! Two items are the same item iff both strings compare equal.

use url::Url;

/// One entry of the archive list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListItem {
    title: String,
    link: String,
}

impl ListItem {
    /// Builds an item from already absolute values, applying the title and
    /// whitespace normalization.
    pub fn new(title: impl AsRef<str>, link: impl AsRef<str>) -> Self {
        Self {
            title: title.as_ref().trim().to_string(),
            link: strip_whitespace(link.as_ref()),
        }
    }

    /// Builds an item from raw page values, resolving relative links against
    /// the page they were found on.
    pub fn captured(title: &str, href: &str, page_url: &Url) -> Self {
        Self {
            title: title.trim().to_string(),
            link: normalize_link(href, page_url),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn link(&self) -> &str {
        &self.link
    }
}

/// Removes every whitespace character and resolves the result against
/// `page_url`. Empty links stay empty; links that cannot be joined are kept
/// as they are.
pub fn normalize_link(href: &str, page_url: &Url) -> String {
    let compact = strip_whitespace(href);
    if compact.is_empty() {
        return compact;
    }
    match page_url.join(&compact) {
        Ok(absolute) => absolute.to_string(),
        Err(_) => compact,
    }
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Items matched at one scan position, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub position: usize,
    pub items: Vec<ListItem>,
}

impl Snapshot {
    /// The item the position refers to. Positional selectors normally match
    /// a single card; when several match, the first one in page order wins.
    pub fn into_first(self) -> Option<ListItem> {
        self.items.into_iter().next()
    }
}

/// Newly discovered items of one run, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    items: Vec<ListItem>,
}

impl Batch {
    /// Appends `item` unless it is already part of the batch. Returns whether
    /// the item was added.
    pub fn push(&mut self, item: ListItem) -> bool {
        if self.items.contains(&item) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// The item captured at the lowest position.
    pub fn newest(&self) -> Option<&ListItem> {
        self.items.first()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ListItem> {
        self.items.iter()
    }

    pub fn into_items(self) -> Vec<ListItem> {
        self.items
    }
}

impl FromIterator<ListItem> for Batch {
    fn from_iter<I: IntoIterator<Item = ListItem>>(iter: I) -> Self {
        let mut batch = Batch::default();
        for item in iter {
            batch.push(item);
        }
        batch
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a ListItem;
    type IntoIter = std::slice::Iter<'a, ListItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
