//! Type + tag filters over the event log.
//!
//! A [`QueryItem`] matches an event iff its type filter and its tag filter both
//! accept it; a [`Query`] matches an event iff any of its items does. Both
//! commands (to scope a decision) and consumers (to subscribe) use the same
//! primitive.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::tag::Tag;

/// One conjunctive filter: event type in `types` AND every tag of `tags` present.
///
/// An empty `types` set accepts any type; an empty `tags` set accepts any tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryItem {
    types: BTreeSet<String>,
    tags: BTreeSet<Tag>,
}

impl QueryItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given event types (added to any already present).
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Require all of the given tags (added to any already present).
    pub fn tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.tags.extend(tags);
        self
    }

    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn event_types(&self) -> &BTreeSet<String> {
        &self.types
    }

    pub fn required_tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    pub fn matches(&self, event_type: &str, event_tags: &[Tag]) -> bool {
        let type_ok = self.types.is_empty() || self.types.contains(event_type);
        type_ok && self.tags.iter().all(|t| event_tags.contains(t))
    }
}

/// Ordered list of [`QueryItem`]s combined with logical OR.
///
/// The empty query matches nothing: scoping is always explicit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query {
    items: Vec<QueryItem>,
}

impl Query {
    pub fn new(items: Vec<QueryItem>) -> Self {
        Self { items }
    }

    /// The query that matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(item: QueryItem) -> Self {
        Self { items: vec![item] }
    }

    /// Every event whose type is in `types`, regardless of tags.
    pub fn of_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::single(QueryItem::new().types(types))
    }

    /// Append another OR-branch.
    pub fn or(mut self, item: QueryItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn items(&self) -> &[QueryItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn matches(&self, event_type: &str, event_tags: &[Tag]) -> bool {
        self.items.iter().any(|i| i.matches(event_type, event_tags))
    }
}

impl FromIterator<QueryItem> for Query {
    fn from_iter<T: IntoIterator<Item = QueryItem>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tags(raw: &[&str]) -> Vec<Tag> {
        raw.iter().map(|r| Tag::parse(r).unwrap()).collect()
    }

    #[test]
    fn empty_item_matches_everything() {
        let item = QueryItem::new();
        assert!(item.matches("Anything", &[]));
        assert!(item.matches("Other", &tags(&["a:1"])));
    }

    #[test]
    fn item_requires_type_and_tag_subset() {
        let item = QueryItem::new()
            .types(["ItemAdded", "ItemRemoved"])
            .tag(Tag::new("cart_id", "A"));

        assert!(item.matches("ItemAdded", &tags(&["cart_id:A", "item_id:1"])));
        assert!(!item.matches("ItemAdded", &tags(&["cart_id:B"])));
        assert!(!item.matches("CartCleared", &tags(&["cart_id:A"])));
        assert!(!item.matches("ItemAdded", &[]));
    }

    #[test]
    fn query_is_or_of_items() {
        let q = Query::single(QueryItem::new().types(["X"]))
            .or(QueryItem::new().tag(Tag::new("product_id", "P")));

        assert!(q.matches("X", &[]));
        assert!(q.matches("Y", &tags(&["product_id:P"])));
        assert!(!q.matches("Y", &tags(&["product_id:Q"])));
    }

    #[test]
    fn empty_query_matches_nothing() {
        let q = Query::empty();
        assert!(q.is_empty());
        assert!(!q.matches("ItemAdded", &tags(&["cart_id:A"])));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Adding an OR-branch never makes a previously matching event stop matching.
        #[test]
        fn adding_items_only_widens_the_match(
            event_tag in 0u8..4,
            first_tag in 0u8..4,
            second_tag in 0u8..4,
        ) {
            let event_tags = vec![Tag::new("k", event_tag)];
            let base = Query::single(QueryItem::new().tag(Tag::new("k", first_tag)));
            let widened = base.clone().or(QueryItem::new().tag(Tag::new("k", second_tag)));

            if base.matches("T", &event_tags) {
                prop_assert!(widened.matches("T", &event_tags));
            }
            prop_assert_eq!(
                widened.matches("T", &event_tags),
                event_tag == first_tag || event_tag == second_tag
            );
        }
    }
}
