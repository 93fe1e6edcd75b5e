//! Query engine: lazy, position-ordered reads up to a fixed tail.
//!
//! A [`QueryStream`] captures the log head when it is opened and pages through
//! matching events until that tail. Every matching event in `(after, tail]` is
//! delivered exactly once, in increasing position order. Events appended after
//! the stream was opened are left for the next read.

use std::collections::VecDeque;

use dcbflow_core::{Position, Query};

use super::r#trait::{EventLog, EventLogError, ReadRange, StoredEvent};

/// Default number of events fetched per page.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Lazy sequence of events matching a query.
pub struct QueryStream<'a, L>
where
    L: EventLog + ?Sized,
{
    log: &'a L,
    query: Query,
    cursor: Position,
    tail: Position,
    batch_size: usize,
    buffer: VecDeque<StoredEvent>,
    exhausted: bool,
}

impl<'a, L> QueryStream<'a, L>
where
    L: EventLog + ?Sized,
{
    /// Open a stream over events matching `query` with position > `after`.
    pub fn open(
        log: &'a L,
        query: Query,
        after: Position,
        batch_size: usize,
    ) -> Result<Self, EventLogError> {
        let tail = log.head()?;
        let exhausted = query.is_empty() || after >= tail;

        Ok(Self {
            log,
            query,
            cursor: after,
            tail,
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            exhausted,
        })
    }

    /// Highest position this stream covers (the log head when it was opened).
    pub fn position(&self) -> Position {
        self.tail
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    fn fill(&mut self) -> Result<(), EventLogError> {
        let range = ReadRange::after(self.cursor)
            .until(self.tail)
            .limit(self.batch_size);
        let page = self.log.read(&self.query, range)?;

        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => self.cursor = last.position,
            None => self.exhausted = true,
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<L> Iterator for QueryStream<'_, L>
where
    L: EventLog + ?Sized,
{
    type Item = Result<StoredEvent, EventLogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Fully materialized query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub events: Vec<StoredEvent>,
    /// The log head when the read began.
    pub position: Position,
}

/// Read every event matching `query` after `after`, up to the current head.
pub fn read_all<L>(log: &L, query: &Query, after: Position) -> Result<QueryResult, EventLogError>
where
    L: EventLog + ?Sized,
{
    let stream = QueryStream::open(log, query.clone(), after, DEFAULT_BATCH_SIZE)?;
    let position = stream.position();
    let events = stream.collect::<Result<Vec<_>, _>>()?;
    Ok(QueryResult { events, position })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;

    use dcbflow_core::{EventId, QueryItem, Tag};

    use super::*;
    use crate::event_log::{InMemoryEventLog, UncommittedEvent};

    const TYPES: [&str; 3] = ["A", "B", "C"];

    fn seed(log: &InMemoryEventLog, layout: &[(usize, u8)]) {
        for (ty, cart) in layout {
            log.append(
                vec![UncommittedEvent {
                    event_id: EventId::new(),
                    event_type: TYPES[*ty].to_string(),
                    tags: vec![Tag::new("cart_id", cart)],
                    occurred_at: Utc::now(),
                    payload: json!({}),
                }],
                None,
            )
            .unwrap();
        }
    }

    #[test]
    fn stream_stops_at_the_tail_captured_on_open() {
        let log = InMemoryEventLog::new();
        seed(&log, &[(0, 1), (0, 1)]);

        let q = Query::single(QueryItem::new().types(["A"]));
        let stream = QueryStream::open(&log, q, Position::START, 1).unwrap();
        assert_eq!(stream.position(), Position::new(2));

        seed(&log, &[(0, 1)]);
        let seen: Vec<_> = stream.map(|e| e.unwrap().position.value()).collect();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn empty_query_reports_the_tail_but_yields_nothing() {
        let log = InMemoryEventLog::new();
        seed(&log, &[(0, 1)]);

        let result = read_all(&log, &Query::empty(), Position::START).unwrap();
        assert!(result.events.is_empty());
        assert_eq!(result.position, Position::new(1));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, ..ProptestConfig::default() })]

        /// Replaying from any position yields exactly the matching events,
        /// once each, in increasing order, regardless of page size.
        #[test]
        fn replay_delivers_every_match_once_in_order(
            layout in prop::collection::vec((0usize..3, 0u8..3), 0..60),
            wanted_type in 0usize..3,
            wanted_cart in 0u8..3,
            from in 0u64..70,
            batch in 1usize..8,
        ) {
            let log = InMemoryEventLog::new();
            seed(&log, &layout);

            let q = Query::single(QueryItem::new().types([TYPES[wanted_type]]))
                .or(QueryItem::new().tag(Tag::new("cart_id", wanted_cart)));

            let expected: Vec<u64> = layout
                .iter()
                .enumerate()
                .map(|(i, s)| (i as u64 + 1, s))
                .filter(|(p, (ty, cart))| *p > from && (*ty == wanted_type || *cart == wanted_cart))
                .map(|(p, _)| p)
                .collect();

            let stream = QueryStream::open(&log, q, Position::new(from), batch).unwrap();
            let got: Vec<u64> = stream.map(|e| e.unwrap().position.value()).collect();

            prop_assert_eq!(got, expected);
        }
    }
}
