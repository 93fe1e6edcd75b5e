use std::sync::RwLock;

use chrono::Utc;

use dcbflow_core::{AppendCondition, Position, Query};

use super::r#trait::{EventLog, EventLogError, ReadRange, StoredEvent, UncommittedEvent};

/// In-memory append-only event log.
///
/// Intended for tests/dev. Events are kept in position order, so the event at
/// position `p` lives at index `p - 1`. The condition check and the append run
/// under one write lock.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<StoredEvent>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> EventLogError {
    EventLogError::Unavailable("lock poisoned".to_string())
}

impl EventLog for InMemoryEventLog {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        condition: Option<&AppendCondition>,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut log = self.events.write().map_err(|_| poisoned())?;

        if let Some(cond) = condition {
            let start = (cond.after().value() as usize).min(log.len());
            if let Some(hit) = log[start..]
                .iter()
                .find(|e| cond.is_violated_by(e.position, &e.event_type, &e.tags))
            {
                return Err(EventLogError::ConditionViolated {
                    after: cond.after(),
                    found: hit.position,
                });
            }
        }

        let recorded_at = Utc::now();
        let mut next = Position::new(log.len() as u64).next();
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                position: next,
                event_type: e.event_type,
                tags: e.tags,
                occurred_at: e.occurred_at,
                recorded_at,
                payload: e.payload,
            };
            next = next.next();
            log.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn read(&self, query: &Query, range: ReadRange) -> Result<Vec<StoredEvent>, EventLogError> {
        if query.is_empty() || range.limit == Some(0) {
            return Ok(vec![]);
        }

        let log = self.events.read().map_err(|_| poisoned())?;
        let start = (range.after.value() as usize).min(log.len());
        let limit = range.limit.unwrap_or(usize::MAX);

        Ok(log[start..]
            .iter()
            .take_while(|e| range.contains(e.position))
            .filter(|e| query.matches(&e.event_type, &e.tags))
            .take(limit)
            .cloned()
            .collect())
    }

    fn head(&self) -> Result<Position, EventLogError> {
        let log = self.events.read().map_err(|_| poisoned())?;
        Ok(Position::new(log.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use dcbflow_core::{QueryItem, Tag};
    use serde_json::json;

    use super::*;
    use dcbflow_core::EventId;

    fn event(event_type: &str, tags: &[&str]) -> UncommittedEvent {
        UncommittedEvent {
            event_id: EventId::new(),
            event_type: event_type.to_string(),
            tags: tags.iter().map(|t| Tag::parse(t).unwrap()).collect(),
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    fn cart_query(cart: &str) -> Query {
        Query::single(QueryItem::new().tag(Tag::new("cart_id", cart)))
    }

    #[test]
    fn positions_are_global_and_consecutive() {
        let log = InMemoryEventLog::new();
        let a = log.append(vec![event("A", &["cart_id:1"])], None).unwrap();
        let b = log
            .append(vec![event("B", &["cart_id:2"]), event("C", &["cart_id:1"])], None)
            .unwrap();

        assert_eq!(a[0].position, Position::new(1));
        assert_eq!(b[0].position, Position::new(2));
        assert_eq!(b[1].position, Position::new(3));
        assert_eq!(log.head().unwrap(), Position::new(3));
    }

    #[test]
    fn condition_rejects_the_whole_batch() {
        let log = InMemoryEventLog::new();
        log.append(vec![event("A", &["cart_id:1"])], None).unwrap();

        let stale = AppendCondition::new(cart_query("1"), Position::START);
        let err = log
            .append(vec![event("B", &["cart_id:1"]), event("C", &["cart_id:1"])], Some(&stale))
            .unwrap_err();

        assert_eq!(
            err,
            EventLogError::ConditionViolated {
                after: Position::START,
                found: Position::new(1)
            }
        );
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn unrelated_events_do_not_violate() {
        let log = InMemoryEventLog::new();
        log.append(vec![event("A", &["cart_id:2"])], None).unwrap();

        let cond = AppendCondition::new(cart_query("1"), Position::START);
        assert!(log.append(vec![event("B", &["cart_id:1"])], Some(&cond)).is_ok());
    }

    #[test]
    fn read_respects_range_and_limit() {
        let log = InMemoryEventLog::new();
        for _ in 0..5 {
            log.append(vec![event("A", &["cart_id:1"])], None).unwrap();
        }

        let q = cart_query("1");
        let page = log
            .read(&q, ReadRange::after(Position::new(1)).until(Position::new(4)).limit(2))
            .unwrap();
        let positions: Vec<u64> = page.iter().map(|e| e.position.value()).collect();
        assert_eq!(positions, vec![2, 3]);

        assert!(log.read(&Query::empty(), ReadRange::from_start()).unwrap().is_empty());
    }
}
