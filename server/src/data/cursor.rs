//! Generic paged cursor shared by the span backends
//!
//! Backends supply pages through `PageSource` using keyset pagination on
//! `(start_time, span_id)`. The cursor buffers one page at a time, refills
//! on exhaustion and locks its direction on the first movement.

use std::collections::VecDeque;

use async_trait::async_trait;

use super::error::StorageError;
use super::traits::SpanIterator;
use crate::domain::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending `(start_time, span_id)`
    Forward,
    /// Descending `(start_time, span_id)`
    Backward,
}

impl Direction {
    pub fn sql_order(&self) -> &'static str {
        match self {
            Direction::Forward => "ASC",
            Direction::Backward => "DESC",
        }
    }

    /// Keyset comparison operator for rows after the boundary
    pub fn sql_cmp(&self) -> &'static str {
        match self {
            Direction::Forward => ">",
            Direction::Backward => "<",
        }
    }
}

/// Keyset boundary: the last span handed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageKey {
    pub start_time: i64,
    pub span_id: String,
}

impl PageKey {
    pub fn of(span: &Span) -> Self {
        Self {
            start_time: span.start_time,
            span_id: span.span_id.clone(),
        }
    }
}

/// Backend page fetcher
#[async_trait]
pub trait PageSource: Send {
    /// Up to `limit` spans strictly beyond `after` in `direction`, in direction order
    async fn fetch(
        &mut self,
        direction: Direction,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<Span>, StorageError>;

    async fn close(&mut self) {}
}

pub struct PagedIterator<S> {
    source: S,
    page_size: usize,
    direction: Option<Direction>,
    buffer: VecDeque<Span>,
    current: Option<Span>,
    boundary: Option<PageKey>,
    exhausted: bool,
    closed: bool,
}

impl<S: PageSource> PagedIterator<S> {
    pub fn new(source: S, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            direction: None,
            buffer: VecDeque::new(),
            current: None,
            boundary: None,
            exhausted: false,
            closed: false,
        }
    }

    /// Lock (or check) the direction; `restart` rewinds to the edge
    fn begin(&mut self, direction: Direction, restart: bool) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed("iterator"));
        }
        match self.direction {
            Some(locked) if locked != direction => return Err(StorageError::OpNotSupported),
            Some(_) if !restart => return Ok(()),
            _ => {}
        }
        self.direction = Some(direction);
        self.buffer.clear();
        self.current = None;
        self.boundary = None;
        self.exhausted = false;
        Ok(())
    }

    async fn advance(&mut self, direction: Direction) -> Result<bool, StorageError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .source
                .fetch(direction, self.boundary.as_ref(), self.page_size)
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            self.buffer.extend(page);
        }

        match self.buffer.pop_front() {
            Some(span) => {
                self.boundary = Some(PageKey::of(&span));
                self.current = Some(span);
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl<S: PageSource> SpanIterator for PagedIterator<S> {
    async fn first(&mut self) -> Result<bool, StorageError> {
        self.begin(Direction::Forward, true)?;
        self.advance(Direction::Forward).await
    }

    async fn last(&mut self) -> Result<bool, StorageError> {
        self.begin(Direction::Backward, true)?;
        self.advance(Direction::Backward).await
    }

    async fn next(&mut self) -> Result<bool, StorageError> {
        self.begin(Direction::Forward, false)?;
        self.advance(Direction::Forward).await
    }

    async fn prev(&mut self) -> Result<bool, StorageError> {
        self.begin(Direction::Backward, false)?;
        self.advance(Direction::Backward).await
    }

    fn value(&self) -> Option<&Span> {
        self.current.as_ref()
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.buffer.clear();
            self.current = None;
            self.source.close().await;
        }
    }
}

/// Page source over an in-memory snapshot of a trace
pub struct VecPageSource {
    spans: Vec<Span>,
    pub fetches: usize,
}

impl VecPageSource {
    pub fn new(mut spans: Vec<Span>) -> Self {
        spans.sort_by(|a, b| (a.start_time, &a.span_id).cmp(&(b.start_time, &b.span_id)));
        Self { spans, fetches: 0 }
    }
}

#[async_trait]
impl PageSource for VecPageSource {
    async fn fetch(
        &mut self,
        direction: Direction,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<Span>, StorageError> {
        self.fetches += 1;
        let beyond = |s: &Span| match after {
            None => true,
            Some(k) => {
                let key = (s.start_time, s.span_id.as_str());
                let bound = (k.start_time, k.span_id.as_str());
                match direction {
                    Direction::Forward => key > bound,
                    Direction::Backward => key < bound,
                }
            }
        };
        let page = match direction {
            Direction::Forward => self
                .spans
                .iter()
                .filter(|s| beyond(s))
                .take(limit)
                .cloned()
                .collect(),
            Direction::Backward => self
                .spans
                .iter()
                .rev()
                .filter(|s| beyond(s))
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(n: i64) -> Vec<Span> {
        // Deliberately shuffled, with a start_time tie broken by span_id
        let mut out: Vec<Span> = (0..n)
            .rev()
            .map(|i| Span {
                trace_id: "t".into(),
                span_id: format!("s{:02}", i),
                start_time: i / 2,
                end_time: i / 2 + 10,
                ..Default::default()
            })
            .collect();
        out.swap(0, (n as usize) / 2);
        out
    }

    async fn drain(it: &mut PagedIterator<VecPageSource>, forward: bool) -> Vec<String> {
        let mut ids = Vec::new();
        let mut more = if forward {
            it.first().await.unwrap()
        } else {
            it.last().await.unwrap()
        };
        while more {
            ids.push(it.value().unwrap().span_id.clone());
            more = if forward {
                it.next().await.unwrap()
            } else {
                it.prev().await.unwrap()
            };
        }
        ids
    }

    #[tokio::test]
    async fn test_forward_is_ascending_across_pages() {
        let mut it = PagedIterator::new(VecPageSource::new(spans(7)), 3);
        let ids = drain(&mut it, true).await;
        let expected: Vec<String> = (0..7).map(|i| format!("s{:02}", i)).collect();
        assert_eq!(ids, expected);
        // Pages of 3, 3, 1: the short page marks exhaustion
        assert_eq!(it.source.fetches, 3);
        assert!(it.value().is_none());
    }

    #[tokio::test]
    async fn test_backward_is_descending() {
        let mut it = PagedIterator::new(VecPageSource::new(spans(5)), 2);
        let ids = drain(&mut it, false).await;
        let expected: Vec<String> = (0..5).rev().map(|i| format!("s{:02}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_direction_is_locked() {
        let mut it = PagedIterator::new(VecPageSource::new(spans(4)), 2);
        assert!(it.last().await.unwrap());
        assert!(matches!(it.next().await, Err(StorageError::OpNotSupported)));
        assert!(matches!(it.first().await, Err(StorageError::OpNotSupported)));
        assert!(it.prev().await.unwrap());

        let mut it = PagedIterator::new(VecPageSource::new(spans(4)), 2);
        assert!(it.next().await.unwrap());
        assert!(matches!(it.prev().await, Err(StorageError::OpNotSupported)));
    }

    #[tokio::test]
    async fn test_first_rewinds() {
        let mut it = PagedIterator::new(VecPageSource::new(spans(3)), 2);
        assert!(it.first().await.unwrap());
        assert!(it.next().await.unwrap());
        assert!(it.first().await.unwrap());
        assert_eq!(it.value().unwrap().span_id, "s00");
    }

    #[tokio::test]
    async fn test_empty_and_closed() {
        let mut it = PagedIterator::new(VecPageSource::new(vec![]), 10);
        assert!(!it.first().await.unwrap());
        assert!(it.value().is_none());

        it.close().await;
        assert!(matches!(it.next().await, Err(StorageError::Closed(_))));
    }
}
