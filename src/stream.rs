//! Pull-style result streams.
//!
//! [`MatchStream`] is the closed set of iterators `query_stream` and
//! cursor-style backends hand out: advance with `next()`, read the item
//! with `current()`, inspect a terminal failure with `error()`, and
//! `close()` when done. The in-memory engine materialises results and wraps
//! them in a [`SliceStream`]; backends that page from a remote cursor feed
//! a bounded [`ChannelStream`] instead.

use crate::error::Error;
use crate::query::Match;
use crossbeam_channel::Receiver;

/// A lazily-consumed sequence of query matches.
pub trait MatchStream: Send {
    /// Advance to the next match. Returns false when the stream is
    /// exhausted, failed, or closed.
    fn next(&mut self) -> bool;

    /// The match the stream is currently positioned on.
    fn current(&self) -> Option<&Match>;

    /// The failure that terminated the stream, if any.
    fn error(&self) -> Option<&Error>;

    /// Release the stream, draining anything still buffered.
    fn close(&mut self);
}

/// Consume a stream into a vector, surfacing a terminal error.
pub fn drain(stream: &mut dyn MatchStream) -> Result<Vec<Match>, Error> {
    let mut matches = Vec::new();
    while stream.next() {
        if let Some(m) = stream.current() {
            matches.push(m.clone());
        }
    }
    if let Some(err) = stream.error() {
        return Err(clone_stream_error(err));
    }
    Ok(matches)
}

// Errors are not Clone (they may carry source chains); streams only ever
// surface the variants below, which copy losslessly enough for callers.
fn clone_stream_error(err: &Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        Error::DeadlineExceeded => Error::DeadlineExceeded,
        Error::Closed => Error::Closed,
        Error::NotFound(name) => Error::NotFound(name.clone()),
        other => Error::InvalidQuery(other.to_string()),
    }
}

// ============================================================================
// Slice stream
// ============================================================================

/// A stream over an already-materialised result set.
#[derive(Debug)]
pub struct SliceStream {
    matches: Vec<Match>,
    position: Option<usize>,
    closed: bool,
}

impl SliceStream {
    /// Wrap a vector of matches.
    pub fn new(matches: Vec<Match>) -> Self {
        Self {
            matches,
            position: None,
            closed: false,
        }
    }
}

impl MatchStream for SliceStream {
    fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.matches.len() {
            self.position = Some(next);
            true
        } else {
            false
        }
    }

    fn current(&self) -> Option<&Match> {
        if self.closed {
            return None;
        }
        self.position.and_then(|p| self.matches.get(p))
    }

    fn error(&self) -> Option<&Error> {
        None
    }

    fn close(&mut self) {
        self.closed = true;
        self.matches.clear();
        self.position = None;
    }
}

// ============================================================================
// Channel stream
// ============================================================================

/// A stream fed through a bounded channel by a producer task.
pub struct ChannelStream {
    receiver: Receiver<Result<Match, Error>>,
    current: Option<Match>,
    error: Option<Error>,
    closed: bool,
}

impl ChannelStream {
    /// Wrap the receiving half of a bounded channel.
    pub fn new(receiver: Receiver<Result<Match, Error>>) -> Self {
        Self {
            receiver,
            current: None,
            error: None,
            closed: false,
        }
    }
}

impl MatchStream for ChannelStream {
    fn next(&mut self) -> bool {
        if self.closed || self.error.is_some() {
            return false;
        }
        match self.receiver.recv() {
            Ok(Ok(m)) => {
                self.current = Some(m);
                true
            }
            Ok(Err(err)) => {
                self.error = Some(err);
                self.current = None;
                false
            }
            // Producer hung up: clean end of stream.
            Err(_) => {
                self.current = None;
                false
            }
        }
    }

    fn current(&self) -> Option<&Match> {
        if self.closed {
            return None;
        }
        self.current.as_ref()
    }

    fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.current = None;
        // Drain so a bounded producer never blocks on a closed consumer.
        while self.receiver.try_recv().is_ok() {}
    }
}

// ============================================================================
// Empty and error streams
// ============================================================================

/// A stream with no matches.
#[derive(Debug, Default)]
pub struct EmptyStream;

impl EmptyStream {
    /// An empty stream.
    pub fn new() -> Self {
        Self
    }
}

impl MatchStream for EmptyStream {
    fn next(&mut self) -> bool {
        false
    }

    fn current(&self) -> Option<&Match> {
        None
    }

    fn error(&self) -> Option<&Error> {
        None
    }

    fn close(&mut self) {}
}

/// A stream that failed before producing anything.
#[derive(Debug)]
pub struct ErrorStream {
    error: Error,
}

impl ErrorStream {
    /// A stream carrying only the given failure.
    pub fn new(error: Error) -> Self {
        Self { error }
    }
}

impl MatchStream for ErrorStream {
    fn next(&mut self) -> bool {
        false
    }

    fn current(&self) -> Option<&Match> {
        None
    }

    fn error(&self) -> Option<&Error> {
        Some(&self.error)
    }

    fn close(&mut self) {}
}

// ============================================================================
// Combinators
// ============================================================================

/// A stream that skips matches failing a predicate.
pub struct FilterStream<S> {
    inner: S,
    predicate: Box<dyn Fn(&Match) -> bool + Send>,
}

impl<S: MatchStream> FilterStream<S> {
    /// Filter `inner` through `predicate`.
    pub fn new(inner: S, predicate: impl Fn(&Match) -> bool + Send + 'static) -> Self {
        Self {
            inner,
            predicate: Box::new(predicate),
        }
    }
}

impl<S: MatchStream> MatchStream for FilterStream<S> {
    fn next(&mut self) -> bool {
        while self.inner.next() {
            if self.inner.current().is_some_and(|m| (self.predicate)(m)) {
                return true;
            }
        }
        false
    }

    fn current(&self) -> Option<&Match> {
        self.inner.current()
    }

    fn error(&self) -> Option<&Error> {
        self.inner.error()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// A stream that transforms each match.
pub struct MapStream<S> {
    inner: S,
    transform: Box<dyn Fn(Match) -> Match + Send>,
    current: Option<Match>,
}

impl<S: MatchStream> MapStream<S> {
    /// Transform each match of `inner` with `transform`.
    pub fn new(inner: S, transform: impl Fn(Match) -> Match + Send + 'static) -> Self {
        Self {
            inner,
            transform: Box::new(transform),
            current: None,
        }
    }
}

impl<S: MatchStream> MatchStream for MapStream<S> {
    fn next(&mut self) -> bool {
        if self.inner.next() {
            self.current = self
                .inner
                .current()
                .cloned()
                .map(|m| (self.transform)(m));
            true
        } else {
            self.current = None;
            false
        }
    }

    fn current(&self) -> Option<&Match> {
        self.current.as_ref()
    }

    fn error(&self) -> Option<&Error> {
        self.inner.error()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn m(id: &str, score: f32) -> Match {
        Match {
            document: Document::text(id, "x"),
            score,
            distance: 1.0 - score,
            rank: 0,
        }
    }

    #[test]
    fn test_slice_stream() {
        let mut stream = SliceStream::new(vec![m("a", 1.0), m("b", 0.5)]);
        assert!(stream.current().is_none());
        assert!(stream.next());
        assert_eq!(stream.current().unwrap().document.id, "a");
        assert!(stream.next());
        assert_eq!(stream.current().unwrap().document.id, "b");
        assert!(!stream.next());
        assert!(stream.error().is_none());
    }

    #[test]
    fn test_slice_stream_close() {
        let mut stream = SliceStream::new(vec![m("a", 1.0)]);
        assert!(stream.next());
        stream.close();
        assert!(!stream.next());
        assert!(stream.current().is_none());
    }

    #[test]
    fn test_channel_stream() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        tx.send(Ok(m("a", 1.0))).unwrap();
        tx.send(Ok(m("b", 0.8))).unwrap();
        drop(tx);

        let mut stream = ChannelStream::new(rx);
        let matches = drain(&mut stream).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].document.id, "a");
    }

    #[test]
    fn test_channel_stream_error() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        tx.send(Ok(m("a", 1.0))).unwrap();
        tx.send(Err(Error::Cancelled)).unwrap();
        drop(tx);

        let mut stream = ChannelStream::new(rx);
        assert!(stream.next());
        assert!(!stream.next());
        assert!(matches!(stream.error(), Some(Error::Cancelled)));
    }

    #[test]
    fn test_channel_close_drains() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        tx.send(Ok(m("a", 1.0))).unwrap();
        tx.send(Ok(m("b", 0.8))).unwrap();

        let mut stream = ChannelStream::new(rx);
        stream.close();
        assert!(!stream.next());
        // Space was freed for the producer.
        assert!(tx.try_send(Ok(m("c", 0.2))).is_ok());
    }

    #[test]
    fn test_empty_and_error_streams() {
        let mut empty = EmptyStream::new();
        assert!(!empty.next());
        assert!(empty.error().is_none());

        let mut failed = ErrorStream::new(Error::Closed);
        assert!(!failed.next());
        assert!(matches!(failed.error(), Some(Error::Closed)));
        assert!(drain(&mut failed).is_err());
    }

    #[test]
    fn test_filter_stream() {
        let inner = SliceStream::new(vec![m("a", 1.0), m("b", 0.2), m("c", 0.9)]);
        let mut filtered = FilterStream::new(inner, |m| m.score > 0.5);
        let matches = drain(&mut filtered).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[1].document.id, "c");
    }

    #[test]
    fn test_map_stream() {
        let inner = SliceStream::new(vec![m("a", 0.5)]);
        let mut mapped = MapStream::new(inner, |mut m| {
            m.score = 1.0;
            m
        });
        let matches = drain(&mut mapped).unwrap();
        assert_eq!(matches[0].score, 1.0);
    }
}
