//! Live log fan-out to attached observers.
//!
//! Each service keeps a growable set of opaque sinks. Every appended line is
//! pushed to all of them; a sink that reports failure is dropped from the set.

use tokio::sync::mpsc;

/// Returned by a sink whose observer has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// A live connection that receives log lines as they are appended.
///
/// Implementations must not block: `push_line` is called while the
/// supervisor holds its coordinating lock.
pub trait LogSink: Send + Sync {
    fn push_line(&self, line: &str) -> Result<(), SinkClosed>;
}

/// Sink backed by an unbounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Build a sink together with the receiving end handed to the observer.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl LogSink for ChannelSink {
    fn push_line(&self, line: &str) -> Result<(), SinkClosed> {
        self.tx.send(line.to_string()).map_err(|_| SinkClosed)
    }
}

/// Observers attached to one service.
#[derive(Default)]
pub struct Subscribers {
    sinks: Vec<Box<dyn LogSink>>,
}

impl Subscribers {
    pub fn attach(&mut self, sink: Box<dyn LogSink>) {
        self.sinks.push(sink);
    }

    /// Push `line` to every sink, pruning the ones that failed.
    /// Returns how many sinks were dropped.
    pub fn broadcast(&mut self, line: &str) -> usize {
        let before = self.sinks.len();
        self.sinks.retain(|sink| sink.push_line(line).is_ok());
        before - self.sinks.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.sinks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_all_sinks_in_order() {
        let mut subs = Subscribers::default();
        let (a, mut rx_a) = ChannelSink::pair();
        let (b, mut rx_b) = ChannelSink::pair();
        subs.attach(Box::new(a));
        subs.attach(Box::new(b));

        assert_eq!(subs.broadcast("one"), 0);
        assert_eq!(subs.broadcast("two"), 0);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap(), "one");
            assert_eq!(rx.try_recv().unwrap(), "two");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn closed_sinks_are_pruned() {
        let mut subs = Subscribers::default();
        let (alive, mut rx) = ChannelSink::pair();
        let (gone, rx_gone) = ChannelSink::pair();
        subs.attach(Box::new(alive));
        subs.attach(Box::new(gone));
        drop(rx_gone);

        assert_eq!(subs.broadcast("hello"), 1);
        assert_eq!(subs.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }
}
