//! Queue state for the pipelined connection.
//!
//! Holds the priority-indexed write queues, the suppression flags, the
//! FIFO ledger of future response actions that mirrors the in-flight
//! sequence on the wire, and the reply-promise FIFOs. All fields are
//! mutated under one mutex in `connection`; nothing here suspends.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::types::{Query, Value};

/// Single-assignment slot fulfilling one caller waiting on a reply.
pub(crate) type ReplySink = oneshot::Sender<Result<Value>>;

/// Slot fulfilling one caller waiting on a contiguous list of replies.
pub(crate) type RepliesSink = oneshot::Sender<Result<Vec<Value>>>;

/// One unit of queued work for the write loop.
pub(crate) enum WriteQueueItem {
    /// Send one query, discard its reply.
    FireOne(Query),
    /// Send all queries back-to-back, discard their replies.
    FireMany(Vec<Query>),
    /// Send one query, deliver its reply to the sink.
    AwaitOne(Query, ReplySink),
    /// Send all queries back-to-back, deliver their replies as one list.
    AwaitMany(Vec<Query>, RepliesSink),
}

/// How the reader must handle the next `amount` replies on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseAction {
    Ignore,
    Deliver,
    DeliverBulk,
}

/// One ledger record: `amount` consecutive replies handled as `action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FutureResponseAction {
    pub action: ResponseAction,
    pub amount: usize,
}

/// All mutable queue state of one connection.
///
/// `epoch` identifies the transport generation the state belongs to: it is
/// bumped on every successful connect and on every reset, which makes
/// duplicate failure reports from the writer and reader idempotent.
pub(crate) struct Queues {
    writes: Vec<VecDeque<WriteQueueItem>>,
    suppressed: Vec<bool>,
    future_response_actions: VecDeque<FutureResponseAction>,
    reply_promises: VecDeque<ReplySink>,
    replies_promises: VecDeque<RepliesSink>,
    pub epoch: u64,
}

impl Queues {
    pub(crate) fn new(priorities: usize) -> Self {
        Self {
            writes: (0..priorities).map(|_| VecDeque::new()).collect(),
            suppressed: vec![false; priorities],
            future_response_actions: VecDeque::new(),
            reply_promises: VecDeque::new(),
            replies_promises: VecDeque::new(),
            epoch: 0,
        }
    }

    /// Append an item to the write queue of the given priority class.
    pub(crate) fn push_write(&mut self, priority: usize, item: WriteQueueItem) {
        self.writes[priority].push_back(item);
    }

    /// Insert an item at the head of a priority class: it is popped before
    /// anything already queued there.
    pub(crate) fn push_write_front(&mut self, priority: usize, item: WriteQueueItem) {
        self.writes[priority].push_front(item);
    }

    /// Pop the head of the highest-priority class that is non-empty and
    /// not suppressed. Returns `None` when no class qualifies.
    pub(crate) fn pop_next_write(&mut self) -> Option<WriteQueueItem> {
        for (priority, queue) in self.writes.iter_mut().enumerate() {
            if self.suppressed[priority] || queue.is_empty() {
                continue;
            }
            return queue.pop_front();
        }
        None
    }

    pub(crate) fn set_suppressed(&mut self, priority: usize, suppressed: bool) {
        self.suppressed[priority] = suppressed;
    }

    /// Record `amount` fire-and-forget replies, coalescing into an
    /// adjacent `Ignore` tail record.
    pub(crate) fn record_ignore(&mut self, amount: usize) {
        self.record_coalescing(ResponseAction::Ignore, amount);
    }

    /// Record `amount` single-delivery replies, coalescing into an
    /// adjacent `Deliver` tail record.
    pub(crate) fn record_deliver(&mut self, amount: usize) {
        self.record_coalescing(ResponseAction::Deliver, amount);
    }

    /// Record one bulk delivery of `amount` replies. Never coalesces:
    /// each bulk record consumes exactly one list sink.
    pub(crate) fn record_deliver_bulk(&mut self, amount: usize) {
        self.future_response_actions.push_back(FutureResponseAction {
            action: ResponseAction::DeliverBulk,
            amount,
        });
    }

    fn record_coalescing(&mut self, action: ResponseAction, amount: usize) {
        if amount == 0 {
            return;
        }
        match self.future_response_actions.back_mut() {
            Some(tail) if tail.action == action => tail.amount += amount,
            _ => self
                .future_response_actions
                .push_back(FutureResponseAction { action, amount }),
        }
    }

    /// Pop the oldest ledger record.
    pub(crate) fn pop_action(&mut self) -> Option<FutureResponseAction> {
        self.future_response_actions.pop_front()
    }

    pub(crate) fn push_reply_sink(&mut self, sink: ReplySink) {
        self.reply_promises.push_back(sink);
    }

    pub(crate) fn pop_reply_sink(&mut self) -> Option<ReplySink> {
        self.reply_promises.pop_front()
    }

    pub(crate) fn push_replies_sink(&mut self, sink: RepliesSink) {
        self.replies_promises.push_back(sink);
    }

    pub(crate) fn pop_replies_sink(&mut self) -> Option<RepliesSink> {
        self.replies_promises.pop_front()
    }

    /// Drop the ledger and fail every outstanding sink.
    ///
    /// Called on connection reset: the replies owed by the server will
    /// never arrive, and sent commands are not replayed. Queued-but-unsent
    /// items are left in place for the next connection.
    pub(crate) fn fail_outstanding(&mut self) {
        self.future_response_actions.clear();
        for sink in self.reply_promises.drain(..) {
            let _ = sink.send(Err(Error::ConnectionClosed));
        }
        for sink in self.replies_promises.drain(..) {
            let _ = sink.send(Err(Error::ConnectionClosed));
        }
    }

    #[cfg(test)]
    pub(crate) fn ledger(&self) -> &VecDeque<FutureResponseAction> {
        &self.future_response_actions
    }

    #[cfg(test)]
    pub(crate) fn reply_sinks(&self) -> usize {
        self.reply_promises.len()
    }

    #[cfg(test)]
    pub(crate) fn replies_sinks(&self) -> usize {
        self.replies_promises.len()
    }
}
