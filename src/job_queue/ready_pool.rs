use crate::job::Envelope;
use crossbeam::channel::{bounded, Receiver, Sender};

/// Bounded hand-off buffer between the dispatcher and the workers.
///
/// Many workers receive from the same channel; every envelope goes to
/// exactly one of them, in the order it was sent.
#[derive(Clone)]
pub(crate) struct ReadyPool {
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
    capacity: usize,
}

impl ReadyPool {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        ReadyPool {
            sender,
            receiver,
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub(crate) fn sender(&self) -> &Sender<Envelope> {
        &self.sender
    }

    pub(crate) fn receiver(&self) -> &Receiver<Envelope> {
        &self.receiver
    }
}
