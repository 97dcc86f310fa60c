use crate::message::Message;

/// Default number of chat messages kept for replay.
pub const DEFAULT_HISTORY: usize = 8;

/// Fixed-capacity log of recent messages; the oldest entry is overwritten
/// once the log is full.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    slots: Vec<Option<Message>>,
    head: usize,
    count: usize,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            head: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// O(1) insert; `head` always points at the slot written next.
    pub fn record(&mut self, message: Message) {
        let capacity = self.capacity();
        self.slots[self.head] = Some(message);
        self.head = (self.head + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
    }

    /// Oldest-first view of the log. Each call starts over from the oldest entry.
    pub fn replay(&self) -> impl Iterator<Item = &Message> + '_ {
        let capacity = self.capacity();
        let start = if self.count < capacity { 0 } else { self.head };
        (0..self.count).filter_map(move |i| self.slots[(start + i) % capacity].as_ref())
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}
