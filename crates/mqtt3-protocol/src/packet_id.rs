use std::sync::atomic::{AtomicU16, Ordering};

/// Cycles through packet identifiers 1..=65535, wrapping back to 1.
/// Zero is never handed out.
#[derive(Debug)]
pub struct PacketIdGenerator {
    last: AtomicU16,
}

impl PacketIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: AtomicU16::new(0),
        }
    }

    pub fn next_id(&self) -> u16 {
        let step = |id: u16| if id == u16::MAX { 1 } else { id + 1 };
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| Some(step(id)))
        {
            Ok(prev) | Err(prev) => step(prev),
        }
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
