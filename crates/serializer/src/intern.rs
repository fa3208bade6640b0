use fxhash::FxHashMap;
use std::sync::{Arc, Mutex, Weak};

/// A weak-referenced string intern table keyed by UTF-8 contents. Decoded
/// strings consult the table before allocating, so repeated payload strings
/// across calls share one allocation for as long as any caller holds one.
#[derive(Default)]
pub struct InternTable {
    entries: Mutex<FxHashMap<Box<[u8]>, Weak<str>>>,
}

// Sweep dead weak entries once the table grows past this many slots.
const SWEEP_THRESHOLD: usize = 1024;

impl InternTable {
    pub fn new() -> InternTable {
        InternTable::default()
    }

    pub fn intern(&self, text: &str) -> Arc<str> {
        let mut entries = self.entries.lock().unwrap();

        if let Some(live) = entries.get(text.as_bytes()).and_then(Weak::upgrade) {
            return live;
        }

        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, weak| weak.strong_count() > 0);
        }

        let interned: Arc<str> = Arc::from(text);
        entries.insert(
            text.as_bytes().to_vec().into_boxed_slice(),
            Arc::downgrade(&interned),
        );
        interned
    }

    #[cfg(test)]
    fn live_len(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
