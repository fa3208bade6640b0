use crate::error::Error;
use crate::intern::InternTable;
use fxhash::FxHashMap;
use shape::{Provider, Record, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reference identities seen while writing. Records are tracked by pointer
/// identity (keep-alive clones pin their addresses for the map's lifetime);
/// with string suppression active, emitted strings are tracked by content.
/// Identifiers count up from one, in emission order.
#[derive(Default)]
pub struct WriteRefs {
    records: FxHashMap<usize, u32>,
    keepalive: Vec<Arc<Record>>,
    strings: FxHashMap<Arc<str>, u32>,
    next: u32,
}

impl WriteRefs {
    fn next_id(&mut self) -> u32 {
        self.next += 1;
        self.next
    }

    pub fn record_seen(&self, record: &Arc<Record>) -> Option<u32> {
        self.records.get(&(Arc::as_ptr(record) as usize)).copied()
    }

    pub fn register_record(&mut self, record: &Arc<Record>) -> u32 {
        let id = self.next_id();
        self.records.insert(Arc::as_ptr(record) as usize, id);
        self.keepalive.push(record.clone());
        id
    }

    pub fn string_seen(&self, text: &str) -> Option<u32> {
        self.strings.get(text).copied()
    }

    pub fn register_string(&mut self, text: &Arc<str>) -> u32 {
        let id = self.next_id();
        self.strings.insert(text.clone(), id);
        id
    }
}

/// Reference identities seen while reading, mirroring the writer's
/// numbering. A reservation is taken just before a wrapped converter runs
/// and is consumed by the record (or other value) it materializes, so
/// cyclic payloads can resolve references to objects still being filled.
#[derive(Default)]
pub struct ReadRefs {
    values: FxHashMap<u32, Value>,
    next: u32,
    pending: Option<u32>,
}

impl ReadRefs {
    pub fn reserve(&mut self) -> u32 {
        self.next += 1;
        self.pending = Some(self.next);
        self.next
    }

    pub fn take_pending(&mut self) -> Option<u32> {
        self.pending.take()
    }

    /// Clear the reservation only if it is the given one.
    pub fn consume_if_pending(&mut self, id: u32) -> bool {
        if self.pending == Some(id) {
            self.pending = None;
            return true;
        }
        false
    }

    pub fn register(&mut self, id: u32, value: Value) {
        self.values.insert(id, value);
    }

    pub fn lookup(&self, id: u32) -> Option<&Value> {
        self.values.get(&id)
    }

    pub fn register_string(&mut self, text: &Arc<str>) -> u32 {
        self.next += 1;
        self.values.insert(self.next, Value::Str(text.clone()));
        self.next
    }
}

/// Per-call state threaded through every write. Owns the depth budget, the
/// cancellation signal, and (when reference preservation is on) the
/// identity maps.
pub struct WriteCx {
    provider: Arc<Provider>,
    depth: u32,
    max_depth: u32,
    cancel: CancellationToken,
    refs: Option<WriteRefs>,
    track_strings: bool,
}

impl WriteCx {
    pub(crate) fn new(
        provider: Arc<Provider>,
        max_depth: u32,
        cancel: CancellationToken,
        refs: Option<WriteRefs>,
        track_strings: bool,
    ) -> WriteCx {
        WriteCx {
            provider,
            depth: 0,
            max_depth,
            cancel,
            refs,
            track_strings,
        }
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    /// Enter a nested converter, charging the depth budget.
    pub fn descend(&mut self) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(Error::DepthExceeded {
                max: self.max_depth,
            });
        }
        Ok(())
    }

    pub fn ascend(&mut self) {
        self.depth -= 1;
    }

    pub fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn refs(&mut self) -> Option<&mut WriteRefs> {
        self.refs.as_mut()
    }

    /// Whether repeated strings collapse to reference tokens in this call.
    pub fn track_strings(&self) -> bool {
        self.track_strings && self.refs.is_some()
    }

    pub(crate) fn into_refs(self) -> Option<WriteRefs> {
        self.refs
    }
}

/// Per-call state threaded through every read.
pub struct ReadCx {
    provider: Arc<Provider>,
    depth: u32,
    max_depth: u32,
    cancel: CancellationToken,
    refs: Option<ReadRefs>,
    intern: Option<Arc<InternTable>>,
    track_strings: bool,
}

impl ReadCx {
    pub(crate) fn new(
        provider: Arc<Provider>,
        max_depth: u32,
        cancel: CancellationToken,
        refs: Option<ReadRefs>,
        intern: Option<Arc<InternTable>>,
        track_strings: bool,
    ) -> ReadCx {
        ReadCx {
            provider,
            depth: 0,
            max_depth,
            cancel,
            refs,
            intern,
            track_strings,
        }
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    pub fn descend(&mut self) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(Error::DepthExceeded {
                max: self.max_depth,
            });
        }
        Ok(())
    }

    pub fn ascend(&mut self) {
        self.depth -= 1;
    }

    pub fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn refs(&mut self) -> Option<&mut ReadRefs> {
        self.refs.as_mut()
    }

    /// Take the reservation installed by an enclosing reference wrapper,
    /// if one is waiting for the value now being constructed.
    pub fn take_reservation(&mut self) -> Option<u32> {
        self.refs.as_mut().and_then(ReadRefs::take_pending)
    }

    pub fn register_ref(&mut self, id: u32, value: Value) {
        if let Some(refs) = self.refs.as_mut() {
            refs.register(id, value);
        }
    }

    pub fn track_strings(&self) -> bool {
        self.track_strings && self.refs.is_some()
    }

    /// Intern or allocate a decoded string.
    pub fn make_str(&self, text: &str) -> Arc<str> {
        match &self.intern {
            Some(table) => table.intern(text),
            None => Arc::from(text),
        }
    }

    pub(crate) fn into_refs(self) -> Option<ReadRefs> {
        self.refs
    }
}
