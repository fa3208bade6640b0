use crate::context::{ReadCx, WriteCx};
use crate::convert::{AsyncSink, AsyncSource, Converter};
use crate::error::Error;
use fxhash::FxHashMap;
use msgpack::{Reader, Writer};
use shape::Value;
use std::sync::{Arc, RwLock};

/// Converters are memoized by shape identity: the provider's allocation
/// address plus the shape id, extended with a fingerprint distinguishing
/// member-influenced builds (comparer designations, payload cores) from
/// neutral ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub provider: usize,
    pub shape: u32,
    pub fingerprint: u64,
}

enum Slot {
    Ready(Arc<dyn Converter>),
    Building(Arc<DelayedConverter>),
}

/// Shape-keyed memo table. Recursive builds of a shape already under
/// construction receive its delayed slot, which forwards to the finished
/// converter once construction completes; this is what makes cyclic type
/// graphs build without double construction or unbounded recursion.
#[derive(Default)]
pub(crate) struct ConverterCache {
    slots: RwLock<FxHashMap<CacheKey, Slot>>,
}

impl ConverterCache {
    pub fn new() -> ConverterCache {
        ConverterCache::default()
    }

    pub fn get_or_build<F>(&self, key: CacheKey, build: F) -> Result<Arc<dyn Converter>, Error>
    where
        F: FnOnce() -> Result<Arc<dyn Converter>, Error>,
    {
        {
            let slots = self.slots.read().unwrap();
            match slots.get(&key) {
                Some(Slot::Ready(converter)) => return Ok(converter.clone()),
                Some(Slot::Building(delayed)) => {
                    let forwarded: Arc<dyn Converter> = delayed.clone();
                    return Ok(forwarded);
                }
                None => {}
            }
        }

        let delayed = Arc::new(DelayedConverter::default());
        {
            let mut slots = self.slots.write().unwrap();
            // A concurrent builder may have won the race for this key.
            match slots.get(&key) {
                Some(Slot::Ready(converter)) => return Ok(converter.clone()),
                Some(Slot::Building(other)) => {
                    let forwarded: Arc<dyn Converter> = other.clone();
                    return Ok(forwarded);
                }
                None => slots.insert(key, Slot::Building(delayed.clone())),
            };
        }

        match build() {
            Ok(converter) => {
                delayed.resolve(converter.clone());
                self.slots
                    .write()
                    .unwrap()
                    .insert(key, Slot::Ready(converter.clone()));
                tracing::debug!(shape = key.shape, "built converter");
                Ok(converter)
            }
            Err(err) => {
                self.slots.write().unwrap().remove(&key);
                Err(err)
            }
        }
    }
}

/// The placeholder installed while a converter is under construction.
/// Participants of a shape cycle hold this and route through it forever;
/// the indirection costs one pointer load per call.
#[derive(Default)]
pub(crate) struct DelayedConverter {
    target: RwLock<Option<Arc<dyn Converter>>>,
}

impl DelayedConverter {
    fn resolve(&self, target: Arc<dyn Converter>) {
        *self.target.write().unwrap() = Some(target);
    }

    fn resolved(&self) -> Result<Arc<dyn Converter>, Error> {
        self.target
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::invalid("converter invoked before its construction completed"))
    }
}

#[async_trait::async_trait]
impl Converter for DelayedConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        self.resolved()?.write(w, value, cx)
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        self.resolved()?.read(r, cx)
    }

    async fn write_to(
        &self,
        sink: &mut AsyncSink<'_>,
        value: &Value,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        self.resolved()?.write_to(sink, value, cx).await
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        self.resolved()?.read_from(src, cx).await
    }

    fn prefer_async(&self) -> bool {
        match self.resolved() {
            Ok(converter) => converter.prefer_async(),
            Err(_) => false,
        }
    }

    fn schema(&self) -> serde_json::Value {
        match self.resolved() {
            Ok(converter) => converter.schema(),
            // A schema request mid-cycle yields the permissive schema.
            Err(_) => serde_json::Value::Bool(true),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    struct Marker(u32);

    #[async_trait::async_trait]
    impl Converter for Marker {
        fn write(&self, _w: &mut Writer, _v: &Value, _cx: &mut WriteCx) -> Result<(), Error> {
            Ok(())
        }
        fn read(&self, _r: &mut Reader<'_>, _cx: &mut ReadCx) -> Result<Value, Error> {
            Ok(Value::Nil)
        }
        fn schema(&self) -> serde_json::Value {
            json!(self.0)
        }
    }

    fn key(shape: u32) -> CacheKey {
        CacheKey {
            provider: 1,
            shape,
            fingerprint: 0,
        }
    }

    #[test]
    fn test_memoization_is_by_identity() {
        let cache = ConverterCache::new();

        let first = cache
            .get_or_build(key(1), || Ok(Arc::new(Marker(1)) as Arc<dyn Converter>))
            .unwrap();
        let second = cache
            .get_or_build(key(1), || panic!("must not rebuild"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = cache
            .get_or_build(key(2), || Ok(Arc::new(Marker(2)) as Arc<dyn Converter>))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_recursive_build_receives_delayed_slot() {
        let cache = ConverterCache::new();

        let built = cache
            .get_or_build(key(1), || {
                // Re-entrant request for the same key, as a cyclic shape
                // graph produces.
                let inner = cache.get_or_build(key(1), || panic!("must not recurse"))?;
                assert_eq!(inner.schema(), serde_json::Value::Bool(true));
                Ok(Arc::new(Marker(7)) as Arc<dyn Converter>)
            })
            .unwrap();

        assert_eq!(built.schema(), json!(7));

        // The delayed slot handed out mid-build now routes to the real
        // converter.
        let cached = cache.get_or_build(key(1), || panic!("built twice")).unwrap();
        assert_eq!(cached.schema(), json!(7));
    }

    #[test]
    fn test_failed_build_leaves_cache_reusable() {
        let cache = ConverterCache::new();

        let failed = cache.get_or_build(key(3), || Err(Error::invalid("nope")));
        assert!(failed.is_err());

        let recovered = cache
            .get_or_build(key(3), || Ok(Arc::new(Marker(3)) as Arc<dyn Converter>))
            .unwrap();
        assert_eq!(recovered.schema(), json!(3));
    }
}
