//! Entity views with lazily-materialized serialized forms.
//!
//! An [`EntityView`] carries a value plus two cached serialized forms:
//! compact binary (MessagePack) and JSON. Each form is produced at most
//! once and handed out as a shared [`Bytes`] handle; dropping the view's
//! own hold via [`EntityView::release_caches`] leaves previously returned
//! handles valid.

use std::cell::OnceCell;

use bytes::Bytes;
use serde::Serialize;

use velo_error::{Error, Result};

/// A value plus its lazily-serialized binary and JSON forms.
#[derive(Debug)]
pub struct EntityView<T> {
    value:  T,
    binary: OnceCell<Bytes>,
    json:   OnceCell<Bytes>,
}

impl<T: Serialize> EntityView<T> {
    /// Wrap a value. Nothing is serialized yet.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value,
            binary: OnceCell::new(),
            json: OnceCell::new(),
        }
    }

    /// The wrapped value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The binary form, produced on first call and shared afterwards.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be serialized.
    pub fn binary(&self) -> Result<Bytes> {
        if let Some(cached) = self.binary.get() {
            return Ok(cached.clone());
        }
        let encoded = rmp_serde::to_vec(&self.value)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let bytes = Bytes::from(encoded);
        let _ = self.binary.set(bytes.clone());
        Ok(bytes)
    }

    /// The JSON form, produced on first call and shared afterwards.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be serialized.
    pub fn json(&self) -> Result<Bytes> {
        if let Some(cached) = self.json.get() {
            return Ok(cached.clone());
        }
        let encoded = serde_json::to_vec(&self.value)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let bytes = Bytes::from(encoded);
        let _ = self.json.set(bytes.clone());
        Ok(bytes)
    }

    /// Drop the view's hold on both serialized forms. Handles already
    /// returned stay valid; the next `binary()`/`json()` re-serializes.
    pub fn release_caches(&mut self) {
        self.binary.take();
        self.json.take();
    }

    /// Unwrap the value, discarding the caches.
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Article {
        id:       i64,
        title:    String,
        tags:     Vec<String>,
        archived: bool,
    }

    fn article() -> Article {
        Article {
            id:       7,
            title:    "Ghost admission in segmented caches".to_string(),
            tags:     vec!["cache".to_string(), "lru".to_string()],
            archived: false,
        }
    }

    #[test]
    fn binary_roundtrip() {
        let view = EntityView::new(article());
        let bytes = view.binary().expect("serialize");
        let back: Article = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(back, article());
    }

    #[test]
    fn json_roundtrip() {
        let view = EntityView::new(article());
        let bytes = view.json().expect("serialize");
        let back: Article = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(back, article());
    }

    #[test]
    fn forms_are_produced_once_and_shared() {
        let view = EntityView::new(article());
        let a = view.binary().expect("first");
        let b = view.binary().expect("second");
        // Same shared buffer, not a re-serialization.
        assert_eq!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn release_caches_keeps_outstanding_handles_valid() {
        let mut view = EntityView::new(article());
        let held = view.json().expect("serialize");
        view.release_caches();

        // The old handle still reads fine.
        let back: Article = serde_json::from_slice(&held).expect("held handle valid");
        assert_eq!(back, article());

        // A new call re-serializes into a fresh buffer.
        let fresh = view.json().expect("re-serialize");
        assert_eq!(&held[..], &fresh[..]);
        assert_ne!(held.as_ptr(), fresh.as_ptr());
    }
}
