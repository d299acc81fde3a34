// SPDX-License-Identifier: AGPL-3.0-only

//! Named-object store.
//!
//! Maps string keys to typed objects plus two JSON metadata records. It is
//! passed explicitly to whoever needs it; several solvers sharing a
//! subspace share one map.

use std::any::{type_name, Any};
use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::RegistryError;

struct NamedObject {
    data: Box<dyn Any>,
    file_xml: Value,
    record_xml: Value,
}

/// String-keyed store of heterogeneous objects.
#[derive(Default)]
pub struct NamedObjectMap {
    objects: BTreeMap<String, NamedObject>,
}

impl std::fmt::Debug for NamedObjectMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedObjectMap").field("ids", &self.ids()).finish()
    }
}

impl NamedObjectMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    /// # Errors
    ///
    /// [`RegistryError::AlreadyExists`] when `id` is taken.
    pub fn insert<T: Any>(&mut self, id: &str, data: T) -> Result<(), RegistryError> {
        if self.exists(id) {
            return Err(RegistryError::AlreadyExists(id.to_string()));
        }
        self.objects.insert(
            id.to_string(),
            NamedObject {
                data: Box::new(data),
                file_xml: Value::Null,
                record_xml: Value::Null,
            },
        );
        Ok(())
    }

    fn entry(&self, id: &str) -> Result<&NamedObject, RegistryError> {
        self.objects.get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut NamedObject, RegistryError> {
        self.objects.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    fn mismatch<T>(id: &str) -> RegistryError {
        RegistryError::TypeMismatch {
            id: id.to_string(),
            expected: type_name::<T>(),
        }
    }

    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or [`RegistryError::TypeMismatch`].
    pub fn get_data<T: Any>(&self, id: &str) -> Result<&T, RegistryError> {
        self.entry(id)?.data.downcast_ref::<T>().ok_or_else(|| Self::mismatch::<T>(id))
    }

    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or [`RegistryError::TypeMismatch`].
    pub fn get_data_mut<T: Any>(&mut self, id: &str) -> Result<&mut T, RegistryError> {
        self.entry_mut(id)?
            .data
            .downcast_mut::<T>()
            .ok_or_else(|| Self::mismatch::<T>(id))
    }

    /// # Errors
    ///
    /// [`RegistryError::NotFound`].
    pub fn set_file_xml(&mut self, id: &str, meta: Value) -> Result<(), RegistryError> {
        self.entry_mut(id)?.file_xml = meta;
        Ok(())
    }

    /// # Errors
    ///
    /// [`RegistryError::NotFound`].
    pub fn set_record_xml(&mut self, id: &str, meta: Value) -> Result<(), RegistryError> {
        self.entry_mut(id)?.record_xml = meta;
        Ok(())
    }

    /// # Errors
    ///
    /// [`RegistryError::NotFound`].
    pub fn file_xml(&self, id: &str) -> Result<&Value, RegistryError> {
        Ok(&self.entry(id)?.file_xml)
    }

    /// # Errors
    ///
    /// [`RegistryError::NotFound`].
    pub fn record_xml(&self, id: &str) -> Result<&Value, RegistryError> {
        Ok(&self.entry(id)?.record_xml)
    }

    /// Remove `id` and hand its object back. The entry stays in place when
    /// the type does not match.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or [`RegistryError::TypeMismatch`].
    pub fn erase<T: Any>(&mut self, id: &str) -> Result<T, RegistryError> {
        if !self.entry(id)?.data.is::<T>() {
            return Err(Self::mismatch::<T>(id));
        }
        let object = self.objects.remove(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        object
            .data
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| Self::mismatch::<T>(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.objects.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_get_and_erase() {
        let mut map = NamedObjectMap::new();
        map.insert("a", 5_u32).expect("insert");
        assert!(map.exists("a"));
        assert_eq!(*map.get_data::<u32>("a").expect("get"), 5);
        *map.get_data_mut::<u32>("a").expect("get_mut") = 9;
        assert_eq!(map.erase::<u32>("a").expect("erase"), 9);
        assert!(map.is_empty());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut map = NamedObjectMap::new();
        map.insert("a", 1_i64).expect("insert");
        assert!(matches!(map.insert("a", 2_i64), Err(RegistryError::AlreadyExists(_))));
    }

    #[test]
    fn wrong_type_leaves_entry_alone() {
        let mut map = NamedObjectMap::new();
        map.insert("a", String::from("x")).expect("insert");
        let err = map.erase::<u32>("a").unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { expected: "u32", .. }));
        assert!(map.exists("a"));
        assert!(map.get_data::<f64>("a").is_err());
    }

    #[test]
    fn metadata_is_stored_per_entry() {
        let mut map = NamedObjectMap::new();
        map.insert("s", ()).expect("insert");
        map.set_file_xml("s", json!({"FileXML": {}})).expect("file");
        map.set_record_xml("s", json!({"RecordXML": {"foo": 5}})).expect("record");
        assert_eq!(map.record_xml("s").expect("record")["RecordXML"]["foo"], 5);
        assert!(map.file_xml("s").expect("file")["FileXML"].is_object());
        assert!(matches!(map.file_xml("t"), Err(RegistryError::NotFound(_))));
    }
}
