use tracing::debug;

use crate::cache::LookupCache;
use crate::db::Database;
use crate::errors::Result;
use crate::types::{label_key, Collection, ObjectId};

/// The capability the resolver needs from the reference table and the
/// record store.
///
/// Implementations may block on I/O; errors abort resolution of the whole
/// record.
pub trait ReferenceTable {
    /// Case-insensitive find of `(category, label)`, creating the row when it
    /// is absent and `create_missing` is set. Blank labels yield `None`.
    fn find_or_create(
        &self,
        category: &str,
        label: &str,
        create_missing: bool,
    ) -> Result<Option<ObjectId>>;

    /// Whether `id` is a row of `category`.
    fn lookup_exists(&self, category: &str, id: &ObjectId) -> Result<bool>;

    /// Finds the single record of `collection` whose `match_fields` equal
    /// `label` (case-insensitive). Ambiguous matches yield `None`.
    fn find_entity(
        &self,
        collection: Collection,
        label: &str,
        match_fields: &[String],
    ) -> Result<Option<ObjectId>>;

    /// Whether `id` is a record of `collection`.
    fn entity_exists(&self, collection: Collection, id: &ObjectId) -> Result<bool>;
}

impl ReferenceTable for Database {
    fn find_or_create(
        &self,
        category: &str,
        label: &str,
        create_missing: bool,
    ) -> Result<Option<ObjectId>> {
        if !create_missing {
            return Ok(self.find_lookup_by_label(category, label)?.map(|row| row.id));
        }
        Ok(self
            .find_or_create_lookup(category, label)?
            .map(|(row, created)| {
                if created {
                    debug!(category, label = %row.label, id = %row.id, "created lookup row");
                }
                row.id
            }))
    }

    fn lookup_exists(&self, category: &str, id: &ObjectId) -> Result<bool> {
        Ok(self
            .get_lookup(id)?
            .is_some_and(|row| row.category == category))
    }

    fn find_entity(
        &self,
        collection: Collection,
        label: &str,
        match_fields: &[String],
    ) -> Result<Option<ObjectId>> {
        let label = label.trim();
        if label.is_empty() {
            return Ok(None);
        }
        for field in match_fields {
            let ids = self.find_record_ids_by_field(collection, field, label, 2)?;
            match ids.len() {
                0 => continue,
                1 => return Ok(ids.into_iter().next()),
                _ => {
                    debug!(%collection, field = %field, label, "ambiguous entity label");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    fn entity_exists(&self, collection: Collection, id: &ObjectId) -> Result<bool> {
        self.record_exists(collection, id)
    }
}

/// Cache key for a resolved label.
fn label_cache_key(category: &str, key: &str) -> String {
    format!("lookup:{category}:{key}")
}

/// Cache key for a verified lookup identifier.
fn lookup_exists_key(category: &str, id: &ObjectId) -> String {
    format!("exists:{category}:{id}")
}

/// Cache key for a verified record identifier.
fn entity_exists_key(collection: Collection, id: &ObjectId) -> String {
    format!("entity:{collection}:{id}")
}

/// Drops every cached answer about `category`.
pub fn invalidate_category(cache: &LookupCache, category: &str) {
    let labels = format!("lookup:{category}:");
    let exists = format!("exists:{category}:");
    cache.retain(|key| !key.starts_with(&labels) && !key.starts_with(&exists));
}

/// Drops the cached existence answer for one record.
pub fn invalidate_entity(cache: &LookupCache, collection: Collection, id: &ObjectId) {
    cache.remove(&entity_exists_key(collection, id));
}

/// Memoizes positive answers of another [`ReferenceTable`] in a
/// [`LookupCache`]. Misses always reach the inner table.
pub struct CachedReferenceTable<'a, T: ReferenceTable + ?Sized> {
    inner: &'a T,
    cache: &'a LookupCache,
}

impl<'a, T: ReferenceTable + ?Sized> CachedReferenceTable<'a, T> {
    pub fn new(inner: &'a T, cache: &'a LookupCache) -> Self {
        Self { inner, cache }
    }
}

impl<T: ReferenceTable + ?Sized> ReferenceTable for CachedReferenceTable<'_, T> {
    fn find_or_create(
        &self,
        category: &str,
        label: &str,
        create_missing: bool,
    ) -> Result<Option<ObjectId>> {
        let Some(key) = label_key(label) else {
            return Ok(None);
        };
        let cache_key = label_cache_key(category, &key);
        if let Some(id) = self.cache.get(&cache_key) {
            return Ok(Some(id));
        }
        let found = self.inner.find_or_create(category, label, create_missing)?;
        if let Some(id) = found {
            self.cache.insert(cache_key, id);
            self.cache.insert(lookup_exists_key(category, &id), id);
        }
        Ok(found)
    }

    fn lookup_exists(&self, category: &str, id: &ObjectId) -> Result<bool> {
        let cache_key = lookup_exists_key(category, id);
        if self.cache.get(&cache_key).is_some() {
            return Ok(true);
        }
        let exists = self.inner.lookup_exists(category, id)?;
        if exists {
            self.cache.insert(cache_key, *id);
        }
        Ok(exists)
    }

    fn find_entity(
        &self,
        collection: Collection,
        label: &str,
        match_fields: &[String],
    ) -> Result<Option<ObjectId>> {
        self.inner.find_entity(collection, label, match_fields)
    }

    fn entity_exists(&self, collection: Collection, id: &ObjectId) -> Result<bool> {
        let cache_key = entity_exists_key(collection, id);
        if self.cache.get(&cache_key).is_some() {
            return Ok(true);
        }
        let exists = self.inner.entity_exists(collection, id)?;
        if exists {
            self.cache.insert(cache_key, *id);
        }
        Ok(exists)
    }
}

/// Never creates lookups; labels that would be created get a placeholder id.
///
/// Used for dry runs and for checking a write before anything is created.
pub struct PreviewTable<'a, T: ReferenceTable + ?Sized> {
    inner: &'a T,
}

impl<'a, T: ReferenceTable + ?Sized> PreviewTable<'a, T> {
    pub fn new(inner: &'a T) -> Self {
        Self { inner }
    }
}

impl<T: ReferenceTable + ?Sized> ReferenceTable for PreviewTable<'_, T> {
    fn find_or_create(
        &self,
        category: &str,
        label: &str,
        create_missing: bool,
    ) -> Result<Option<ObjectId>> {
        let found = self.inner.find_or_create(category, label, false)?;
        Ok(match found {
            None if create_missing && !label.trim().is_empty() => Some(ObjectId::new()),
            other => other,
        })
    }

    fn lookup_exists(&self, category: &str, id: &ObjectId) -> Result<bool> {
        self.inner.lookup_exists(category, id)
    }

    fn find_entity(
        &self,
        collection: Collection,
        label: &str,
        match_fields: &[String],
    ) -> Result<Option<ObjectId>> {
        self.inner.find_entity(collection, label, match_fields)
    }

    fn entity_exists(&self, collection: Collection, id: &ObjectId) -> Result<bool> {
        self.inner.entity_exists(collection, id)
    }
}
