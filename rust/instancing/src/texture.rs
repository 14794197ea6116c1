// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared, ref-counted texture cache.
//!
//! The host registers decoded images by id; instances claim them through the
//! handler. Entries whose count drops to zero are kept until the host calls
//! [`TextureCache::purge_unused`], so re-selecting a texture does not force
//! a re-upload.

use crate::keys::TextureKey;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use std::rc::Rc;

/// Decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8 pixels.
    pub pixels: Vec<u8>,
}

impl TextureImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// 1x1 image of one color.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self::new(1, 1, rgba.to_vec())
    }
}

/// One cached texture.
#[derive(Debug, Clone)]
pub struct TextureEntry {
    pub id: String,
    pub image: Rc<TextureImage>,
    ref_count: usize,
}

impl TextureEntry {
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }
}

/// Texture table with an id index.
#[derive(Debug, Default)]
pub struct TextureCache {
    textures: SlotMap<TextureKey, TextureEntry>,
    by_id: FxHashMap<String, TextureKey>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `image` under `id`. Replacing an existing image keeps its
    /// key and count.
    pub fn insert(&mut self, id: impl Into<String>, image: TextureImage) -> TextureKey {
        let id = id.into();
        if let Some(&key) = self.by_id.get(&id) {
            if let Some(entry) = self.textures.get_mut(key) {
                entry.image = Rc::new(image);
                return key;
            }
        }
        let key = self.textures.insert(TextureEntry {
            id: id.clone(),
            image: Rc::new(image),
            ref_count: 0,
        });
        self.by_id.insert(id, key);
        key
    }

    /// Take a counted claim on the texture registered under `id`.
    pub fn acquire(&mut self, id: &str) -> Option<TextureKey> {
        let key = *self.by_id.get(id)?;
        let entry = self.textures.get_mut(key)?;
        entry.ref_count += 1;
        Some(key)
    }

    /// Drop one claim. Returns the remaining count, or `None` for a stale key.
    pub fn release(&mut self, key: TextureKey) -> Option<usize> {
        let entry = self.textures.get_mut(key)?;
        if entry.ref_count == 0 {
            tracing::error!(texture_id = %entry.id, "texture released more often than acquired");
            return Some(0);
        }
        entry.ref_count -= 1;
        Some(entry.ref_count)
    }

    pub fn get(&self, key: TextureKey) -> Option<&TextureEntry> {
        self.textures.get(key)
    }

    pub fn key_of(&self, id: &str) -> Option<TextureKey> {
        self.by_id.get(id).copied()
    }

    pub fn ref_count(&self, id: &str) -> Option<usize> {
        self.key_of(id)
            .and_then(|key| self.textures.get(key))
            .map(TextureEntry::ref_count)
    }

    /// Remove every texture nobody holds a claim on. Returns how many went.
    pub fn purge_unused(&mut self) -> usize {
        let unused: Vec<TextureKey> = self
            .textures
            .iter()
            .filter(|(_, entry)| entry.ref_count == 0)
            .map(|(key, _)| key)
            .collect();

        for &key in &unused {
            if let Some(entry) = self.textures.remove(key) {
                self.by_id.remove(&entry.id);
                tracing::debug!(texture_id = %entry.id, "texture disposed");
            }
        }
        unused.len()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_counts() {
        let mut cache = TextureCache::new();
        let key = cache.insert("wood", TextureImage::solid([120, 80, 40, 255]));

        assert_eq!(cache.acquire("wood"), Some(key));
        assert_eq!(cache.acquire("wood"), Some(key));
        assert_eq!(cache.ref_count("wood"), Some(2));
        assert_eq!(cache.acquire("stone"), None);

        assert_eq!(cache.release(key), Some(1));
        assert_eq!(cache.release(key), Some(0));
        assert_eq!(cache.release(key), Some(0));
    }

    #[test]
    fn test_replace_keeps_claims() {
        let mut cache = TextureCache::new();
        let key = cache.insert("wood", TextureImage::solid([0, 0, 0, 255]));
        cache.acquire("wood");

        let replaced = cache.insert("wood", TextureImage::solid([255, 255, 255, 255]));
        assert_eq!(replaced, key);
        assert_eq!(cache.ref_count("wood"), Some(1));
        assert_eq!(cache.get(key).unwrap().image.pixels, vec![255, 255, 255, 255]);
    }

    #[test]
    fn test_purge_unused() {
        let mut cache = TextureCache::new();
        cache.insert("kept", TextureImage::solid([1, 2, 3, 4]));
        let dropped = cache.insert("dropped", TextureImage::solid([1, 2, 3, 4]));
        cache.acquire("kept");

        assert_eq!(cache.purge_unused(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(dropped).is_none());
        assert!(cache.key_of("dropped").is_none());
        assert_eq!(cache.ref_count("kept"), Some(1));
    }
}
