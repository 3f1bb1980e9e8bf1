// ============================================================================
// TEXTURE POOL - recycle render-target textures between composites
// ============================================================================

use std::collections::HashMap;

/// Key for pooled textures: (width, height, format).
type PoolKey = (u32, u32, wgpu::TextureFormat);

/// GPU textures keyed by dimensions and format.
///
/// The viewer re-uploads its targets whenever the viewport changes and writes
/// a fresh output every composite; recycling keeps `create_texture` out of the
/// per-frame path.
pub struct TexturePool {
    pool: HashMap<PoolKey, Vec<wgpu::Texture>>,
    /// Maximum number of textures to keep per key.
    max_per_key: usize,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            pool: HashMap::new(),
            max_per_key: 4,
        }
    }

    /// A recycled texture for the given shape, if one is pooled.
    pub fn acquire(&mut self, width: u32, height: u32, format: wgpu::TextureFormat) -> Option<wgpu::Texture> {
        self.pool.get_mut(&(width, height, format)).and_then(|v| v.pop())
    }

    /// Return a texture for reuse. Dropped when the pool is full for its key.
    pub fn release(&mut self, texture: wgpu::Texture) {
        let key: PoolKey = (texture.width(), texture.height(), texture.format());
        let entry = self.pool.entry(key).or_default();
        if entry.len() < self.max_per_key {
            entry.push(texture);
        }
    }

    pub fn clear(&mut self) {
        self.pool.clear();
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(|v| v.len()).sum()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
