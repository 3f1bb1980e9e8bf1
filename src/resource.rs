// ============================================================================
// TEXTURE RESOURCES - source loading, load state and slot sharing
// ============================================================================
//
// Resources live in a registry owned by the viewer. Slots hold ids, never the
// resource itself. Decoding runs on the rayon pool and reports back through an
// mpsc channel that is drained on the tick thread; a completion whose id has
// already been disposed is dropped without touching anything.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use image::RgbaImage;

use crate::geometry::PixelSize;

/// Where a texture comes from.
#[derive(Clone, Debug)]
pub enum ResourceSource {
    /// Already-decoded pixels. Ready immediately.
    Pixels(Arc<RgbaImage>),
    /// A file to decode in the background.
    Path(PathBuf),
}

impl ResourceSource {
    pub fn pixels(image: RgbaImage) -> Self {
        ResourceSource::Pixels(Arc::new(image))
    }

    /// Identity used to detect the same source assigned to both slots.
    pub fn key(&self) -> SourceKey {
        match self {
            ResourceSource::Pixels(img) => SourceKey::Pixels(Arc::as_ptr(img) as usize),
            ResourceSource::Path(path) => SourceKey::Path(path.clone()),
        }
    }
}

impl From<RgbaImage> for ResourceSource {
    fn from(image: RgbaImage) -> Self {
        ResourceSource::pixels(image)
    }
}

impl From<PathBuf> for ResourceSource {
    fn from(path: PathBuf) -> Self {
        ResourceSource::Path(path)
    }
}

/// Reference identity of a source: buffer address or path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Pixels(usize),
    Path(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Ready,
    Failed(String),
}

/// One decoded (or decoding) texture.
#[derive(Debug)]
pub struct TextureResource {
    pub id: ResourceId,
    pub key: SourceKey,
    pub state: LoadState,
    pixels: Option<Arc<RgbaImage>>,
    /// Number of slots referencing this resource (1 or 2).
    holders: u8,
}

impl TextureResource {
    /// Pixels, only once `Ready`.
    pub fn pixels(&self) -> Option<&Arc<RgbaImage>> {
        match self.state {
            LoadState::Ready => self.pixels.as_ref(),
            _ => None,
        }
    }

    pub fn natural_size(&self) -> Option<PixelSize> {
        self.pixels()
            .map(|img| PixelSize::new(img.width(), img.height()))
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn holders(&self) -> u8 {
        self.holders
    }
}

/// Decode result sent back from a worker.
#[derive(Debug)]
pub struct LoadCompletion {
    pub id: ResourceId,
    pub result: Result<RgbaImage, String>,
}

/// What applying a completion did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Ready(ResourceId),
    Failed(ResourceId, String),
}

pub struct TextureRegistry {
    resources: HashMap<ResourceId, TextureResource>,
    next_id: u64,
    sender: mpsc::Sender<LoadCompletion>,
    receiver: mpsc::Receiver<LoadCompletion>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            resources: HashMap::new(),
            next_id: 1,
            sender,
            receiver,
        }
    }

    /// Register a source and start loading it. Returns immediately.
    pub fn load(&mut self, source: ResourceSource) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        let key = source.key();

        let (state, pixels) = match source {
            ResourceSource::Pixels(img) => (LoadState::Ready, Some(img)),
            ResourceSource::Path(path) => {
                let sender = self.sender.clone();
                rayon::spawn(move || {
                    let result = image::open(&path)
                        .map(|img| img.to_rgba8())
                        .map_err(|e| format!("{}: {}", path.display(), e));
                    let _ = sender.send(LoadCompletion { id, result });
                });
                (LoadState::Pending, None)
            }
        };

        log::debug!("[Load] registered {:?} ({:?})", id, state);
        self.resources.insert(
            id,
            TextureResource {
                id,
                key,
                state,
                pixels,
                holders: 1,
            },
        );
        id
    }

    /// Add a holder to an existing resource (sibling slot sharing).
    pub fn share(&mut self, id: ResourceId) -> Option<ResourceId> {
        let res = self.resources.get_mut(&id)?;
        res.holders = res.holders.saturating_add(1);
        Some(id)
    }

    /// Release one holder. The resource is freed when the last holder lets go.
    /// Returns `true` if the resource was freed.
    pub fn dispose(&mut self, id: ResourceId) -> bool {
        let Some(res) = self.resources.get_mut(&id) else {
            return false;
        };
        res.holders = res.holders.saturating_sub(1);
        if res.holders == 0 {
            self.resources.remove(&id);
            log::debug!("[Load] freed {:?}", id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: ResourceId) -> Option<&TextureResource> {
        self.resources.get(&id)
    }

    pub fn is_ready(&self, id: ResourceId) -> bool {
        self.get(id).is_some_and(TextureResource::is_ready)
    }

    pub fn key_of(&self, id: ResourceId) -> Option<&SourceKey> {
        self.get(id).map(|r| &r.key)
    }

    pub fn live_count(&self) -> usize {
        self.resources.len()
    }

    pub fn has_pending(&self) -> bool {
        self.resources
            .values()
            .any(|r| r.state == LoadState::Pending)
    }

    /// Apply one completion. Completions for disposed resources are dropped.
    pub fn deliver(&mut self, completion: LoadCompletion) -> Option<LoadOutcome> {
        let Some(res) = self.resources.get_mut(&completion.id) else {
            log::debug!("[Load] dropping superseded completion for {:?}", completion.id);
            return None;
        };
        if res.state != LoadState::Pending {
            return None;
        }
        match completion.result {
            Ok(img) => {
                res.pixels = Some(Arc::new(img));
                res.state = LoadState::Ready;
                Some(LoadOutcome::Ready(res.id))
            }
            Err(message) => {
                log::error!("[Load] texture load failed: {}", message);
                res.pixels = None;
                res.state = LoadState::Failed(message.clone());
                Some(LoadOutcome::Failed(res.id, message))
            }
        }
    }

    /// Drain every completion that has arrived so far without blocking.
    pub fn poll(&mut self) -> Vec<LoadOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(completion) = self.receiver.try_recv() {
            if let Some(outcome) = self.deliver(completion) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Block for at most `timeout` waiting for the next completion.
    pub fn wait(&mut self, timeout: Duration) -> Vec<LoadOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => {
                let mut outcomes: Vec<LoadOutcome> = self.deliver(completion).into_iter().collect();
                outcomes.extend(self.poll());
                outcomes
            }
            Err(_) => Vec::new(),
        }
    }
}

impl Default for TextureRegistry {
    fn default() -> Self {
        Self::new()
    }
}
