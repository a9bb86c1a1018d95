//! GPU contexts, texture handles and the thread-affinity rules between them.
//!
//! A context can be current on at most one thread, and a thread has at most
//! one current context. Textures live in the namespace of a sharing group:
//! a handle created while any context of the group is current is valid from
//! every other context of that group.
//!
//! Upload code never calls the provider directly. It goes through a
//! [`ContextGuard`], which can only exist on a thread where its context is
//! current, and which cannot be sent to another thread.

use crate::decode::DecodedImage;
use crate::error::ContextError;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Opaque identifier of a GPU-resident texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u32);

impl TextureHandle {
    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Identifier of a graphics context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

/// The windowing layer's context primitives.
///
/// `make_current`, `current_context` and the texture calls all act on the
/// calling thread's binding. The texture calls demand a [`ContextGuard`], so
/// holding the provider alone is not enough to reach them.
pub trait ContextProvider: Send + Sync {
    /// Create an invisible context sharing object namespaces with `primary`.
    fn create_shared_context(&self, primary: ContextId) -> Result<ContextId, ContextError>;

    /// Bind `context` on the calling thread, or release the binding with `None`.
    fn make_current(&self, context: Option<ContextId>) -> Result<(), ContextError>;

    /// Context current on the calling thread
    fn current_context(&self) -> Option<ContextId>;

    fn create_texture(&self, ctx: &ContextGuard<'_>, image: &DecodedImage) -> Result<TextureHandle, ContextError>;

    fn delete_texture(&self, ctx: &ContextGuard<'_>, handle: TextureHandle) -> Result<(), ContextError>;
}

/// What a guard does to the thread's binding when it goes away
#[derive(Debug, Clone, Copy)]
enum Restore {
    /// The context was already current; leave it
    Keep,
    /// Put back whatever was current before, or nothing
    Previous(Option<ContextId>),
}

/// Proof that a context is current on this thread.
///
/// Texture creation and deletion are only reachable through a guard. The
/// guard is `!Send`, so the proof cannot migrate to another thread.
pub struct ContextGuard<'a> {
    provider: &'a dyn ContextProvider,
    context: ContextId,
    restore: Restore,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ContextGuard<'a> {
    /// Make `context` current on this thread for the guard's lifetime.
    pub fn bind(provider: &'a dyn ContextProvider, context: ContextId) -> Result<Self, ContextError> {
        let previous = provider.current_context();
        if previous == Some(context) {
            return Self::assume_current(provider, context);
        }

        provider.make_current(Some(context))?;
        Ok(Self {
            provider,
            context,
            restore: Restore::Previous(previous),
            _not_send: PhantomData,
        })
    }

    /// Borrow a context the windowing layer already made current here.
    pub fn assume_current(provider: &'a dyn ContextProvider, context: ContextId) -> Result<Self, ContextError> {
        let found = provider.current_context();
        if found != Some(context) {
            return Err(ContextError::WrongContext {
                expected: context,
                found,
            });
        }

        Ok(Self {
            provider,
            context,
            restore: Restore::Keep,
            _not_send: PhantomData,
        })
    }

    #[inline]
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn create_texture(&self, image: &DecodedImage) -> Result<TextureHandle, ContextError> {
        self.provider.create_texture(self, image)
    }

    pub fn delete_texture(&self, handle: TextureHandle) -> Result<(), ContextError> {
        self.provider.delete_texture(self, handle)
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Restore::Previous(previous) = self.restore {
            if let Err(e) = self.provider.make_current(previous) {
                log::error!("Failed to restore context binding after {:?}: {}", self.context, e);
            }
        }
    }
}

/// Texture storage of a [`SoftwareGpu`]
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major
    pub pixels: Vec<u8>,
}

/// Kind of recorded texture call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuCallKind {
    CreateTexture,
    DeleteTexture,
    ReadTexture,
}

/// One texture call as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCall {
    pub kind: GpuCallKind,
    pub texture: TextureHandle,
    pub context: ContextId,
    pub thread: ThreadId,
}

struct ContextSlot {
    group: u32,
    visible: bool,
    owner: Option<ThreadId>,
}

struct StoredTexture {
    group: u32,
    texture: Texture,
}

#[derive(Default)]
struct DeviceState {
    contexts: Vec<ContextSlot>,
    current: HashMap<ThreadId, ContextId>,
    textures: HashMap<TextureHandle, StoredTexture>,
    next_group: u32,
    next_texture: u32,
    calls: Vec<GpuCall>,
}

impl DeviceState {
    fn slot(&self, context: ContextId) -> Result<&ContextSlot, ContextError> {
        self.contexts
            .get(context.0 as usize)
            .ok_or(ContextError::UnknownContext(context))
    }

    /// Context current on `thread` plus its sharing group
    fn current_binding(&self, thread: ThreadId) -> Result<(ContextId, u32), ContextError> {
        let context = *self.current.get(&thread).ok_or(ContextError::NotCurrent)?;
        Ok((context, self.slot(context)?.group))
    }

    fn record(&mut self, kind: GpuCallKind, texture: TextureHandle, context: ContextId, thread: ThreadId) {
        self.calls.push(GpuCall {
            kind,
            texture,
            context,
            thread,
        });
    }
}

/// In-process device with GL-style context currency and sharing groups.
///
/// Textures are plain RGBA buffers in memory. Every texture call is checked
/// against the calling thread's binding and recorded in a call log.
pub struct SoftwareGpu {
    state: Mutex<DeviceState>,
    sharing_supported: bool,
}

impl SoftwareGpu {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState::default()),
            sharing_supported: true,
        }
    }

    /// A device whose driver refuses to create shared contexts
    pub fn without_sharing() -> Self {
        Self {
            sharing_supported: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a context in a new sharing group (the windowing layer's primary)
    pub fn create_context(&self, visible: bool) -> ContextId {
        let mut state = self.lock();
        let group = state.next_group;
        state.next_group += 1;
        let id = ContextId(state.contexts.len() as u32);
        state.contexts.push(ContextSlot {
            group,
            visible,
            owner: None,
        });
        id
    }

    pub fn is_visible(&self, context: ContextId) -> Result<bool, ContextError> {
        Ok(self.lock().slot(context)?.visible)
    }

    /// Whether two contexts see each other's textures
    pub fn shares_objects(&self, a: ContextId, b: ContextId) -> Result<bool, ContextError> {
        let state = self.lock();
        Ok(state.slot(a)?.group == state.slot(b)?.group)
    }

    /// Read a texture's pixels. Needs a current context of the texture's group.
    pub fn with_texture<R>(
        &self,
        ctx: &ContextGuard<'_>,
        handle: TextureHandle,
        f: impl FnOnce(&Texture) -> R,
    ) -> Result<R, ContextError> {
        let thread = thread::current().id();
        let mut state = self.lock();
        let (context, group) = state.current_binding(thread)?;
        ensure_guarded(ctx, context)?;

        let stored = state
            .textures
            .get(&handle)
            .ok_or(ContextError::UnknownTexture(handle))?;
        if stored.group != group {
            return Err(ContextError::ForeignTexture(handle));
        }
        let result = f(&stored.texture);
        state.record(GpuCallKind::ReadTexture, handle, context, thread);
        Ok(result)
    }

    /// Every texture call so far
    pub fn calls(&self) -> Vec<GpuCall> {
        self.lock().calls.clone()
    }

    pub fn texture_count(&self) -> usize {
        self.lock().textures.len()
    }
}

impl Default for SoftwareGpu {
    fn default() -> Self {
        Self::new()
    }
}

/// The guard must still match the thread's binding; a raw `make_current`
/// behind its back invalidates it.
fn ensure_guarded(ctx: &ContextGuard<'_>, current: ContextId) -> Result<(), ContextError> {
    if ctx.context() == current {
        Ok(())
    } else {
        Err(ContextError::WrongContext {
            expected: ctx.context(),
            found: Some(current),
        })
    }
}

impl ContextProvider for SoftwareGpu {
    fn create_shared_context(&self, primary: ContextId) -> Result<ContextId, ContextError> {
        if !self.sharing_supported {
            return Err(ContextError::SharingUnsupported);
        }

        let mut state = self.lock();
        let group = state.slot(primary)?.group;
        let id = ContextId(state.contexts.len() as u32);
        state.contexts.push(ContextSlot {
            group,
            visible: false,
            owner: None,
        });
        log::debug!("Created shared context {:?} in group of {:?}", id, primary);
        Ok(id)
    }

    fn make_current(&self, context: Option<ContextId>) -> Result<(), ContextError> {
        let thread = thread::current().id();
        let mut state = self.lock();

        if let Some(context) = context {
            match state.slot(context)?.owner {
                Some(owner) if owner != thread => return Err(ContextError::Busy(context)),
                _ => {}
            }
        }

        // Release whatever this thread had before
        if let Some(previous) = state.current.remove(&thread) {
            if let Some(slot) = state.contexts.get_mut(previous.0 as usize) {
                slot.owner = None;
            }
        }

        if let Some(context) = context {
            state.contexts[context.0 as usize].owner = Some(thread);
            state.current.insert(thread, context);
        }
        Ok(())
    }

    fn current_context(&self) -> Option<ContextId> {
        self.lock().current.get(&thread::current().id()).copied()
    }

    fn create_texture(&self, ctx: &ContextGuard<'_>, image: &DecodedImage) -> Result<TextureHandle, ContextError> {
        let thread = thread::current().id();
        let mut state = self.lock();
        let (context, group) = state.current_binding(thread)?;
        ensure_guarded(ctx, context)?;

        let expected = image.expected_len();
        if image.pixels.len() != expected || image.channel_count != 4 {
            return Err(ContextError::InvalidImage {
                expected: image.width as usize * image.height as usize * 4,
                actual: image.pixels.len(),
            });
        }

        state.next_texture += 1;
        let handle = TextureHandle(state.next_texture);
        state.textures.insert(
            handle,
            StoredTexture {
                group,
                texture: Texture {
                    width: image.width,
                    height: image.height,
                    pixels: image.pixels.clone(),
                },
            },
        );
        state.record(GpuCallKind::CreateTexture, handle, context, thread);
        Ok(handle)
    }

    fn delete_texture(&self, ctx: &ContextGuard<'_>, handle: TextureHandle) -> Result<(), ContextError> {
        let thread = thread::current().id();
        let mut state = self.lock();
        let (context, group) = state.current_binding(thread)?;
        ensure_guarded(ctx, context)?;

        match state.textures.get(&handle) {
            None => return Err(ContextError::UnknownTexture(handle)),
            Some(stored) if stored.group != group => return Err(ContextError::ForeignTexture(handle)),
            Some(_) => {}
        }
        state.textures.remove(&handle);
        state.record(GpuCallKind::DeleteTexture, handle, context, thread);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> DecodedImage {
        DecodedImage::new(vec![7u8; (width * height * 4) as usize], width, height, 4)
    }

    #[test]
    fn test_texture_requires_current_context() {
        let gpu = SoftwareGpu::new();
        let primary = gpu.create_context(true);

        assert!(ContextGuard::assume_current(&gpu, primary).is_err());

        let guard = ContextGuard::bind(&gpu, primary).unwrap();
        let handle = guard.create_texture(&image(2, 2)).unwrap();
        assert_eq!(gpu.texture_count(), 1);

        let width = gpu.with_texture(&guard, handle, |t| t.width).unwrap();
        assert_eq!(width, 2);

        drop(guard);
        assert_eq!(gpu.current_context(), None);
    }

    #[test]
    fn test_context_is_current_on_one_thread_only() {
        let gpu = SoftwareGpu::new();
        let primary = gpu.create_context(true);
        gpu.make_current(Some(primary)).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                assert!(matches!(
                    ContextGuard::bind(&gpu, primary),
                    Err(ContextError::Busy(_))
                ));
            });
        });

        // Released on the main thread, now free for others
        gpu.make_current(None).unwrap();
        thread::scope(|s| {
            s.spawn(|| {
                let guard = ContextGuard::bind(&gpu, primary).unwrap();
                assert_eq!(guard.context(), primary);
            });
        });
    }

    #[test]
    fn test_shared_context_sees_textures_across_threads() {
        let gpu = SoftwareGpu::new();
        let primary = gpu.create_context(true);
        let secondary = gpu.create_shared_context(primary).unwrap();
        assert!(gpu.shares_objects(primary, secondary).unwrap());
        assert!(!gpu.is_visible(secondary).unwrap());

        let handle = thread::scope(|s| {
            s.spawn(|| {
                let guard = ContextGuard::bind(&gpu, secondary).unwrap();
                guard.create_texture(&image(3, 1)).unwrap()
            })
            .join()
            .unwrap()
        });

        let guard = ContextGuard::bind(&gpu, primary).unwrap();
        assert_eq!(gpu.with_texture(&guard, handle, |t| t.pixels.len()).unwrap(), 12);
        guard.delete_texture(handle).unwrap();
        assert_eq!(gpu.texture_count(), 0);
    }

    #[test]
    fn test_foreign_group_texture_rejected() {
        let gpu = SoftwareGpu::new();
        let first = gpu.create_context(true);
        let second = gpu.create_context(true);
        assert!(!gpu.shares_objects(first, second).unwrap());

        let handle = {
            let guard = ContextGuard::bind(&gpu, first).unwrap();
            guard.create_texture(&image(1, 1)).unwrap()
        };

        let guard = ContextGuard::bind(&gpu, second).unwrap();
        assert!(matches!(
            guard.delete_texture(handle),
            Err(ContextError::ForeignTexture(_))
        ));
    }

    #[test]
    fn test_guard_restores_previous_binding() {
        let gpu = SoftwareGpu::new();
        let primary = gpu.create_context(true);
        let secondary = gpu.create_shared_context(primary).unwrap();
        gpu.make_current(Some(primary)).unwrap();

        {
            let guard = ContextGuard::bind(&gpu, secondary).unwrap();
            assert_eq!(gpu.current_context(), Some(secondary));
            assert_eq!(guard.context(), secondary);
        }
        assert_eq!(gpu.current_context(), Some(primary));

        // Binding the already-current context leaves it in place
        drop(ContextGuard::bind(&gpu, primary).unwrap());
        assert_eq!(gpu.current_context(), Some(primary));
    }

    #[test]
    fn test_stale_guard_is_rejected() {
        let gpu = SoftwareGpu::new();
        let primary = gpu.create_context(true);
        let secondary = gpu.create_shared_context(primary).unwrap();
        gpu.make_current(Some(primary)).unwrap();
        let guard = ContextGuard::assume_current(&gpu, primary).unwrap();

        // Binding swapped underneath the guard
        gpu.make_current(Some(secondary)).unwrap();
        assert!(matches!(
            guard.create_texture(&image(1, 1)),
            Err(ContextError::WrongContext { .. })
        ));

        gpu.make_current(None).unwrap();
        assert!(matches!(
            guard.create_texture(&image(1, 1)),
            Err(ContextError::NotCurrent)
        ));
        assert!(gpu.calls().is_empty());
    }

    #[test]
    fn test_sharing_unsupported() {
        let gpu = SoftwareGpu::without_sharing();
        let primary = gpu.create_context(true);
        assert!(matches!(
            gpu.create_shared_context(primary),
            Err(ContextError::SharingUnsupported)
        ));
    }

    #[test]
    fn test_rejects_malformed_image() {
        let gpu = SoftwareGpu::new();
        let primary = gpu.create_context(true);
        let guard = ContextGuard::bind(&gpu, primary).unwrap();

        let bad = DecodedImage::new(vec![0; 5], 2, 2, 4);
        assert!(matches!(
            guard.create_texture(&bad),
            Err(ContextError::InvalidImage { expected: 16, actual: 5 })
        ));
        assert!(gpu.calls().is_empty());
    }
}
