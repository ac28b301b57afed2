use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::FrameBuffer;
use crate::output::error::{OutputError, Result};

/// The host surface went away (window closed, texture released).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("preview surface lost")]
pub struct SurfaceLost;

/// Something that can display composited frames, owned by the host.
pub trait PreviewSurface: Send + Sync {
    /// Show `frame`. Returning [`SurfaceLost`] detaches the surface.
    fn present(&self, frame: &Arc<FrameBuffer>) -> std::result::Result<(), SurfaceLost>;
}

/// Called with the surface handle when a surface is detached after loss.
pub type SurfaceLostCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Hands out preview surface handles and tracks what is attached to each.
pub struct SurfaceRegistry {
    next: AtomicU64,
    surfaces: Mutex<HashMap<u64, Option<Arc<dyn PreviewSurface>>>>,
}

impl Default for SurfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            surfaces: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a new handle with nothing attached.
    pub fn allocate(&self) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.surfaces.lock().insert(handle, None);
        debug!(handle, "preview surface allocated");
        handle
    }

    pub fn attach(&self, handle: u64, surface: Arc<dyn PreviewSurface>) -> Result<()> {
        let mut surfaces = self.surfaces.lock();
        let slot = surfaces
            .get_mut(&handle)
            .ok_or(OutputError::UnknownSurface(handle))?;
        *slot = Some(surface);
        debug!(handle, "preview surface attached");
        Ok(())
    }

    /// Detach whatever is attached; the handle stays valid.
    pub fn detach(&self, handle: u64) -> bool {
        self.surfaces
            .lock()
            .get_mut(&handle)
            .and_then(Option::take)
            .is_some()
    }

    /// Forget the handle entirely.
    pub fn release(&self, handle: u64) -> bool {
        let removed = self.surfaces.lock().remove(&handle).is_some();
        if removed {
            debug!(handle, "preview surface released");
        }
        removed
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.surfaces.lock().contains_key(&handle)
    }

    pub fn surface(&self, handle: u64) -> Option<Arc<dyn PreviewSurface>> {
        self.surfaces.lock().get(&handle).cloned().flatten()
    }
}

/// Keeps the latest composited frame and pushes it to the attached surface.
pub struct PreviewSink {
    handle: u64,
    registry: Arc<SurfaceRegistry>,
    latest: Mutex<Option<Arc<FrameBuffer>>>,
    presented: AtomicU64,
    unpresented: AtomicU64,
    on_lost: Option<SurfaceLostCallback>,
}

impl PreviewSink {
    pub fn new(handle: u64, registry: Arc<SurfaceRegistry>, on_lost: Option<SurfaceLostCallback>) -> Self {
        Self {
            handle,
            registry,
            latest: Mutex::new(None),
            presented: AtomicU64::new(0),
            unpresented: AtomicU64::new(0),
            on_lost,
        }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Publish a composited frame.
    pub fn publish(&self, frame: FrameBuffer) {
        let frame = Arc::new(frame);
        *self.latest.lock() = Some(Arc::clone(&frame));

        let Some(surface) = self.registry.surface(self.handle) else {
            self.unpresented.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match surface.present(&frame) {
            Ok(()) => {
                self.presented.fetch_add(1, Ordering::Relaxed);
            }
            Err(SurfaceLost) => {
                warn!(handle = self.handle, "preview surface lost, detaching");
                self.registry.detach(self.handle);
                self.unpresented.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = &self.on_lost {
                    cb(self.handle);
                }
            }
        }
    }

    pub fn latest_frame(&self) -> Option<Arc<FrameBuffer>> {
        self.latest.lock().clone()
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Frames published while no surface was attached.
    pub fn unpresented_frames(&self) -> u64 {
        self.unpresented.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgba;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FlakySurface {
        shown: AtomicU64,
        lost: AtomicBool,
    }

    impl PreviewSurface for FlakySurface {
        fn present(&self, _frame: &Arc<FrameBuffer>) -> std::result::Result<(), SurfaceLost> {
            if self.lost.load(Ordering::Relaxed) {
                return Err(SurfaceLost);
            }
            self.shown.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn frame() -> FrameBuffer {
        FrameBuffer::solid(4, 4, Rgba::opaque(1, 2, 3), 0)
    }

    #[test]
    fn handles_are_unique_and_releasable() {
        let registry = SurfaceRegistry::new();
        let a = registry.allocate();
        let b = registry.allocate();
        assert_ne!(a, b);
        assert!(registry.release(a));
        assert!(!registry.release(a));
        assert!(registry.contains(b));
    }

    #[test]
    fn attach_requires_allocated_handle() {
        let registry = SurfaceRegistry::new();
        let surface: Arc<dyn PreviewSurface> = Arc::new(FlakySurface::default());
        assert!(matches!(
            registry.attach(42, surface),
            Err(OutputError::UnknownSurface(42))
        ));
    }

    #[test]
    fn sink_presents_and_keeps_latest() {
        let registry = Arc::new(SurfaceRegistry::new());
        let handle = registry.allocate();
        let surface = Arc::new(FlakySurface::default());
        registry.attach(handle, surface.clone()).unwrap();

        let sink = PreviewSink::new(handle, Arc::clone(&registry), None);
        sink.publish(frame());
        sink.publish(frame());
        assert_eq!(surface.shown.load(Ordering::Relaxed), 2);
        assert_eq!(sink.presented_frames(), 2);
        assert!(sink.latest_frame().is_some());
    }

    #[test]
    fn lost_surface_is_detached_and_reported() {
        let registry = Arc::new(SurfaceRegistry::new());
        let handle = registry.allocate();
        let surface = Arc::new(FlakySurface::default());
        registry.attach(handle, surface.clone()).unwrap();

        let reported = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&reported);
        let cb: SurfaceLostCallback = Arc::new(move |h| seen.store(h, Ordering::Relaxed));
        let sink = PreviewSink::new(handle, Arc::clone(&registry), Some(cb));

        surface.lost.store(true, Ordering::Relaxed);
        sink.publish(frame());
        assert_eq!(reported.load(Ordering::Relaxed), handle);
        assert!(registry.surface(handle).is_none());

        // Frames keep flowing into the slot without a surface.
        sink.publish(frame());
        assert_eq!(sink.unpresented_frames(), 2);
        assert!(registry.contains(handle));
    }
}
