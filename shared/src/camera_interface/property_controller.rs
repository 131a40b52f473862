//! Lock-guarded access to the properties of a shared camera.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CameraError, CameraInterface, CameraProperty, CameraResult, PropertyRange};

/// Camera handle shared between the acquisition thread and controllers.
pub type SharedCamera = Arc<Mutex<Box<dyn CameraInterface>>>;

/// Wrap a driver into a [`SharedCamera`].
pub fn share_camera<C: CameraInterface + 'static>(camera: C) -> SharedCamera {
    Arc::new(Mutex::new(Box::new(camera)))
}

/// Property surface used by exposure control and the profiler.
///
/// Reads return `None` while no camera is available or when the property is
/// not supported.
pub trait PropertyAccess: Send + Sync {
    /// True only while a camera is opened.
    fn available(&self) -> bool;

    fn has_property(&self, property: CameraProperty) -> bool;

    fn property_value(&self, property: CameraProperty) -> Option<f64>;

    /// Write a property, returning the value the camera applied.
    fn set_property_value(&self, property: CameraProperty, value: f64) -> CameraResult<f64>;

    fn property_range(&self, property: CameraProperty) -> Option<PropertyRange>;

    /// Physical pixel size of the camera, 1.0 when unknown.
    fn pixel_size(&self) -> f64 {
        1.0
    }
}

/// [`PropertyAccess`] over a [`SharedCamera`].
#[derive(Clone)]
pub struct PropertyController {
    camera: SharedCamera,
}

impl PropertyController {
    pub fn new(camera: SharedCamera) -> Self {
        Self { camera }
    }

    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn CameraInterface>> {
        self.camera.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PropertyAccess for PropertyController {
    fn available(&self) -> bool {
        self.lock().is_opened()
    }

    fn has_property(&self, property: CameraProperty) -> bool {
        let camera = self.lock();
        camera.is_opened() && camera.has_property(property)
    }

    fn property_value(&self, property: CameraProperty) -> Option<f64> {
        let camera = self.lock();
        if !camera.is_opened() || !camera.has_property(property) {
            return None;
        }
        camera.property_value(property).ok()
    }

    fn set_property_value(&self, property: CameraProperty, value: f64) -> CameraResult<f64> {
        let mut camera = self.lock();
        if !camera.is_opened() {
            return Err(CameraError::NotOpened);
        }
        if !camera.has_property(property) {
            return Err(CameraError::UnsupportedProperty(property));
        }
        camera.set_property_value(property, value)
    }

    fn property_range(&self, property: CameraProperty) -> Option<PropertyRange> {
        let camera = self.lock();
        if !camera.is_opened() || !camera.has_property(property) {
            return None;
        }
        camera.property_range(property).ok()
    }

    fn pixel_size(&self) -> f64 {
        self.lock().pixel_size()
    }
}
