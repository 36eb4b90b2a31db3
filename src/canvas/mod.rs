mod feature;
mod surface;

pub use feature::Feature;
pub use surface::{GraphicsSurface, Rgb24};

use std::sync::{Arc, RwLock};

use crate::effects::EffectsManager;

/// A named pixel surface plus the ordered features that view into it.
///
/// The feature order is the transmission order within a render tick.
/// The canvas owns its features and its effects manager; features only
/// name their channel, they never own it.
pub struct Canvas {
    id: u32,
    name: String,
    surface: RwLock<GraphicsSurface>,
    features: Vec<Feature>,
    effects: Arc<EffectsManager>,
}

impl Canvas {
    pub fn new(id: u32, name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id,
            name: name.into(),
            surface: RwLock::new(GraphicsSurface::new(width, height)),
            features: Vec::new(),
            effects: Arc::new(EffectsManager::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn surface(&self) -> &RwLock<GraphicsSurface> {
        &self.surface
    }

    pub fn width(&self) -> u32 {
        self.surface.read().unwrap().width()
    }

    pub fn height(&self) -> u32 {
        self.surface.read().unwrap().height()
    }

    /// Appends a feature; call during setup, before the render loop
    /// starts.
    pub fn add_feature(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn effects(&self) -> &Arc<EffectsManager> {
        &self.effects
    }

    /// Frames per second the render loop actually achieved over its
    /// last one-second window.
    pub fn fps(&self) -> u32 {
        self.effects.fps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_keep_insertion_order() {
        let mut canvas = Canvas::new(0, "test", 8, 8);
        for i in 0..3 {
            canvas.add_feature(Feature::new(
                i,
                format!("host-{i}"),
                49152,
                8,
                1,
                0,
                i,
                0,
                false,
                false,
                8,
                0.0,
            ));
        }

        let hosts: Vec<&str> = canvas.features().iter().map(|f| f.host_name()).collect();
        assert_eq!(hosts, ["host-0", "host-1", "host-2"]);
    }

    #[test]
    fn surface_dimensions_are_exposed() {
        let canvas = Canvas::new(1, "strip", 144, 1);
        assert_eq!(canvas.width(), 144);
        assert_eq!(canvas.height(), 1);
        assert_eq!(canvas.name(), "strip");
    }
}
