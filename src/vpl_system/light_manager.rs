use nalgebra::Point3;
use rand::Rng;

use super::{
    light_array::LightArray,
    photon_tracer::{PhotonTracer, TraceStats},
    point_light::{PrimaryLight, Vpl},
};
use crate::{
    error::{Error, Result},
    raytrace_system::scene::Scene,
    settings::{PrimaryLightSettings, TracerSettings},
};

/// Keeps the primary light array and the VPL array in sync with the light settings.
pub struct LightManager {
    primary: PrimaryLightSettings,
    tracer: PhotonTracer,
    max_vpls: usize,
    gi_enabled: bool,
}

impl LightManager {
    pub fn new(primary: PrimaryLightSettings, tracer: TracerSettings) -> LightManager {
        LightManager {
            primary,
            max_vpls: tracer.max_vpls,
            tracer: PhotonTracer::new(tracer),
            gi_enabled: true,
        }
    }

    pub fn gi_enabled(&self) -> bool {
        self.gi_enabled
    }

    pub fn set_gi_enabled(&mut self, enabled: bool) {
        self.gi_enabled = enabled;
    }

    pub fn primary_light(&self) -> PrimaryLight {
        PrimaryLight::new(self.primary.position(), self.primary.intensity())
    }

    pub fn set_primary_position(&mut self, position: Point3<f32>) {
        self.primary.position = [position.x, position.y, position.z];
    }

    /// Resets `ppls` to the configured primary light and, with GI on, retraces `vpls`
    /// from it towards `target`.
    ///
    /// A tracer that cannot fill its quota turns GI off and leaves `vpls` empty instead
    /// of failing. Returns the trace statistics when VPLs were traced.
    pub fn update_lights<R: Rng + ?Sized>(
        &mut self,
        scene: &Scene,
        target: &Point3<f32>,
        ppls: &mut LightArray<PrimaryLight>,
        vpls: &mut LightArray<Vpl>,
        rng: &mut R,
    ) -> Result<Option<TraceStats>> {
        let light = self.primary_light();
        ppls.clear();
        ppls.add_light(light)?;

        if !self.gi_enabled {
            vpls.clear();
            return Ok(None);
        }

        let shoot_dir = target - light.position;
        match self
            .tracer
            .trace(scene, &light, &shoot_dir, self.max_vpls, vpls, rng)
        {
            Ok(stats) => Ok(Some(stats)),
            Err(err @ Error::VplQuotaNotMet { .. }) => {
                log::warn!("disabling global illumination: {err}");
                self.gi_enabled = false;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        raytrace_system::scene::{SurfaceScene, cornell_box},
        settings::KdTreeSettings,
    };

    fn manager(max_vpls: usize) -> LightManager {
        let tracer = TracerSettings {
            max_vpls,
            ..TracerSettings::default()
        };
        LightManager::new(PrimaryLightSettings::default(), tracer)
    }

    #[test]
    fn test_update_traces_vpls() {
        let surfaces = cornell_box().build(&KdTreeSettings::default()).unwrap();
        let scene = Scene::new(Arc::new(surfaces), 548.8);
        let mut manager = manager(32);
        let mut ppls = LightArray::new(1);
        let mut vpls = LightArray::new(32);
        let mut rng = StdRng::seed_from_u64(3);

        // a stale primary light is replaced
        ppls.add_light(PrimaryLight::new(Point3::origin(), nalgebra::Vector3::zeros()))
            .unwrap();
        let stats = manager
            .update_lights(&scene, &Point3::new(278.0, 0.0, 280.0), &mut ppls, &mut vpls, &mut rng)
            .unwrap()
            .unwrap();

        assert_eq!(ppls.len(), 1);
        assert_eq!(ppls[0], manager.primary_light());
        assert_eq!(stats.vpls, 32);
        assert_eq!(vpls.len(), 32);
        assert!(manager.gi_enabled());
    }

    #[test]
    fn test_failed_trace_disables_gi() {
        let surfaces =
            SurfaceScene::new(vec![], vec![], vec![], &KdTreeSettings::default()).unwrap();
        let scene = Scene::new(Arc::new(surfaces), 548.8);
        let mut manager = manager(4);
        let mut ppls = LightArray::new(1);
        let mut vpls = LightArray::new(4);
        let mut rng = StdRng::seed_from_u64(4);

        let result = manager
            .update_lights(&scene, &Point3::origin(), &mut ppls, &mut vpls, &mut rng)
            .unwrap();
        assert!(result.is_none());
        assert!(!manager.gi_enabled());
        assert!(vpls.is_empty());
        assert_eq!(ppls.len(), 1);

        // stays off until re-enabled
        let result = manager
            .update_lights(&scene, &Point3::origin(), &mut ppls, &mut vpls, &mut rng)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_other_errors_propagate() {
        let surfaces = cornell_box().build(&KdTreeSettings::default()).unwrap();
        let scene = Scene::new(Arc::new(surfaces), 548.8);
        let mut manager = manager(8);
        let mut ppls = LightArray::new(1);
        // too small for the configured VPL count
        let mut vpls = LightArray::new(4);
        let mut rng = StdRng::seed_from_u64(5);

        let err = manager
            .update_lights(&scene, &Point3::origin(), &mut ppls, &mut vpls, &mut rng)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSettings(_)));
        assert!(manager.gi_enabled());
    }

    #[test]
    fn test_moving_the_primary_light() {
        let mut manager = manager(1);
        manager.set_primary_position(Point3::new(1.0, 2.0, 3.0));
        assert_eq!(manager.primary_light().position, Point3::new(1.0, 2.0, 3.0));
    }
}
