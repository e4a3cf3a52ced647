//! Center-of-mass aggregation.
//!
//! The pure half (`center_of_mass`, `solve`) works on plain `MassSample`s and
//! knows nothing about scenes. `recompute` snapshots a scene group into samples,
//! runs the pure step and writes the resulting pose back to the marker and,
//! optionally, the cursor. Nothing is kept between calls, so `recompute` can be
//! invoked back to back from a timer and from a manual trigger.
//!
//! Summation follows member order. Reordering members yields the same centroid
//! up to floating-point rounding; bitwise equality across orderings is not
//! guaranteed.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ComSettings;
use crate::error::ComError;
use crate::scene::{ObjectId, Scene};

/// A total whose magnitude is at most this fraction of the summed absolute
/// masses is treated as zero. Only cancelling signed masses get near it; a
/// group of tiny positive bodies does not.
pub const MASS_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassSample {
    pub position: Vector3<f64>,
    pub active: bool,
    pub density: Option<f64>,
    pub volume: Option<f64>,
}

impl MassSample {
    pub fn new(position: Vector3<f64>, density: f64, volume: f64) -> Self {
        Self {
            position,
            active: true,
            density: Some(density),
            volume: Some(volume),
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub snap_cursor: bool,
    pub scale_to_floor: bool,
    pub floor_level: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterOfMass {
    pub position: Vector3<f64>,
    pub total_mass: f64,
    /// Active samples that were summed, including ones with zero mass.
    pub contributors: usize,
}

/// New marker pose produced by one recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3<f64>,
    /// Uniform marker scale, present when scaling to the floor.
    pub scale: Option<f64>,
    /// Cursor location, present when snapping the cursor.
    pub cursor: Option<Vector3<f64>>,
    pub total_mass: f64,
    pub contributors: usize,
}

pub fn center_of_mass<I>(samples: I) -> Result<CenterOfMass, ComError>
where
    I: IntoIterator<Item = MassSample>,
{
    let mut total_mass = 0.0;
    let mut magnitude = 0.0;
    let mut weighted: Vector3<f64> = Vector3::zeros();
    let mut contributors = 0;

    for sample in samples {
        if !sample.active {
            continue;
        }
        let (Some(density), Some(volume)) = (sample.density, sample.volume) else {
            debug!("active sample without density or volume contributes no mass");
            contributors += 1;
            continue;
        };
        let mass = density * volume;
        total_mass += mass;
        magnitude += f64::abs(mass);
        weighted += sample.position * mass;
        contributors += 1;
    }

    if !total_mass.is_finite() || total_mass.abs() <= MASS_EPSILON * magnitude {
        return Err(ComError::ZeroMass { total_mass });
    }

    Ok(CenterOfMass {
        position: weighted / total_mass,
        total_mass,
        contributors,
    })
}

/// Marker scale for a centroid at `height` above `floor`. Zero and negative
/// values are returned unchanged.
pub fn floor_scale(height: f64, floor: f64) -> f64 {
    height - floor
}

pub fn solve<I>(samples: I, options: &UpdateOptions) -> Result<Pose, ComError>
where
    I: IntoIterator<Item = MassSample>,
{
    let com = center_of_mass(samples)?;
    let scale = options
        .scale_to_floor
        .then(|| floor_scale(com.position.z, options.floor_level));
    if let Some(factor) = scale {
        if factor <= 0.0 {
            warn!(
                factor,
                floor = options.floor_level,
                "center of mass is not above the floor; marker scale is degenerate"
            );
        }
    }
    Ok(Pose {
        position: com.position,
        scale,
        cursor: options.snap_cursor.then_some(com.position),
        total_mass: com.total_mass,
        contributors: com.contributors,
    })
}

/// Resolves the configured marker and group, then recomputes and applies the
/// marker pose. On error the scene is left untouched.
pub fn recompute(scene: &mut Scene, settings: &ComSettings) -> Result<Pose, ComError> {
    let (marker, group) = resolve_targets(scene, settings)?;
    let pose = solve(samples(scene, &group), &settings.update_options())?;
    apply(scene, marker, &pose);
    debug!(
        x = pose.position.x,
        y = pose.position.y,
        z = pose.position.z,
        total_mass = pose.total_mass,
        "center of mass updated"
    );
    Ok(pose)
}

/// Checks that marker and group are configured and exist.
pub fn resolve_targets(
    scene: &Scene,
    settings: &ComSettings,
) -> Result<(ObjectId, Vec<ObjectId>), ComError> {
    let marker_name = settings.marker.as_deref().ok_or(ComError::MissingMarker)?;
    let group_name = settings.group.as_deref().ok_or(ComError::MissingGroup)?;
    let marker = scene
        .find(marker_name)
        .ok_or_else(|| ComError::UnknownObject(marker_name.to_string()))?;
    let group = scene
        .group_members(group_name)
        .ok_or_else(|| ComError::UnknownGroup(group_name.to_string()))?;
    Ok((marker, group))
}

fn samples<'a>(
    scene: &'a Scene,
    group: &'a [ObjectId],
) -> impl Iterator<Item = MassSample> + 'a {
    group.iter().filter_map(|&id| {
        let mass = scene.mass(id)?;
        Some(MassSample {
            position: scene.position(id)?,
            active: mass.active,
            density: mass.density,
            volume: mass.volume,
        })
    })
}

fn apply(scene: &mut Scene, marker: ObjectId, pose: &Pose) {
    scene.set_position(marker, pose.position);
    if let Some(cursor) = pose.cursor {
        scene.set_cursor(cursor);
    }
    if let Some(factor) = pose.scale {
        scene.set_scale(marker, Vector3::repeat(factor));
    }
}
