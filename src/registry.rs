//! Mass metadata operations over a selection of scene objects.

use tracing::debug;

use crate::error::ComError;
use crate::mesh::Mesh;
use crate::scene::{DisplayStyle, MassComponent, ObjectId, Scene};

impl Scene {
    /// Opts mesh objects into the mass system. Objects that already carry
    /// metadata only get their missing fields filled; edited values are kept.
    pub fn add_mass_properties(&mut self, ids: &[ObjectId]) -> usize {
        let mut touched = 0;
        for &id in ids {
            if !self.is_mesh(id) {
                continue;
            }
            match self.masses.get_mut(&id) {
                Some(mass) => {
                    let before = mass.clone();
                    mass.density.get_or_insert(MassComponent::DEFAULT_DENSITY);
                    mass.volume.get_or_insert(MassComponent::DEFAULT_VOLUME);
                    if *mass != before {
                        touched += 1;
                    }
                }
                None => {
                    self.masses.insert(id, MassComponent::default());
                    touched += 1;
                }
            }
        }
        debug!(touched, "added mass properties");
        touched
    }

    pub fn remove_mass_properties(&mut self, ids: &[ObjectId]) -> usize {
        let removed = ids
            .iter()
            .filter(|&&id| self.masses.remove(&id).is_some())
            .count();
        debug!(removed, "removed mass properties");
        removed
    }

    /// Sets the active flag on a mass object and mirrors it in the display
    /// style. Returns false when the object has no mass metadata.
    pub fn set_active(&mut self, id: ObjectId, active: bool) -> bool {
        let Some(mass) = self.masses.get_mut(&id) else {
            return false;
        };
        mass.active = active;
        let style = if active {
            DisplayStyle::Solid
        } else {
            DisplayStyle::Wire
        };
        self.set_display(id, style);
        true
    }

    pub fn set_active_all(&mut self, ids: &[ObjectId], active: bool) -> usize {
        ids.iter().filter(|&&id| self.set_active(id, active)).count()
    }

    pub fn toggle_active(&mut self, ids: &[ObjectId]) -> usize {
        let mut toggled = 0;
        for &id in ids {
            if let Some(active) = self.masses.get(&id).map(|m| m.active) {
                self.set_active(id, !active);
                toggled += 1;
            }
        }
        toggled
    }

    /// Overwrites the volume of mass-tagged mesh objects with `volume_of`
    /// applied to their geometry.
    pub fn recalculate_volume<F>(&mut self, ids: &[ObjectId], volume_of: F) -> usize
    where
        F: Fn(&Mesh) -> f64,
    {
        let mut updated = 0;
        for &id in ids {
            if !self.is_mesh(id) {
                continue;
            }
            let (Some(mesh), Some(mass)) = (self.meshes.get(&id), self.masses.get_mut(&id))
            else {
                continue;
            };
            let volume = volume_of(mesh);
            debug!(object = id.raw(), volume, "recalculated volume");
            mass.volume = Some(volume);
            updated += 1;
        }
        updated
    }

    /// Writes the given density and/or volume onto objects that already carry
    /// mass metadata. Values are checked before anything is written.
    pub fn set_mass_values(
        &mut self,
        ids: &[ObjectId],
        density: Option<f64>,
        volume: Option<f64>,
    ) -> Result<usize, ComError> {
        if let Some(density) = density {
            check_density(density)?;
        }
        if let Some(volume) = volume {
            check_volume(volume)?;
        }
        let mut updated = 0;
        for id in ids {
            let Some(mass) = self.masses.get_mut(id) else {
                continue;
            };
            if density.is_some() {
                mass.density = density;
            }
            if volume.is_some() {
                mass.volume = volume;
            }
            updated += 1;
        }
        debug!(updated, ?density, ?volume, "set mass values");
        Ok(updated)
    }
}

pub fn check_density(density: f64) -> Result<(), ComError> {
    if density.is_finite() && density > 0.0 {
        Ok(())
    } else {
        Err(ComError::InvalidDensity(density))
    }
}

pub fn check_volume(volume: f64) -> Result<(), ComError> {
    if volume.is_finite() && volume >= 0.0 {
        Ok(())
    } else {
        Err(ComError::InvalidVolume(volume))
    }
}
