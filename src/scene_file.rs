use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::config::ComSettings;
use crate::mesh::Mesh;
use crate::registry::{check_density, check_volume};
use crate::scene::{DisplayStyle, MassComponent, ObjectKind, Scene, Transform};

fn default_kind() -> ObjectKind {
    ObjectKind::Mesh
}

fn default_scale() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

fn default_active() -> bool {
    true
}

/// On-disk form of a scene: objects with their mass metadata, collections,
/// the cursor and the center-of-mass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    pub name: String,
    #[serde(default)]
    pub cursor: [f64; 3],
    #[serde(default)]
    pub settings: ComSettings,
    pub objects: Vec<ObjectSpec>,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ObjectKind,
    #[serde(default)]
    pub location: [f64; 3],
    #[serde(default = "default_scale")]
    pub scale: [f64; 3],
    #[serde(default)]
    pub display: DisplayStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<GeometrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass: Option<MassSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeometrySpec {
    Cube {
        size: f64,
    },
    Cuboid {
        width: f64,
        depth: f64,
        height: f64,
    },
    Polygons {
        vertices: Vec<[f64; 3]>,
        faces: Vec<Vec<usize>>,
    },
}

impl GeometrySpec {
    pub fn to_mesh(&self) -> Mesh {
        match self {
            GeometrySpec::Cube { size } => Mesh::cube(*size),
            GeometrySpec::Cuboid {
                width,
                depth,
                height,
            } => Mesh::cuboid(*width, *depth, *height),
            GeometrySpec::Polygons { vertices, faces } => Mesh::new(
                vertices.iter().map(|v| Point3::from(*v)).collect(),
                faces.clone(),
            ),
        }
    }

    pub fn from_mesh(mesh: &Mesh) -> Self {
        GeometrySpec::Polygons {
            vertices: mesh.vertices.iter().map(|p| [p.x, p.y, p.z]).collect(),
            faces: mesh.faces.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassSpec {
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

impl SceneFile {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: SceneFile = serde_yaml::from_str(text).context("invalid scene yaml")?;
        file.validate()?;
        Ok(file)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to serialise scene")
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;

        let mut names = HashSet::new();
        for object in &self.objects {
            if !names.insert(object.name.as_str()) {
                bail!("object '{}' defined more than once", object.name);
            }
            if let Some(geometry) = &object.geometry {
                if object.kind != ObjectKind::Mesh {
                    bail!("object '{}' has geometry but is not a mesh", object.name);
                }
                if let Some(face) = geometry.to_mesh().invalid_face() {
                    bail!(
                        "object '{}' face {face} references a missing vertex",
                        object.name
                    );
                }
            }
            if let Some(mass) = &object.mass {
                if let Some(density) = mass.density {
                    check_density(density)
                        .with_context(|| format!("object '{}'", object.name))?;
                }
                if let Some(volume) = mass.volume {
                    check_volume(volume).with_context(|| format!("object '{}'", object.name))?;
                }
            }
        }

        let mut collections = HashSet::new();
        for collection in &self.collections {
            if !collections.insert(collection.name.as_str()) {
                bail!("collection '{}' defined more than once", collection.name);
            }
        }
        for collection in &self.collections {
            for member in &collection.objects {
                if !names.contains(member.as_str()) {
                    bail!(
                        "collection '{}' references unknown object '{member}'",
                        collection.name
                    );
                }
            }
            for child in &collection.children {
                if !collections.contains(child.as_str()) {
                    bail!(
                        "collection '{}' references unknown child collection '{child}'",
                        collection.name
                    );
                }
            }
        }

        if let Some(marker) = &self.settings.marker {
            if !names.contains(marker.as_str()) {
                bail!("marker references unknown object '{marker}'");
            }
        }
        if let Some(group) = &self.settings.group {
            if !collections.contains(group.as_str()) {
                bail!("group references unknown collection '{group}'");
            }
        }
        Ok(())
    }

    pub fn build_scene(&self) -> Scene {
        let mut scene = Scene::new(self.name.clone());
        scene.set_cursor(Vector3::from(self.cursor));
        let mut ids = HashMap::new();
        for spec in &self.objects {
            let transform = Transform {
                translation: Vector3::from(spec.location),
                scale: Vector3::from(spec.scale),
            };
            let id = match (&spec.geometry, spec.kind) {
                (Some(geometry), ObjectKind::Mesh) => {
                    scene.spawn_mesh(spec.name.clone(), transform, geometry.to_mesh())
                }
                _ => scene.spawn_object(spec.name.clone(), spec.kind, transform),
            };
            scene.set_display(id, spec.display);
            if let Some(mass) = &spec.mass {
                scene.set_mass(
                    id,
                    MassComponent {
                        active: mass.active,
                        density: mass.density,
                        volume: mass.volume,
                    },
                );
            }
            ids.insert(spec.name.as_str(), id);
        }
        for collection in &self.collections {
            scene.add_collection(collection.name.clone());
            for member in &collection.objects {
                if let Some(id) = ids.get(member.as_str()) {
                    scene.link(&collection.name, *id);
                }
            }
            for child in &collection.children {
                scene.link_child(&collection.name, child);
            }
        }
        scene
    }

    /// Captures the current state of `scene` so it can be written back.
    pub fn capture(scene: &Scene, settings: &ComSettings) -> Self {
        let object_name = |id| scene.object(id).map(|o| o.name.clone());
        let objects = scene
            .object_ids()
            .into_iter()
            .filter_map(|id| {
                let object = scene.object(id)?;
                let transform = scene.transform(id).cloned().unwrap_or_default();
                Some(ObjectSpec {
                    name: object.name.clone(),
                    kind: object.kind,
                    location: transform.translation.into(),
                    scale: transform.scale.into(),
                    display: object.display,
                    geometry: scene.mesh(id).map(GeometrySpec::from_mesh),
                    mass: scene.mass(id).map(|m| MassSpec {
                        active: m.active,
                        density: m.density,
                        volume: m.volume,
                    }),
                })
            })
            .collect();
        let collections = scene
            .collection_names()
            .filter_map(|name| {
                let collection = scene.collection(name)?;
                Some(CollectionSpec {
                    name: name.to_string(),
                    objects: collection.objects.iter().filter_map(|id| object_name(*id)).collect(),
                    children: collection.children.clone(),
                })
            })
            .collect();
        SceneFile {
            name: scene.name().to_string(),
            cursor: scene.cursor().into(),
            settings: settings.clone(),
            objects,
            collections,
        }
    }
}

pub struct SceneLoader {
    base_dir: PathBuf,
}

impl SceneLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<SceneFile> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scene file {}", path.display()))?;
        SceneFile::from_yaml(&data).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, file: impl AsRef<Path>, scene: &SceneFile) -> Result<PathBuf> {
        let path = self.base_dir.join(file);
        let yaml = scene.to_yaml()?;
        fs::write(&path, yaml)
            .with_context(|| format!("Failed to write scene file {}", path.display()))?;
        Ok(path)
    }
}
