use std::collections::{BTreeMap, HashMap, HashSet};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::mesh::Mesh;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Mesh,
    Empty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStyle {
    #[default]
    Solid,
    Wire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectComponent {
    pub name: String,
    pub kind: ObjectKind,
    pub display: DisplayStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vector3<f64>,
    pub scale: Vector3<f64>,
}

impl Transform {
    pub fn at(translation: Vector3<f64>) -> Self {
        Self {
            translation,
            scale: Vector3::repeat(1.0),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::at(Vector3::zeros())
    }
}

/// Mass metadata attached to an object. Its presence is what marks an object
/// as a mass object; density and volume stay optional so that partially
/// configured objects loaded from disk can be represented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassComponent {
    pub active: bool,
    pub density: Option<f64>,
    pub volume: Option<f64>,
}

impl MassComponent {
    pub const DEFAULT_DENSITY: f64 = 1.0;
    pub const DEFAULT_VOLUME: f64 = 1.0;

    /// Mass contributed to the aggregate: zero when inactive or when either
    /// density or volume is missing.
    pub fn mass(&self) -> f64 {
        match (self.active, self.density, self.volume) {
            (true, Some(density), Some(volume)) => density * volume,
            _ => 0.0,
        }
    }
}

impl Default for MassComponent {
    fn default() -> Self {
        Self {
            active: true,
            density: Some(Self::DEFAULT_DENSITY),
            volume: Some(Self::DEFAULT_VOLUME),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Collection {
    pub objects: Vec<ObjectId>,
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MassSnapshot {
    pub active: bool,
    pub density: Option<f64>,
    pub volume: Option<f64>,
    pub mass: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: u64,
    pub name: String,
    pub kind: ObjectKind,
    pub display: DisplayStyle,
    pub location: [f64; 3],
    pub scale: [f64; 3],
    pub mass: Option<MassSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub name: String,
    pub cursor: [f64; 3],
    pub objects: Vec<ObjectSnapshot>,
}

/// Headless host scene: objects with transforms, optional geometry and
/// optional mass metadata, plus named collections and a 3D cursor.
#[derive(Debug, Clone)]
pub struct Scene {
    name: String,
    next_object: u64,
    cursor: Vector3<f64>,
    pub(crate) objects: HashMap<ObjectId, ObjectComponent>,
    pub(crate) transforms: HashMap<ObjectId, Transform>,
    pub(crate) meshes: HashMap<ObjectId, Mesh>,
    pub(crate) masses: HashMap<ObjectId, MassComponent>,
    pub(crate) collections: BTreeMap<String, Collection>,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_object: 0,
            cursor: Vector3::zeros(),
            objects: HashMap::new(),
            transforms: HashMap::new(),
            meshes: HashMap::new(),
            masses: HashMap::new(),
            collections: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spawn_object(
        &mut self,
        name: impl Into<String>,
        kind: ObjectKind,
        transform: Transform,
    ) -> ObjectId {
        let id = self.allocate();
        self.objects.insert(
            id,
            ObjectComponent {
                name: name.into(),
                kind,
                display: DisplayStyle::default(),
            },
        );
        self.transforms.insert(id, transform);
        id
    }

    /// Spawns a mesh object carrying `mesh` as its geometry.
    pub fn spawn_mesh(
        &mut self,
        name: impl Into<String>,
        transform: Transform,
        mesh: Mesh,
    ) -> ObjectId {
        let id = self.spawn_object(name, ObjectKind::Mesh, transform);
        self.meshes.insert(id, mesh);
        id
    }

    pub fn find(&self, name: &str) -> Option<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, object)| object.name == name)
            .map(|(id, _)| *id)
            .min()
    }

    pub fn object(&self, id: ObjectId) -> Option<&ObjectComponent> {
        self.objects.get(&id)
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.objects.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_mesh(&self, id: ObjectId) -> bool {
        self.objects
            .get(&id)
            .is_some_and(|object| object.kind == ObjectKind::Mesh)
    }

    pub fn mesh(&self, id: ObjectId) -> Option<&Mesh> {
        self.meshes.get(&id)
    }

    pub fn transform(&self, id: ObjectId) -> Option<&Transform> {
        self.transforms.get(&id)
    }

    pub fn position(&self, id: ObjectId) -> Option<Vector3<f64>> {
        self.transforms.get(&id).map(|t| t.translation)
    }

    pub fn set_position(&mut self, id: ObjectId, translation: Vector3<f64>) {
        if let Some(transform) = self.transforms.get_mut(&id) {
            transform.translation = translation;
        }
    }

    pub fn set_scale(&mut self, id: ObjectId, scale: Vector3<f64>) {
        if let Some(transform) = self.transforms.get_mut(&id) {
            transform.scale = scale;
        }
    }

    pub fn cursor(&self) -> Vector3<f64> {
        self.cursor
    }

    pub fn set_cursor(&mut self, location: Vector3<f64>) {
        self.cursor = location;
    }

    pub fn display(&self, id: ObjectId) -> Option<DisplayStyle> {
        self.objects.get(&id).map(|object| object.display)
    }

    pub fn set_display(&mut self, id: ObjectId, style: DisplayStyle) {
        if let Some(object) = self.objects.get_mut(&id) {
            object.display = style;
        }
    }

    pub fn mass(&self, id: ObjectId) -> Option<&MassComponent> {
        self.masses.get(&id)
    }

    pub fn mass_mut(&mut self, id: ObjectId) -> Option<&mut MassComponent> {
        self.masses.get_mut(&id)
    }

    /// Attaches `mass` as-is, replacing any existing metadata.
    pub fn set_mass(&mut self, id: ObjectId, mass: MassComponent) {
        if self.objects.contains_key(&id) {
            self.masses.insert(id, mass);
        }
    }

    pub fn is_mass_object(&self, id: ObjectId) -> bool {
        self.masses.contains_key(&id)
    }

    pub fn add_collection(&mut self, name: impl Into<String>) {
        self.collections.entry(name.into()).or_default();
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Links `id` into `collection`, creating the collection when needed.
    pub fn link(&mut self, collection: &str, id: ObjectId) {
        let entry = self.collections.entry(collection.to_string()).or_default();
        if !entry.objects.contains(&id) {
            entry.objects.push(id);
        }
    }

    /// Nests `child` under `parent`, creating both when needed.
    pub fn link_child(&mut self, parent: &str, child: &str) {
        self.add_collection(child);
        let entry = self.collections.entry(parent.to_string()).or_default();
        if !entry.children.iter().any(|c| c == child) {
            entry.children.push(child.to_string());
        }
    }

    /// Every object in `name` and its child collections, each listed once in
    /// first-seen order. `None` when the collection does not exist.
    pub fn group_members(&self, name: &str) -> Option<Vec<ObjectId>> {
        self.collections.get(name)?;
        let mut members = Vec::new();
        let mut seen_objects = HashSet::new();
        let mut seen_collections = HashSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            if !seen_collections.insert(current) {
                continue;
            }
            let Some(collection) = self.collections.get(current) else {
                continue;
            };
            for id in &collection.objects {
                if seen_objects.insert(*id) {
                    members.push(*id);
                }
            }
            for child in collection.children.iter().rev() {
                stack.push(child.as_str());
            }
        }
        Some(members)
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        let objects = self
            .object_ids()
            .into_iter()
            .filter_map(|id| {
                let object = self.objects.get(&id)?;
                let transform = self.transforms.get(&id).cloned().unwrap_or_default();
                let mass = self.masses.get(&id).map(|m| MassSnapshot {
                    active: m.active,
                    density: m.density,
                    volume: m.volume,
                    mass: (m.mass() * 1000.0).round() / 1000.0,
                });
                Some(ObjectSnapshot {
                    id: id.raw(),
                    name: object.name.clone(),
                    kind: object.kind,
                    display: object.display,
                    location: transform.translation.into(),
                    scale: transform.scale.into(),
                    mass,
                })
            })
            .collect();
        SceneSnapshot {
            name: self.name.clone(),
            cursor: self.cursor.into(),
            objects,
        }
    }

    fn allocate(&mut self) -> ObjectId {
        let id = ObjectId(self.next_object);
        self.next_object += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_find() {
        let mut scene = Scene::new("test");
        let a = scene.spawn_mesh("a", Transform::default(), Mesh::cube(1.0));
        let b = scene.spawn_object("b", ObjectKind::Empty, Transform::default());

        assert_eq!(scene.find("a"), Some(a));
        assert_eq!(scene.find("b"), Some(b));
        assert_eq!(scene.find("c"), None);
        assert!(scene.is_mesh(a));
        assert!(!scene.is_mesh(b));
        assert_eq!(scene.object_ids(), vec![a, b]);
    }

    #[test]
    fn test_group_members_recurses_children_once() {
        let mut scene = Scene::new("test");
        let a = scene.spawn_object("a", ObjectKind::Empty, Transform::default());
        let b = scene.spawn_object("b", ObjectKind::Empty, Transform::default());
        let c = scene.spawn_object("c", ObjectKind::Empty, Transform::default());
        scene.link("root", a);
        scene.link("inner", b);
        scene.link("inner", a);
        scene.link("leaf", c);
        scene.link_child("root", "inner");
        scene.link_child("inner", "leaf");
        // cycles must not loop forever
        scene.link_child("leaf", "root");

        assert_eq!(scene.group_members("root"), Some(vec![a, b, c]));
        assert_eq!(scene.group_members("leaf"), Some(vec![c, a, b]));
        assert_eq!(scene.group_members("missing"), None);
    }

    #[test]
    fn test_mass_of_partial_metadata_is_zero() {
        let partial = MassComponent {
            active: true,
            density: Some(3.0),
            volume: None,
        };
        assert_eq!(partial.mass(), 0.0);

        let inactive = MassComponent {
            active: false,
            ..MassComponent::default()
        };
        assert_eq!(inactive.mass(), 0.0);
        assert_eq!(MassComponent::default().mass(), 1.0);
    }

    #[test]
    fn test_snapshot_rounds_mass() {
        let mut scene = Scene::new("test");
        let id = scene.spawn_mesh("a", Transform::default(), Mesh::cube(1.0));
        scene.masses.insert(
            id,
            MassComponent {
                active: true,
                density: Some(1.0 / 3.0),
                volume: Some(1.0),
            },
        );

        let snapshot = scene.snapshot();
        let mass = snapshot.objects[0].mass.as_ref().unwrap();
        assert_eq!(mass.mass, 0.333);
    }
}
