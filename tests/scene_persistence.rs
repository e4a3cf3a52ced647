use std::path::PathBuf;

use center_of_mass::{
    engine,
    mesh::Mesh,
    scene::DisplayStyle,
    scene_file::{SceneFile, SceneLoader},
};
use nalgebra::Vector3;
use tempfile::tempdir;

fn fixture() -> SceneFile {
    SceneLoader::new(env!("CARGO_MANIFEST_DIR"))
        .load(PathBuf::from("scenes/two_bodies.yaml"))
        .expect("fixture parses")
}

#[test]
fn mass_edits_survive_save_and_reload() {
    let temp = tempdir().expect("tempdir");
    let loader = SceneLoader::new(temp.path());
    let file = fixture();
    let mut scene = file.build_scene();

    let ground = scene.find("Ground").unwrap();
    let b = scene.find("B").unwrap();
    assert_eq!(scene.add_mass_properties(&[ground]), 1);
    scene.recalculate_volume(&[ground], Mesh::volume);
    scene.toggle_active(&[b]);

    loader
        .save("edited.yaml", &SceneFile::capture(&scene, &file.settings))
        .unwrap();
    let reloaded = loader.load("edited.yaml").unwrap().build_scene();

    let ground = reloaded.find("Ground").unwrap();
    let volume = reloaded.mass(ground).unwrap().volume.unwrap();
    assert!((volume - 160.0).abs() < 1e-9);
    let b = reloaded.find("B").unwrap();
    assert!(!reloaded.mass(b).unwrap().active);
    assert_eq!(reloaded.display(b), Some(DisplayStyle::Wire));
}

#[test]
fn removed_metadata_is_not_written_back() {
    let temp = tempdir().unwrap();
    let loader = SceneLoader::new(temp.path());
    let file = fixture();
    let mut scene = file.build_scene();
    let a = scene.find("A").unwrap();
    scene.remove_mass_properties(&[a]);

    loader
        .save("removed.yaml", &SceneFile::capture(&scene, &file.settings))
        .unwrap();
    let text = std::fs::read_to_string(temp.path().join("removed.yaml")).unwrap();
    let reloaded = SceneFile::from_yaml(&text).unwrap();
    let a_spec = reloaded.objects.iter().find(|o| o.name == "A").unwrap();
    assert!(a_spec.mass.is_none());
}

#[test]
fn updated_marker_position_is_persisted() {
    let temp = tempdir().unwrap();
    let loader = SceneLoader::new(temp.path());
    let file = fixture();
    let mut scene = file.build_scene();
    engine::recompute(&mut scene, &file.settings).unwrap();

    loader
        .save("moved.yaml", &SceneFile::capture(&scene, &file.settings))
        .unwrap();
    let reloaded = loader.load("moved.yaml").unwrap();
    let marker = reloaded.build_scene();
    let id = marker.find("CenterOfMass").unwrap();
    let position = marker.position(id).unwrap();
    assert!((position - Vector3::new(10.0 / 3.0, 0.0, 0.0)).norm() < 1e-9);
    assert_eq!(reloaded.settings, file.settings);
}

#[test]
fn loader_reports_missing_file() {
    let temp = tempdir().unwrap();
    let err = SceneLoader::new(temp.path()).load("absent.yaml").unwrap_err();
    assert!(err.to_string().contains("absent.yaml"));
}
