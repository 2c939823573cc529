use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use city_ngin::{
    CityModelEvent, CityModelHandle, Context, InstancedCityModel,
    data_structures::{
        city_object::CityObjectType,
        granularity::{ConvertGranularity, MeshGranularity},
        material::Material,
        scene_graph::ComponentId,
    },
    flow::{self, Progress},
    pipelines::{ModelReconstruct, Strategy, reconstruct::reconstruct_task},
};
use tokio::sync::broadcast::error::TryRecvError;

use crate::common::test_utils::{
    BLDG_GML, ROAD_GML, building_model, components_of, dataset, import, is_visible, road_model,
    shutdown, spawn_city,
};

mod common;

#[tokio::test(flavor = "multi_thread")]
async fn empty_reconstruct_notifies_once() {
    let (handle, thread) = spawn_city(Context::new(Arc::new(dataset())));
    let mut events = handle.subscribe();

    let created = handle
        .reconstruct_model(Vec::new(), MeshGranularity::PerPrimaryFeatureObject, true)
        .join()
        .await
        .unwrap();

    assert!(created.is_empty());
    assert_eq!(events.recv().await.unwrap(), CityModelEvent::ReconstructFinished);
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    shutdown(handle, thread).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn import_hides_lower_lods() {
    let (handle, thread) = spawn_city(Context::new(Arc::new(dataset())));
    import(&handle, BLDG_GML, building_model()).await;

    let bldg_a = components_of(&handle, "bldg-a").await;
    assert_eq!(bldg_a.len(), 2);
    // LOD1 first, LOD2 second.
    assert!(!is_visible(&handle, bldg_a[0]).await);
    assert!(is_visible(&handle, bldg_a[1]).await);
    let bldg_b = components_of(&handle, "bldg-b").await;
    assert!(is_visible(&handle, bldg_b[0]).await);

    let has_attribute_info = handle
        .main_thread()
        .run_async(|city| city.has_attribute_info())
        .await
        .unwrap();
    assert!(has_attribute_info);
    shutdown(handle, thread).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reconstruct_to_atomic_splits_surfaces() {
    let (handle, thread) = spawn_city(Context::new(Arc::new(dataset())));
    let gml = import(&handle, BLDG_GML, building_model()).await;
    let mut events = handle.subscribe();

    let created = handle
        .reconstruct_model(vec![gml], MeshGranularity::PerAtomicFeatureObject, true)
        .join()
        .await
        .unwrap();
    assert_eq!(created.len(), 4);
    assert_eq!(events.recv().await.unwrap(), CityModelEvent::ReconstructFinished);
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));

    let walls = components_of(&handle, "wall-a").await;
    let roofs = components_of(&handle, "roof-a").await;
    assert_eq!((walls.len(), roofs.len()), (1, 1));

    let wall = walls[0];
    let (outside_parent, granularity, parent_root) = handle
        .main_thread()
        .run_async(move |city| {
            let data = city.scene.get(wall).unwrap().city_object_group().unwrap().clone();
            let parent = city.scene.parent(wall).unwrap();
            let parent_root = city
                .scene
                .get(parent)
                .and_then(|c| c.city_object_group())
                .map(|d| d.root_city_objects()[0].gml_id.clone());
            (data.outside_parent, data.granularity, parent_root)
        })
        .await
        .unwrap();
    assert_eq!(outside_parent.as_deref(), Some("bldg-a"));
    assert_eq!(granularity, ConvertGranularity::PerAtomicFeatureObject);
    assert_eq!(parent_root.as_deref(), Some("bldg-a"));

    // The hidden LOD1 building was not a visible target and survives untouched.
    let bldg_a = components_of(&handle, "bldg-a").await;
    assert_eq!(bldg_a.len(), 2);
    assert!(!is_visible(&handle, bldg_a[0]).await);
    shutdown(handle, thread).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn do_not_change_keeps_each_granularity() {
    let (handle, thread) = spawn_city(Context::new(Arc::new(dataset())));
    let bldg = import(&handle, BLDG_GML, building_model()).await;
    let road = handle
        .load_model(ROAD_GML, road_model(), ConvertGranularity::PerAtomicFeatureObject)
        .join()
        .await
        .unwrap()[0];

    handle
        .reconstruct_model(vec![bldg, road], MeshGranularity::DoNotChange, false)
        .join()
        .await
        .unwrap();

    for (gml_id, expected) in [
        ("road-1", ConvertGranularity::PerAtomicFeatureObject),
        ("bldg-b", ConvertGranularity::PerPrimaryFeatureObject),
    ] {
        let components = components_of(&handle, gml_id).await;
        assert_eq!(components.len(), 2, "{gml_id}: original kept hidden next to the new one");
        assert!(!is_visible(&handle, components[0]).await);
        let new = components[1];
        let granularity = handle
            .main_thread()
            .run_async(move |city| {
                city.scene.get(new).unwrap().city_object_group().unwrap().granularity
            })
            .await
            .unwrap();
        assert_eq!(granularity, expected);
    }
    shutdown(handle, thread).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_during_conversion_keeps_originals() {
    let (handle, thread) = spawn_city(Context::new(Arc::new(dataset())));
    let gml = import(&handle, BLDG_GML, building_model()).await;
    let bldg_b = components_of(&handle, "bldg-b").await;
    let count = |city: &mut InstancedCityModel| city.scene.components().count();
    let before = handle.main_thread().run_async(count).await.unwrap();

    let main = handle.main_thread().clone();
    let ctx = handle.context().clone();
    let (created, phase) = tokio::task::spawn_blocking(move || {
        let progress = Progress::default();
        let targets = main
            .run(move |city| ModelReconstruct::get_domain_objects_from_components(city, &[gml]))
            .unwrap();
        let reconstruct = ModelReconstruct::new(
            Strategy::Reconstruct,
            ConvertGranularity::PerPrimaryFeatureObject,
        );
        let created = reconstruct_task(&main, &ctx, &reconstruct, targets, true, &progress, |_| {
            progress.cancel()
        });
        (created, progress.phase())
    })
    .await
    .unwrap();

    assert!(created.unwrap().is_empty());
    assert_eq!(phase, city_ngin::Phase::Converting);
    assert_eq!(handle.main_thread().run_async(count).await.unwrap(), before);
    assert_eq!(components_of(&handle, "bldg-b").await, bldg_b);
    assert!(is_visible(&handle, bldg_b[0]).await);
    shutdown(handle, thread).await;
}

fn features_named(city: &InstancedCityModel, gml_id: &str) -> Vec<ComponentId> {
    city.scene
        .components()
        .filter(|id| {
            city.scene
                .get(*id)
                .and_then(|c| c.city_object_group())
                .is_some_and(|d| matches!(d.root_city_objects(), [only] if only.gml_id == gml_id))
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn originals_are_gone_before_rebuilt_components_appear() {
    let (main, mut mutation_loop) = flow::channel::<InstancedCityModel>();
    let handle = CityModelHandle::new(
        main,
        Context::new(Arc::new(dataset())),
        tokio::runtime::Handle::current(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    // Host frame loop: pump queued mutations and record the live `bldg-b` components in between.
    let host = {
        let stop = stop.clone();
        thread::spawn(move || {
            let mut city = InstancedCityModel::new("PLATEAU_City", "tokyo");
            let mut frames: Vec<Vec<ComponentId>> = Vec::new();
            while !stop.load(Ordering::SeqCst) {
                if mutation_loop.pump(&mut city) > 0 {
                    frames.push(features_named(&city, "bldg-b"));
                }
                thread::yield_now();
            }
            frames
        })
    };

    let gml = import(&handle, BLDG_GML, building_model()).await;
    let originals = components_of(&handle, "bldg-b").await;
    assert_eq!(originals.len(), 1);
    handle
        .reconstruct_model(vec![gml], MeshGranularity::PerPrimaryFeatureObject, true)
        .join()
        .await
        .unwrap();
    stop.store(true, Ordering::SeqCst);
    let frames = tokio::task::spawn_blocking(move || host.join().unwrap())
        .await
        .unwrap();

    let rebuilt = |frame: &Vec<ComponentId>| frame.iter().any(|id| !originals.contains(id));
    let original = |frame: &Vec<ComponentId>| frame.iter().any(|id| originals.contains(id));
    assert!(frames.iter().all(|frame| !(original(frame) && rebuilt(frame))));
    let last = frames.last().unwrap();
    assert!(rebuilt(last));
    assert!(!original(last));
}

async fn visible_materials(
    handle: &city_ngin::CityModelHandle,
    gml_id: &str,
) -> Vec<Vec<Material>> {
    let mut all = Vec::new();
    for id in components_of(handle, gml_id).await {
        if !is_visible(handle, id).await {
            continue;
        }
        let materials = handle
            .main_thread()
            .run_async(move |city| {
                city.scene
                    .static_mesh_of(id)
                    .map(|m| m.materials.clone())
                    .unwrap_or_default()
            })
            .await
            .unwrap();
        all.push(materials);
    }
    all
}

#[tokio::test(flavor = "multi_thread")]
async fn classify_by_type_assigns_roof_material() {
    let (handle, thread) = spawn_city(Context::new(Arc::new(dataset())));
    let gml = import(&handle, BLDG_GML, building_model()).await;
    let mut events = handle.subscribe();

    let roof = Material::asset("/Game/Materials/Roof");
    let materials = HashMap::from([(CityObjectType::ROOF_SURFACE, roof)]);
    handle
        .classify_by_type(vec![gml], materials, MeshGranularity::DoNotChange, true)
        .join()
        .await
        .unwrap();
    assert_eq!(events.recv().await.unwrap(), CityModelEvent::ClassifyFinished);

    let bldg_a = visible_materials(&handle, "bldg-a").await;
    assert_eq!(bldg_a.len(), 1);
    let names: Vec<&str> = bldg_a[0].iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["wall", "Roof"]);
    assert!(bldg_a[0][0].is_default());

    let bldg_b = visible_materials(&handle, "bldg-b").await;
    assert!(bldg_b[0].iter().all(Material::is_default));
    shutdown(handle, thread).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn classify_by_attribute_falls_back_to_primary() {
    let (handle, thread) = spawn_city(Context::new(Arc::new(dataset())));
    let gml = import(&handle, BLDG_GML, building_model()).await;

    let office = Material::asset("/Game/Materials/Office");
    let materials = HashMap::from([("office".to_string(), office)]);
    handle
        .classify_by_attribute(
            vec![gml],
            "usage",
            materials,
            MeshGranularity::PerPrimaryFeatureObject,
            true,
        )
        .join()
        .await
        .unwrap();

    let bldg_a = visible_materials(&handle, "bldg-a").await;
    assert_eq!(bldg_a.len(), 1);
    assert!(bldg_a[0].iter().all(|m| m.name == "Office"));
    let bldg_b = visible_materials(&handle, "bldg-b").await;
    assert!(bldg_b[0].iter().all(Material::is_default));
    shutdown(handle, thread).await;
}
