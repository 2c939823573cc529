use crate::{
    city_model::InstancedCityModel,
    context::Context,
    data_structures::{
        granularity::{ConvertGranularity, MeshGranularity},
        model::Model,
        scene_graph::ComponentId,
    },
    flow::{MainThread, Phase, Progress},
    pipelines::{ModelReconstruct, Strategy},
    resources::export::ComponentSnapshot,
};

/**
 * One reconstruction pass: convert the visible `targets`, destroy or hide them, place the result.
 *
 * Hidden targets are neither exported nor replaced. `adjust` runs on the exported model after
 * classification and before conversion.
 */
pub fn reconstruct_task(
    main: &MainThread<InstancedCityModel>,
    ctx: &Context,
    reconstruct: &ModelReconstruct,
    mut targets: Vec<ComponentSnapshot>,
    destroy_original: bool,
    progress: &Progress,
    adjust: impl FnOnce(&mut Model),
) -> anyhow::Result<Vec<ComponentId>> {
    targets.retain(|t| t.visible);
    if targets.is_empty() {
        log::debug!("nothing to reconstruct at {:?}", reconstruct.convert_granularity());
        return Ok(Vec::new());
    }

    progress.enter(Phase::Converting);
    let (model, city_model) = reconstruct.convert_model_for_reconstruct(&targets, adjust);
    if progress.is_canceled() {
        log::info!("reconstruction canceled before replacing {} components", targets.len());
        return Ok(Vec::new());
    }

    progress.enter(Phase::Destroying);
    let replaced: Vec<ComponentId> = targets.iter().map(|t| t.id).collect();
    main.run(move |city| city.destroy_or_hide_components(&replaced, destroy_original))?;

    progress.enter(Phase::Rebuilding);
    reconstruct.reconstruct_from_converted_model(main, ctx, &model, city_model, progress)
}

/**
 * Reconstructs or classifies `targets` at `granularity`.
 *
 * [`MeshGranularity::DoNotChange`] keeps each target's granularity: targets are partitioned by
 * their current granularity and every non-empty partition gets its own pass.
 */
pub fn run_passes(
    main: &MainThread<InstancedCityModel>,
    ctx: &Context,
    strategy: Strategy,
    targets: Vec<ComponentId>,
    granularity: MeshGranularity,
    destroy_original: bool,
    progress: &Progress,
) -> anyhow::Result<Vec<ComponentId>> {
    progress.enter(Phase::Selecting);
    let snapshots = main
        .run(move |city| ModelReconstruct::get_domain_objects_from_components(city, &targets))?;
    log::info!("{} components selected for {:?}", snapshots.len(), granularity);

    if let Some(granularity) = granularity.to_convert_granularity() {
        let reconstruct = ModelReconstruct::new(strategy, granularity);
        return reconstruct_task(
            main,
            ctx,
            &reconstruct,
            snapshots,
            destroy_original,
            progress,
            |_| {},
        );
    }

    let mut reconstruct = ModelReconstruct::new(strategy, ConvertGranularity::default());
    let mut created = Vec::new();
    for granularity in ConvertGranularity::ALL {
        if progress.is_canceled() {
            break;
        }
        let subset = ModelReconstruct::filter_by_granularity(&snapshots, granularity);
        if subset.is_empty() {
            continue;
        }
        reconstruct.set_convert_granularity(granularity);
        created.extend(reconstruct_task(
            main,
            ctx,
            &reconstruct,
            subset,
            destroy_original,
            progress,
            |_| {},
        )?);
    }
    Ok(created)
}
