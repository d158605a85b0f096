use log::{debug, info};

use crate::{
    error::RealizationError,
    host::{RenderEngine, SceneHost},
    vtree::VTree,
};

/// Link every realized entity into the active scene.
///
/// Entities already in the scene are skipped, so running this twice leaves the
/// scene as one run does. Returns how many entities were newly linked.
pub fn link_everything_into_scene<H: SceneHost + ?Sized>(
    tree: &VTree,
    host: &mut H,
) -> Result<usize, RealizationError> {
    let mut linked = 0;
    for id in tree.depth_first() {
        let node = &tree[id];
        let Some(entity) = node.entity else {
            continue;
        };
        if host.scene_contains(entity) {
            continue;
        }
        host.link_to_scene(entity)
            .map_err(|source| RealizationError::SceneLink {
                vnode: node.name.clone(),
                source,
            })?;
        linked += 1;
    }

    // Imported materials only display with a node-based engine.
    if host.render_engine() == RenderEngine::Legacy {
        debug!("switching render engine from legacy to path traced");
        host.set_render_engine(RenderEngine::PathTraced)
            .map_err(RealizationError::RenderEngine)?;
    }

    info!("linked {linked} entities into the scene");
    Ok(linked)
}
