//! Live reconfiguration commands

use super::camera_pipeline::CameraPipeline;
use crate::error::{Error, Result};
use crate::shared_state::ConfigCommand;
use crate::state::PipelineSettings;
use crate::zone_counter::ZoneDefinition;

/// Cameras a command applies to. `None` target = every camera.
fn targets<'a>(
    cameras: &'a mut [CameraPipeline],
    target: Option<&str>,
) -> Result<Vec<&'a mut CameraPipeline>> {
    let selected: Vec<&mut CameraPipeline> = cameras
        .iter_mut()
        .filter(|c| target.map(|t| c.matches_target(t)).unwrap_or(true))
        .collect();
    match (target, selected.is_empty()) {
        (Some(t), true) => Err(Error::Validation(format!("unknown target camera: {}", t))),
        _ => Ok(selected),
    }
}

fn validate_zones(zones: &[ZoneDefinition]) -> Result<()> {
    for zone in zones {
        if zone.id.trim().is_empty() {
            return Err(Error::Validation("zone id must not be empty".to_string()));
        }
    }
    Ok(())
}

fn persist(camera: &CameraPipeline) {
    if let Err(e) = camera.persist_zones() {
        tracing::error!(camera_id = %camera.camera_id(), error = %e, "Failed to persist zones");
    }
}

/// Apply one command to the camera set
pub fn apply_command(
    cameras: &mut [CameraPipeline],
    command: ConfigCommand,
    settings: &PipelineSettings,
) -> Result<()> {
    match command {
        ConfigCommand::SaveZones => {
            for camera in cameras.iter() {
                persist(camera);
            }
        }
        ConfigCommand::ClearZones { target_camera } => {
            for camera in targets(cameras, target_camera.as_deref())? {
                camera.clear_zones();
                persist(camera);
                tracing::info!(camera_id = %camera.camera_id(), "Zones cleared");
            }
        }
        ConfigCommand::UpdateZones {
            target_camera,
            zones,
        } => {
            validate_zones(&zones)?;
            for camera in targets(cameras, target_camera.as_deref())? {
                camera.replace_zones(zones.clone(), settings);
                persist(camera);
                tracing::info!(
                    camera_id = %camera.camera_id(),
                    zones = zones.len(),
                    "Zones updated"
                );
            }
        }
    }
    Ok(())
}

/// Apply commands in arrival order; a rejected command is skipped
pub fn apply_commands(
    cameras: &mut [CameraPipeline],
    commands: Vec<ConfigCommand>,
    settings: &PipelineSettings,
) -> usize {
    let mut applied = 0;
    for command in commands {
        let action = command.action();
        match apply_command(cameras, command, settings) {
            Ok(()) => applied += 1,
            Err(e) => {
                tracing::warn!(action = action, error = %e, "Skipping command");
            }
        }
    }
    applied
}
