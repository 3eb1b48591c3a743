//! Emitter selection.

use super::{
    generic_emitter, CopyFusionError, CopyFusionOutcome, FusionDescriptor, FusionEmitter,
    InPlaceDynamicUpdateSliceEmitter, SelectorConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error(transparent)]
    CopyFusion(#[from] CopyFusionError),
}

/// Select the emitter for a fusion with the default [`SelectorConfig`].
///
/// Returns `Ok(None)` when the fusion kind has no emitter yet, and an error
/// when the fusion was recognised as a copy but its buffers could not be
/// resolved.
pub fn select_emitter<'a>(
    descriptor: &'a dyn FusionDescriptor,
) -> Result<Option<Box<dyn FusionEmitter + 'a>>, SelectionError> {
    select_emitter_with_config(descriptor, &SelectorConfig::default())
}

pub fn select_emitter_with_config<'a>(
    descriptor: &'a dyn FusionDescriptor,
    config: &SelectorConfig,
) -> Result<Option<Box<dyn FusionEmitter + 'a>>, SelectionError> {
    let analysis = descriptor.analysis();

    // Cheapest form when it applies: only the update window is written.
    if config.enable_in_place_dus
        && analysis.is_dynamic_update_slice_fusion()
        && descriptor.can_emit_dynamic_update_slice_in_place()
    {
        log::debug!("{}: emitting dynamic-update-slice in place", analysis.name());
        return Ok(Some(Box::new(InPlaceDynamicUpdateSliceEmitter::new(
            analysis, config,
        ))));
    }

    match descriptor.try_get_copy_fusion() {
        CopyFusionOutcome::Success(emitter) => {
            log::debug!("{}: emitting as memcpy", analysis.name());
            return Ok(Some(emitter));
        }
        CopyFusionOutcome::Failure(err) => {
            log::warn!("{}: copy fusion matched but failed: {err}", analysis.name());
            return Err(err.into());
        }
        CopyFusionOutcome::NotApplicable => {}
    }

    let kind = analysis.emitter_fusion_kind();
    if !kind.has_generic_emitter() {
        log::debug!("{}: no emitter for {kind} fusions", analysis.name());
        return Ok(None);
    }
    let emitter = generic_emitter(analysis, config);
    if let Some(emitter) = &emitter {
        log::debug!("{}: emitting as {}", analysis.name(), emitter.kind());
    }
    Ok(emitter)
}
