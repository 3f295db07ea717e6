//! Error types for the rendering core.

use std::time::Duration;

use ash::vk;
use thiserror::Error;

/// Failures the rendering core can surface to its owner.
///
/// Surface invalidation (out-of-date / suboptimal) is deliberately absent:
/// it is recovered internally by rebuilding the swapchain and never leaves
/// the core as an error.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A native object could not be allocated.
    #[error("failed to create {what}: {result}")]
    ResourceCreationFailed { what: &'static str, result: vk::Result },

    /// A bounded wait on the GPU did not finish in time, or the device was lost.
    #[error("device hang while waiting for {what} ({timeout:?}): {result}")]
    DeviceHang {
        what: &'static str,
        timeout: Duration,
        result: vk::Result,
    },

    /// The fixed surface format/color-space pair is not offered by the surface.
    #[error("surface does not support {format:?} / {color_space:?}")]
    UnsupportedSurfaceFormat {
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
    },

    /// Recreating the swapchain and its dependents after invalidation failed.
    #[error("surface reconfiguration failed: {0}")]
    SurfaceReconfigurationFailed(#[source] Box<RenderError>),

    /// Beginning or ending command buffer recording failed.
    #[error("command recording failed at {what}: {result}")]
    CommandRecordingFailed { what: &'static str, result: vk::Result },

    /// A single frame could not be submitted or presented.
    #[error("frame {what} failed: {result}")]
    SubmitOrPresentFailed { what: &'static str, result: vk::Result },
}

impl RenderError {
    pub(crate) fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreationFailed { what, result }
    }

    pub(crate) fn recording(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::CommandRecordingFailed { what, result }
    }

    /// Whether the process must stop rendering after this error.
    ///
    /// Only per-frame submit/present failures are survivable; the slot
    /// rotation heals them on the next tick.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SubmitOrPresentFailed { .. })
    }
}

/// Result type alias using the renderer's error type.
pub type Result<T> = std::result::Result<T, RenderError>;
