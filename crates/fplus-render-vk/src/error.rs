// SPDX-License-Identifier: CEPL-1.0
use crate::frame::RenderState;
use ash::vk;
use thiserror::Error;

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

/// Coarse classification used by callers deciding whether to bail out.
/// Presentation staleness never reaches this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Initialisation or object creation failed; the renderer is unusable.
    Fatal,
    /// A programming error: a request outside the supported set.
    Unsupported,
    /// No memory type or the allocation itself failed.
    Exhaustion,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("loading the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),
    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
    #[error("required layer {0} is not available")]
    MissingLayer(String),
    #[error("required extension {0} is not available")]
    MissingExtension(String),
    #[error("no adapter exposes graphics, compute and present queues with swapchain support")]
    NoSuitableDevice,
    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },
    #[error("no memory type in {type_bits:#034b} has {properties:?}")]
    MemoryTypeNotFound {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },
    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    #[error("none of the depth formats support optimal-tiling depth attachments")]
    UnsupportedDepthFormat,
    #[error("shader {name} is not valid SPIR-V: {source}")]
    InvalidShader {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scene: {0}")]
    InvalidScene(#[from] fplus_render::AssetError),
    #[error("{len} bytes do not fit a {capacity}-byte staging buffer")]
    StagingOverflow {
        len: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },
    #[error("{requested} lights requested, capacity is {capacity}")]
    LightCapacity { requested: usize, capacity: usize },
    #[error("renderer is {0:?}")]
    NotReady(RenderState),
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::MemoryTypeNotFound { .. } => ErrorKind::Exhaustion,
            RenderError::Vulkan { result, .. }
                if matches!(
                    *result,
                    vk::Result::ERROR_OUT_OF_HOST_MEMORY
                        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                        | vk::Result::ERROR_TOO_MANY_OBJECTS
                ) =>
            {
                ErrorKind::Exhaustion
            }
            RenderError::UnsupportedTransition { .. } | RenderError::UnsupportedDepthFormat => {
                ErrorKind::Unsupported
            }
            _ => ErrorKind::Fatal,
        }
    }
}

/// Names the entry point that produced a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { op, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        let oom = Err::<(), _>(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .op("vkAllocateMemory")
            .unwrap_err();
        assert_eq!(oom.kind(), ErrorKind::Exhaustion);
        assert!(oom.to_string().starts_with("vkAllocateMemory failed"));

        let lost = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .op("vkQueueSubmit")
            .unwrap_err();
        assert_eq!(lost.kind(), ErrorKind::Fatal);

        let t = RenderError::UnsupportedTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        assert_eq!(t.kind(), ErrorKind::Unsupported);
        assert_eq!(
            RenderError::MemoryTypeNotFound {
                type_bits: 0,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL
            }
            .kind(),
            ErrorKind::Exhaustion
        );
        assert_eq!(RenderError::NoSuitableDevice.kind(), ErrorKind::Fatal);
    }
}
