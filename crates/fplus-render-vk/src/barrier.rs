// SPDX-License-Identifier: CEPL-1.0
//! Image layout transitions and queue-family ownership hand-offs.

use crate::error::{RenderError, Result};
use ash::vk;

/// Access and pipeline-stage scopes of one supported layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The fixed set of transitions the renderer performs. Anything else is a
/// programming error.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let depth_rw = A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let shader_readers = S::FRAGMENT_SHADER | S::COMPUTE_SHADER;

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::PREINITIALIZED, L::TRANSFER_SRC_OPTIMAL) => {
            (A::HOST_WRITE, A::TRANSFER_READ, S::HOST, S::TRANSFER)
        }
        (L::PREINITIALIZED, L::TRANSFER_DST_OPTIMAL) => {
            (A::HOST_WRITE, A::TRANSFER_WRITE, S::HOST, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, shader_readers)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            depth_rw,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            depth_rw,
            A::SHADER_READ,
            S::LATE_FRAGMENT_TESTS,
            shader_readers,
        ),
        (L::SHADER_READ_ONLY_OPTIMAL, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::SHADER_READ,
            depth_rw,
            shader_readers,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::empty(), A::SHADER_READ, S::TOP_OF_PIPE, shader_readers)
        }
        _ => return Err(RenderError::UnsupportedTransition { old, new }),
    };
    Ok(TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// DEPTH (plus STENCIL when the format has one) if either side is the depth
/// attachment layout, COLOR otherwise.
pub fn aspect_for(format: vk::Format, old: vk::ImageLayout, new: vk::ImageLayout) -> vk::ImageAspectFlags {
    let depth = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
    if old == depth || new == depth {
        if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Whole-image subresource range, single mip and layer.
pub fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub fn layout_barrier(
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<(vk::ImageMemoryBarrier<'static>, TransitionMasks)> {
    let masks = transition_masks(old, new)?;
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: masks.src_access,
        dst_access_mask: masks.dst_access,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: full_range(aspect_for(format, old, new)),
        ..Default::default()
    };
    Ok((barrier, masks))
}

pub fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let (barrier, masks) = layout_barrier(image, format, old, new)?;
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        )
    };
    Ok(())
}

// ---- ownership hand-offs --------------------------------------------------

/// Buffers that move between the graphics and compute queues every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SharedBuffer {
    Lights,
    Visibility,
}

impl SharedBuffer {
    pub const ALL: [SharedBuffer; 2] = [SharedBuffer::Lights, SharedBuffer::Visibility];

    /// Graphics-queue accesses that must be available before compute takes
    /// the buffer. The light list is refilled by a transfer copy every frame.
    pub fn graphics_access(self) -> (vk::AccessFlags, vk::PipelineStageFlags) {
        use vk::AccessFlags as A;
        use vk::PipelineStageFlags as S;
        match self {
            SharedBuffer::Lights => (A::SHADER_READ | A::TRANSFER_WRITE, S::FRAGMENT_SHADER | S::TRANSFER),
            SharedBuffer::Visibility => (A::SHADER_READ, S::FRAGMENT_SHADER),
        }
    }
}

/// Which command buffer a barrier is recorded into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffSite {
    /// Tail of the depth pre-pass buffer (graphics queue).
    DepthTail,
    /// Before the culling dispatch (compute queue).
    CullingHead,
    /// After the culling dispatch (compute queue).
    CullingTail,
    /// Before the forward render pass (graphics queue).
    ForwardHead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffKind {
    Release,
    Acquire,
    /// Same family on both sides: a plain memory dependency.
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handoff {
    pub buffer: SharedBuffer,
    pub site: HandoffSite,
    pub kind: HandoffKind,
    pub src_family: u32,
    pub dst_family: u32,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Per-frame barrier schedule for the light and visibility buffers.
///
/// With distinct families each buffer travels graphics -> compute -> graphics
/// and every transfer is a matched release/acquire pair on the two queues.
/// With a shared family only the compute-side memory dependencies remain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffPlan {
    pub graphics: u32,
    pub compute: u32,
    pub handoffs: Vec<Handoff>,
}

impl HandoffPlan {
    pub fn new(graphics: u32, compute: u32) -> Self {
        use vk::AccessFlags as A;
        use vk::PipelineStageFlags as S;

        let split = graphics != compute;
        let (g, c) = if split {
            (graphics, compute)
        } else {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        };
        let transfer = if split { HandoffKind::Release } else { HandoffKind::Memory };
        let receive = if split { HandoffKind::Acquire } else { HandoffKind::Memory };

        let mut handoffs = Vec::with_capacity(8);
        for buffer in SharedBuffer::ALL {
            let (graphics_access, graphics_stage) = buffer.graphics_access();
            if split {
                handoffs.push(Handoff {
                    buffer,
                    site: HandoffSite::DepthTail,
                    kind: HandoffKind::Release,
                    src_family: g,
                    dst_family: c,
                    src_access: graphics_access,
                    dst_access: A::empty(),
                    src_stage: graphics_stage,
                    dst_stage: S::BOTTOM_OF_PIPE,
                });
            }
            handoffs.push(Handoff {
                buffer,
                site: HandoffSite::CullingHead,
                kind: receive,
                src_family: g,
                dst_family: c,
                src_access: graphics_access,
                dst_access: A::SHADER_WRITE,
                src_stage: if split { S::TOP_OF_PIPE } else { graphics_stage },
                dst_stage: S::COMPUTE_SHADER,
            });
            handoffs.push(Handoff {
                buffer,
                site: HandoffSite::CullingTail,
                kind: transfer,
                src_family: c,
                dst_family: g,
                src_access: A::SHADER_WRITE,
                dst_access: if split { A::empty() } else { A::SHADER_READ },
                src_stage: S::COMPUTE_SHADER,
                dst_stage: if split { S::BOTTOM_OF_PIPE } else { S::FRAGMENT_SHADER },
            });
            if split {
                handoffs.push(Handoff {
                    buffer,
                    site: HandoffSite::ForwardHead,
                    kind: HandoffKind::Acquire,
                    src_family: c,
                    dst_family: g,
                    src_access: A::empty(),
                    dst_access: A::SHADER_READ,
                    src_stage: S::TOP_OF_PIPE,
                    dst_stage: S::FRAGMENT_SHADER,
                });
            }
        }
        Self {
            graphics,
            compute,
            handoffs,
        }
    }

    pub fn is_split(&self) -> bool {
        self.graphics != self.compute
    }

    pub fn at(&self, site: HandoffSite) -> impl Iterator<Item = &Handoff> + '_ {
        self.handoffs.iter().filter(move |h| h.site == site)
    }

    /// Records every barrier scheduled at `site`. `resolve` maps a logical
    /// buffer to its current handle. Barriers at one site share a stage pair.
    pub fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        site: HandoffSite,
        resolve: impl Fn(SharedBuffer) -> vk::Buffer,
    ) {
        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let barriers: Vec<vk::BufferMemoryBarrier<'static>> = self
            .at(site)
            .map(|h| {
                src_stage |= h.src_stage;
                dst_stage |= h.dst_stage;
                vk::BufferMemoryBarrier {
                    s_type: vk::StructureType::BUFFER_MEMORY_BARRIER,
                    src_access_mask: h.src_access,
                    dst_access_mask: h.dst_access,
                    src_queue_family_index: h.src_family,
                    dst_queue_family_index: h.dst_family,
                    buffer: resolve(h.buffer),
                    offset: 0,
                    size: vk::WHOLE_SIZE,
                    ..Default::default()
                }
            })
            .collect();
        if barriers.is_empty() {
            return;
        }
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &barriers,
                &[],
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::ImageLayout as L;

    #[test]
    fn supported_transitions_have_the_documented_masks() {
        let m = transition_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(m.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(m.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(m.src_stage, vk::PipelineStageFlags::TRANSFER);

        let m = transition_masks(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert!(m.src_access.is_empty());
        assert_eq!(
            m.dst_access,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );

        let m = transition_masks(L::PREINITIALIZED, L::TRANSFER_SRC_OPTIMAL).unwrap();
        assert_eq!(m.src_access, vk::AccessFlags::HOST_WRITE);
        assert_eq!(m.dst_access, vk::AccessFlags::TRANSFER_READ);
    }

    #[test]
    fn depth_round_trip_is_supported_both_ways() {
        let there = transition_masks(L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        let back = transition_masks(L::SHADER_READ_ONLY_OPTIMAL, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(there.src_access, back.dst_access);
        assert_eq!(there.dst_access, back.src_access);
    }

    #[test]
    fn unlisted_pairs_are_rejected() {
        for (old, new) in [
            (L::UNDEFINED, L::PRESENT_SRC_KHR),
            (L::GENERAL, L::SHADER_READ_ONLY_OPTIMAL),
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
        ] {
            let err = transition_masks(old, new).unwrap_err();
            assert!(matches!(err, RenderError::UnsupportedTransition { .. }));
            assert_eq!(err.kind(), crate::ErrorKind::Unsupported);
        }
    }

    #[test]
    fn aspect_follows_layouts_and_format() {
        assert_eq!(
            aspect_for(vk::Format::D32_SFLOAT, L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for(vk::Format::D24_UNORM_S8_UINT, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for(vk::Format::R8G8B8A8_UNORM, L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            vk::ImageAspectFlags::COLOR
        );
    }

    fn find(plan: &HandoffPlan, buffer: SharedBuffer, site: HandoffSite) -> Option<Handoff> {
        plan.handoffs
            .iter()
            .copied()
            .find(|h| h.buffer == buffer && h.site == site)
    }

    #[test]
    fn split_families_pair_every_release_with_an_acquire() {
        let plan = HandoffPlan::new(0, 1);
        assert!(plan.is_split());
        for buffer in SharedBuffer::ALL {
            for (release, acquire) in [
                (HandoffSite::DepthTail, HandoffSite::CullingHead),
                (HandoffSite::CullingTail, HandoffSite::ForwardHead),
            ] {
                let r = find(&plan, buffer, release).unwrap();
                let a = find(&plan, buffer, acquire).unwrap();
                assert_eq!(r.kind, HandoffKind::Release);
                assert_eq!(a.kind, HandoffKind::Acquire);
                assert_eq!((r.src_family, r.dst_family), (a.src_family, a.dst_family));
                assert_ne!(r.src_family, r.dst_family);
            }
        }
        let releases = plan.handoffs.iter().filter(|h| h.kind == HandoffKind::Release).count();
        let acquires = plan.handoffs.iter().filter(|h| h.kind == HandoffKind::Acquire).count();
        assert_eq!(releases, acquires);
        assert_eq!(plan.handoffs.len(), 8);
    }

    #[test]
    fn compute_side_accesses_bracket_the_dispatch() {
        let plan = HandoffPlan::new(0, 1);
        let head = find(&plan, SharedBuffer::Visibility, HandoffSite::CullingHead).unwrap();
        let tail = find(&plan, SharedBuffer::Visibility, HandoffSite::CullingTail).unwrap();
        assert_eq!(head.dst_access, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(head.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(tail.src_access, vk::AccessFlags::SHADER_WRITE);
        assert_eq!((head.src_family, head.dst_family), (0, 1));
        assert_eq!((tail.src_family, tail.dst_family), (1, 0));
    }

    #[test]
    fn light_uploads_are_flushed_before_compute_reads() {
        let write = vk::AccessFlags::TRANSFER_WRITE;
        let transfer = vk::PipelineStageFlags::TRANSFER;

        let split = HandoffPlan::new(0, 1);
        let release = find(&split, SharedBuffer::Lights, HandoffSite::DepthTail).unwrap();
        assert!(release.src_access.contains(write));
        assert!(release.src_stage.contains(transfer));
        let vis = find(&split, SharedBuffer::Visibility, HandoffSite::DepthTail).unwrap();
        assert!(!vis.src_access.contains(write));

        let shared = HandoffPlan::new(3, 3);
        let head = find(&shared, SharedBuffer::Lights, HandoffSite::CullingHead).unwrap();
        assert!(head.src_access.contains(write));
        assert!(head.src_stage.contains(transfer));
    }

    #[test]
    fn shared_family_degrades_to_memory_barriers() {
        let plan = HandoffPlan::new(2, 2);
        assert!(!plan.is_split());
        assert_eq!(plan.at(HandoffSite::DepthTail).count(), 0);
        assert_eq!(plan.at(HandoffSite::ForwardHead).count(), 0);
        assert_eq!(plan.at(HandoffSite::CullingHead).count(), 2);
        for h in &plan.handoffs {
            assert_eq!(h.kind, HandoffKind::Memory);
            assert_eq!(h.src_family, vk::QUEUE_FAMILY_IGNORED);
            assert_eq!(h.dst_family, vk::QUEUE_FAMILY_IGNORED);
        }
        let tail = find(&plan, SharedBuffer::Lights, HandoffSite::CullingTail).unwrap();
        assert_eq!(tail.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(tail.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }
}
