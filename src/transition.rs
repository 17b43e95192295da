//! Per-frame tracking of texture layout transitions.
//!
//! Before any UI draw command is recorded, every sampled texture (except the
//! font atlas, which lives permanently in `SHADER_READ_ONLY_OPTIMAL`) is
//! transitioned to shader-read-only; after the render pass ends, each one is
//! returned to the layout it held before. The tracker deduplicates by
//! texture identity so a texture appearing in several draw batches is
//! transitioned and restored exactly once. Textures registered as already
//! shader-read-only are exempt from the bracket entirely and never appear
//! in the restore list.

use std::collections::HashSet;
use std::sync::Arc;

use ash::vk;
use imgui::TextureId;

/// One texture to restore after the render pass, with the layout it held
/// before the pre-pass forced it shader-readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreEntry {
    pub texture: TextureId,
    pub prior_layout: vk::ImageLayout,
}

/// Records which textures were forced into shader-read-only layout for the
/// current frame. Reset at the start of every frame compile.
#[derive(Default)]
pub struct LayoutTracker {
    entries: Vec<RestoreEntry>,
    seen: HashSet<usize>,
}

impl LayoutTracker {
    pub fn reset(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }

    /// Notes that `texture` is sampled this frame while in `prior_layout`.
    ///
    /// Returns `true` only on the first sighting of the texture this frame,
    /// i.e. when the caller must issue the transition to shader-read-only.
    pub fn note(&mut self, texture: TextureId, prior_layout: vk::ImageLayout) -> bool {
        if !self.seen.insert(texture.id()) {
            return false;
        }
        self.entries.push(RestoreEntry {
            texture,
            prior_layout,
        });
        true
    }

    /// The textures to restore, in first-seen order.
    pub fn entries(&self) -> &[RestoreEntry] {
        &self.entries
    }
}

/// Records an image memory barrier moving `image` between the two layouts.
///
/// Stage and access masks follow the handful of transitions this backend
/// actually performs (attachment or transfer layouts to/from sampled); any
/// other pair falls back to a full-pipeline barrier.
pub fn cmd_transition_image_layout(
    device: &Arc<ash::Device>,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, src_stage) = layout_sync_scope(old_layout, true);
    let (dst_access, dst_stage) = layout_sync_scope(new_layout, false);

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}

fn layout_sync_scope(
    layout: vk::ImageLayout,
    is_source: bool,
) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (
            vk::AccessFlags::empty(),
            if is_source {
                vk::PipelineStageFlags::TOP_OF_PIPE
            } else {
                vk::PipelineStageFlags::BOTTOM_OF_PIPE
            },
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        _ => (
            if is_source {
                vk::AccessFlags::MEMORY_WRITE
            } else {
                vk::AccessFlags::MEMORY_READ
            },
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_texture_is_recorded_once() {
        let mut tracker = LayoutTracker::default();
        tracker.reset();

        let a = TextureId::new(1);
        let b = TextureId::new(2);

        assert!(tracker.note(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert!(tracker.note(b, vk::ImageLayout::GENERAL));
        // A sampled again by a later draw list: no second transition.
        assert!(!tracker.note(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));

        assert_eq!(
            tracker.entries(),
            &[
                RestoreEntry {
                    texture: a,
                    prior_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                },
                RestoreEntry {
                    texture: b,
                    prior_layout: vk::ImageLayout::GENERAL
                },
            ]
        );
    }

    #[test]
    fn reset_forgets_previous_frame() {
        let mut tracker = LayoutTracker::default();
        let a = TextureId::new(7);

        assert!(tracker.note(a, vk::ImageLayout::GENERAL));
        tracker.reset();
        assert!(tracker.entries().is_empty());
        assert!(tracker.note(a, vk::ImageLayout::GENERAL));
    }

    #[test]
    fn restore_preserves_first_seen_layout() {
        // If the same id is noted with a different layout later in the frame
        // (it cannot change mid-frame, but be defensive), the first
        // observation wins: that is the layout to restore.
        let mut tracker = LayoutTracker::default();
        let a = TextureId::new(3);

        tracker.note(a, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        tracker.note(a, vk::ImageLayout::GENERAL);

        assert_eq!(tracker.entries().len(), 1);
        assert_eq!(
            tracker.entries()[0].prior_layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
    }
}
