//! Texture binding cache: a round-robin arena of rebindable descriptor sets.
//!
//! Descriptor set allocation is expensive relative to rewriting the bindings
//! of an existing set, and the number of texture switches per UI frame is
//! stable, so the arena keeps every set it ever allocated and hands them out
//! cursor-style, rewriting the bindings on each acquisition. The pool grows
//! to the high-water mark of texture switches seen in any frame and never
//! shrinks. This is deliberately not keyed by texture identity: the same
//! texture used twice in one frame consumes two slots.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::error::BackendError;

/// Sets allocated per `vk::DescriptorPool`; a new pool is chained on when the
/// current one is exhausted.
const SETS_PER_POOL: u32 = 64;

/// Pure cursor bookkeeping for the arena, separated from the Vulkan objects
/// so the growth policy is testable without a device.
#[derive(Debug, Default)]
pub(crate) struct SlotCursor {
    len: usize,
    cursor: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SlotAcquire {
    /// Reuse the slot at this index.
    Reuse(usize),
    /// The pool must grow by one slot (at index `len`) before use.
    Grow(usize),
}

impl SlotCursor {
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn next(&mut self) -> SlotAcquire {
        let index = self.cursor;
        self.cursor += 1;
        if index == self.len {
            self.len += 1;
            SlotAcquire::Grow(index)
        } else {
            SlotAcquire::Reuse(index)
        }
    }
}

/// Growable arena of descriptor sets, each holding the frame transform
/// uniform (binding 0, vertex stage) and one sampled texture (binding 1,
/// fragment stage).
pub struct DescriptorArena {
    device: Arc<ash::Device>,
    set_layout: vk::DescriptorSetLayout,
    pools: Vec<vk::DescriptorPool>,
    sets: Vec<vk::DescriptorSet>,
    cursor: SlotCursor,
}

impl DescriptorArena {
    pub fn new(device: Arc<ash::Device>, set_layout: vk::DescriptorSetLayout) -> Self {
        Self {
            device,
            set_layout,
            pools: Vec::new(),
            sets: Vec::new(),
            cursor: SlotCursor::default(),
        }
    }

    /// Must be called once at the start of every frame compile.
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    /// Number of slots ever allocated (the high-water mark).
    pub fn pool_size(&self) -> usize {
        self.cursor.len()
    }

    /// Takes the next slot, rewrites both of its bindings, and returns it.
    ///
    /// The uniform binding is rewritten on every acquisition even though the
    /// uniform buffer rarely changes; this keeps the set valid after any
    /// reallocation of the buffer it points at.
    pub fn acquire(
        &mut self,
        uniform_buffer: vk::Buffer,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<vk::DescriptorSet, BackendError> {
        let set = match self.cursor.next() {
            SlotAcquire::Reuse(index) => self.sets[index],
            SlotAcquire::Grow(_) => {
                let set = self.allocate_set()?;
                self.sets.push(set);
                set
            }
        };

        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(uniform_buffer)
            .offset(0)
            .range(vk::WHOLE_SIZE)
            .build();
        let image_info = vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(image_view)
            .sampler(sampler)
            .build();

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(&buffer_info))
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(&image_info))
                .build(),
        ];
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        Ok(set)
    }

    fn allocate_set(&mut self) -> Result<vk::DescriptorSet, BackendError> {
        let pool = match self.pools.last().copied() {
            Some(pool) if self.sets.len() as u32 % SETS_PER_POOL != 0 => pool,
            _ => self.push_pool()?,
        };

        let layouts = [self.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(BackendError::from)?;
        Ok(sets[0])
    }

    fn push_pool(&mut self) -> Result<vk::DescriptorPool, BackendError> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: SETS_PER_POOL,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: SETS_PER_POOL,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(SETS_PER_POOL);

        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }
            .map_err(BackendError::from)?;
        self.pools.push(pool);
        debug!(pools = self.pools.len(), "grew descriptor pool chain");
        Ok(pool)
    }
}

impl Drop for DescriptorArena {
    fn drop(&mut self) {
        // Sets are freed with their pools.
        for pool in self.pools.drain(..) {
            unsafe { self.device.destroy_descriptor_pool(pool, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_grows_to_frame_demand() {
        let mut cursor = SlotCursor::default();
        cursor.reset();
        assert_eq!(cursor.next(), SlotAcquire::Grow(0));
        assert_eq!(cursor.next(), SlotAcquire::Grow(1));
        assert_eq!(cursor.next(), SlotAcquire::Grow(2));
        assert_eq!(cursor.len(), 3);
    }

    #[test]
    fn smaller_frame_reuses_without_growing() {
        let mut cursor = SlotCursor::default();
        for _ in 0..3 {
            cursor.next();
        }
        cursor.reset();
        assert_eq!(cursor.next(), SlotAcquire::Reuse(0));
        assert_eq!(cursor.next(), SlotAcquire::Reuse(1));
        assert_eq!(cursor.len(), 3, "pool never shrinks");
    }

    #[test]
    fn repeated_texture_takes_distinct_slots() {
        // A, B, A within one frame: three acquisitions, three slots. The
        // arena is not identity-keyed.
        let mut cursor = SlotCursor::default();
        cursor.reset();
        let slots = [cursor.next(), cursor.next(), cursor.next()];
        assert_eq!(
            slots,
            [
                SlotAcquire::Grow(0),
                SlotAcquire::Grow(1),
                SlotAcquire::Grow(2)
            ]
        );
    }

    #[test]
    fn high_water_mark_spans_frames() {
        let mut cursor = SlotCursor::default();
        cursor.reset();
        for _ in 0..5 {
            cursor.next();
        }
        cursor.reset();
        for _ in 0..2 {
            assert!(matches!(cursor.next(), SlotAcquire::Reuse(_)));
        }
        cursor.reset();
        for _ in 0..5 {
            assert!(matches!(cursor.next(), SlotAcquire::Reuse(_)));
        }
        assert_eq!(cursor.next(), SlotAcquire::Grow(5));
    }
}
