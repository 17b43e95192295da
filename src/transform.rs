//! Display-space to normalized-device-coordinate transform.

/// Per-frame transform uniform shared by every descriptor set.
///
/// The vertex shader computes `ndc = position * scale + translate`, mapping
/// the full display rectangle onto [-1, 1]².
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformUniform {
    pub scale: [f32; 2],
    pub translate: [f32; 2],
}

impl TransformUniform {
    /// Computes the transform from the draw data's display rectangle.
    ///
    /// `display_pos` is the viewport offset reported by the UI library
    /// (non-zero with multi-viewport setups), `display_size` its logical
    /// size, and `framebuffer_scale` the hidpi factor.
    pub fn new(
        display_pos: [f32; 2],
        display_size: [f32; 2],
        framebuffer_scale: [f32; 2],
    ) -> Self {
        let scale = [
            framebuffer_scale[0] * 2.0 / display_size[0],
            framebuffer_scale[1] * 2.0 / display_size[1],
        ];
        let translate = [
            -1.0 - display_pos[0] * scale[0],
            -1.0 - display_pos[1] * scale[1],
        ];
        Self { scale, translate }
    }

    pub fn as_bytes(&self) -> &[u8] {
        // repr(C), all fields f32: plain-old-data view for the uniform upload.
        unsafe {
            std::slice::from_raw_parts(
                (self as *const Self).cast::<u8>(),
                std::mem::size_of::<Self>(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(t: &TransformUniform, pos: [f32; 2]) -> [f32; 2] {
        [
            pos[0] * t.scale[0] + t.translate[0],
            pos[1] * t.scale[1] + t.translate[1],
        ]
    }

    #[test]
    fn unit_scale_maps_display_rect_to_ndc() {
        let t = TransformUniform::new([0.0, 0.0], [800.0, 600.0], [1.0, 1.0]);
        assert_eq!(t.scale, [2.0 / 800.0, 2.0 / 600.0]);
        assert_eq!(t.translate, [-1.0, -1.0]);
        assert_eq!(apply(&t, [0.0, 0.0]), [-1.0, -1.0]);
        assert_eq!(apply(&t, [800.0, 600.0]), [1.0, 1.0]);
    }

    #[test]
    fn viewport_offset_shifts_translate() {
        let t = TransformUniform::new([100.0, 50.0], [400.0, 200.0], [1.0, 1.0]);
        // The display rectangle starts at (100, 50): its corners still map to
        // the NDC corners.
        let min = apply(&t, [100.0, 50.0]);
        let max = apply(&t, [500.0, 250.0]);
        assert!((min[0] + 1.0).abs() < 1e-6 && (min[1] + 1.0).abs() < 1e-6);
        assert!((max[0] - 1.0).abs() < 1e-6 && (max[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hidpi_scale_is_applied_per_axis() {
        let t = TransformUniform::new([0.0, 0.0], [640.0, 480.0], [2.0, 2.0]);
        assert_eq!(t.scale, [4.0 / 640.0, 4.0 / 480.0]);
    }

    #[test]
    fn byte_view_is_four_floats() {
        let t = TransformUniform::new([0.0, 0.0], [2.0, 2.0], [1.0, 1.0]);
        assert_eq!(t.as_bytes().len(), 16);
    }
}
