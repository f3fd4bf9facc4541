//! Work-size planning.
//!
//! Devices require the global work size to be a multiple of the local
//! (work-group) size, and cap the local size in hardware. Every buffer the
//! solver allocates is sized to the padded global size produced here.

/// Round `elements` up to the next multiple of `local`.
///
/// Returns `elements` unchanged when it is already a multiple.
pub fn round_up(local: usize, elements: usize) -> usize {
    let r = elements % local;
    if r == 0 {
        elements
    } else {
        elements + local - r
    }
}

/// A 1-D dispatch shape: `global % local == 0` and `global - requested < local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedSize {
    pub requested: usize,
    pub local: usize,
    pub global: usize,
}

impl PaddedSize {
    /// Plan a 1-D dispatch covering `element_count` work-items.
    ///
    /// `local = min(element_count, device_max)`, never below one.
    pub fn plan(element_count: usize, device_max: usize) -> Self {
        let local = element_count.min(device_max).max(1);
        Self {
            requested: element_count,
            local,
            global: round_up(local, element_count.max(1)),
        }
    }

    /// Number of work-groups, which is also the length of a per-group
    /// reduction buffer.
    pub fn work_groups(&self) -> usize {
        self.global / self.local
    }

    /// Global elements beyond the problem dimension.
    pub fn padding(&self) -> usize {
        self.global - self.requested
    }
}

/// A 2-D tiled dispatch shape. Each axis gets `floor(sqrt(device_max))`
/// lanes, capped by the extent of that axis.
///
/// Planning shape for tiled kernels over a matrix. The relaxation kernels
/// are all 1-D and plan with `PaddedSize`; no shipped kernel dispatches in
/// 2-D yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedSize2d {
    pub x: PaddedSize,
    pub y: PaddedSize,
}

impl PaddedSize2d {
    pub fn plan(width: usize, height: usize, device_max: usize) -> Self {
        let side = tile_side(device_max);
        Self {
            x: PaddedSize::plan(width, side),
            y: PaddedSize::plan(height, side),
        }
    }

    /// Lanes per work-group, never above the device maximum it was planned for.
    pub fn local_invocations(&self) -> usize {
        self.x.local * self.y.local
    }

    pub fn work_groups(&self) -> (usize, usize) {
        (self.x.work_groups(), self.y.work_groups())
    }
}

fn tile_side(device_max: usize) -> usize {
    let mut side = (device_max as f64).sqrt() as usize;
    // Guard against float rounding on perfect squares.
    while (side + 1) * (side + 1) <= device_max {
        side += 1;
    }
    while side > 1 && side * side > device_max {
        side -= 1;
    }
    side.max(1)
}
