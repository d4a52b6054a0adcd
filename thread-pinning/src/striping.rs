//! Striped placement of logical thread indices onto CPU positions.
//!
//! Threads are spread over the mask with a fixed stride. When the stride runs
//! past the last CPU, placement restarts one position further along, so the
//! sequence walks successive diagonals instead of wrapping onto CPUs that were
//! already handed out. For 5 CPUs and a step of 2 the positions are
//! `0, 2, 4, 1, 3`.
//!
//! Everything here is pure and platform independent; the pinner feeds the
//! result through [`CpuMask::nth_cpu`](crate::CpuMask::nth_cpu) to obtain a real CPU ID.

/// Stride used when none is configured.
pub const DEFAULT_PINNING_STEP: usize = 1;

/// Maps `thr_idx` to an ordinal position in `[0, num_cpus)`.
///
/// `thr_idx` is reduced modulo `num_cpus` first. Returns `None` when
/// `num_cpus` or `step` is zero.
pub fn stripe_position(thr_idx: usize, num_cpus: usize, step: usize) -> Option<usize> {
    if num_cpus == 0 || step == 0 {
        return None;
    }
    let thr_idx = thr_idx % num_cpus;

    let mut cpu_pos = 0usize;
    let mut offset = 0usize;
    for _ in 0..thr_idx {
        cpu_pos = cpu_pos.saturating_add(step);
        if cpu_pos >= num_cpus {
            offset = offset.saturating_add(1);
            cpu_pos = offset;
        }
    }
    Some(cpu_pos)
}

/// Positions for one full cycle of indices, `0..num_cpus`.
pub fn stripe_cycle(num_cpus: usize, step: usize) -> Vec<usize> {
    (0..num_cpus)
        .filter_map(|thr_idx| stripe_position(thr_idx, num_cpus, step))
        .collect()
}
