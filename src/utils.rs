//! Small arithmetic helpers shared by the chunk model and the platform layer.

/// Rounds `to_be_aligned` up to the next multiple of `alignment`.
///
/// Used to round slab sizes up to [`crate::kernel::page_size`] and chunk
/// requests up to [`crate::chunk::CHUNK_ALIGN`], so that every header we
/// carve out of a slab lands on a properly aligned address. `alignment`
/// must be a power of two.
#[inline]
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when the
/// rounded value does not fit in a `usize`.
#[inline]
pub const fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(alignment - 1) {
        Some(bumped) => Some(bumped & !(alignment - 1)),
        None => None,
    }
}
