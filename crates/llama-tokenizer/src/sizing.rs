//! Measure-then-fill buffers.
//!
//! Tokenization and template rendering both report the exact output size they
//! need. [`measure_then_fill`] hides the two calls behind one: it runs `fill`
//! against an initial buffer, grows the buffer to the reported size if it was
//! too small, and retries exactly once.

use crate::{TokenizerError, TokenizerResult};

/// Run `fill` with a buffer of `initial_len` elements, growing it once if needed.
///
/// `fill` writes as much as fits and returns the full length it needs. A second
/// call that still disagrees with the first measurement is an error, never a
/// silent truncation.
pub fn measure_then_fill<T, F>(initial_len: usize, mut fill: F) -> TokenizerResult<Vec<T>>
where
    T: Clone + Default,
    F: FnMut(&mut [T]) -> TokenizerResult<usize>,
{
    let mut buf = vec![T::default(); initial_len];
    let required = fill(&mut buf)?;
    if required > buf.len() {
        buf.resize(required, T::default());
        let filled = fill(&mut buf)?;
        if filled != required {
            return Err(TokenizerError::SizeMismatch {
                measured: required,
                filled,
            });
        }
    }
    buf.truncate(required);
    Ok(buf)
}

/// Copy as much of `src` as fits into `dst` and return `src.len()`.
pub fn copy_truncated<T: Copy>(src: &[T], dst: &mut [T]) -> usize {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    src.len()
}
