use crate::error::{NuggetError, Result};

/// One slice `[start, end)` of an ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub len: usize,
}

/// Lazy traversal produced by [`windows`].
///
/// Starts are visited from the last stride-aligned position down to 0, so the
/// window anchored at 0 is always processed last.
#[derive(Debug, Clone)]
pub struct Windows {
    n: usize,
    window_size: usize,
    stride: usize,
    next_start: Option<usize>,
}

/// Windows over `0..n` of `window_size` items, stepping by `stride`.
///
/// A trailing window is skipped when the window one stride earlier already
/// reaches `n`, so every index is covered and no degenerate remainder is
/// emitted.
pub fn windows(n: usize, window_size: usize, stride: usize) -> Result<Windows> {
    if window_size == 0 || stride == 0 {
        return Err(NuggetError::InvalidWindowConfig(format!(
            "window_size ({window_size}) and stride ({stride}) must be positive"
        )));
    }
    if stride > window_size {
        return Err(NuggetError::InvalidWindowConfig(format!(
            "stride ({stride}) must not exceed window_size ({window_size})"
        )));
    }
    let first = if window_size >= n { 0 } else { (n / stride) * stride };
    Ok(Windows { n, window_size, stride, next_start: Some(first) })
}

impl Windows {
    fn covered_by_next(&self, start: usize) -> bool {
        start - self.stride + self.window_size >= self.n
    }
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        loop {
            let start = self.next_start?;
            // starts are multiples of stride, so this bottoms out exactly at 0
            self.next_start = start.checked_sub(self.stride);
            let end = (start + self.window_size).min(self.n);
            let len = end - start;
            if start == 0 || (len > 0 && !self.covered_by_next(start)) {
                return Some(Window { start, end, len });
            }
        }
    }
}
