//! Binary morphology with square structuring elements
//!
//! A square kernel is separable, so each operator runs as a row pass followed
//! by a column pass. Pixels outside the image are ignored: they neither grow
//! a dilation nor block an erosion.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip};

/// Square structuring element of side `size`, anchored at `size / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquareKernel {
    size: usize,
}

impl SquareKernel {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Reach of the window before and after the anchor
    fn extent(&self) -> (usize, usize) {
        let before = self.size / 2;
        (before, self.size - 1 - before)
    }
}

#[derive(Clone, Copy)]
enum Op {
    Dilate,
    Erode,
}

fn sweep_lane(input: ArrayView1<bool>, mut output: ArrayViewMut1<bool>, kernel: SquareKernel, op: Op) {
    let n = input.len();
    let (before, after) = kernel.extent();

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0usize);
    for &fg in input.iter() {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + usize::from(fg));
    }

    for i in 0..n {
        let lo = i.saturating_sub(before);
        let hi = (i + after).min(n - 1);
        let count = prefix[hi + 1] - prefix[lo];
        output[i] = match op {
            Op::Dilate => count > 0,
            Op::Erode => count == hi + 1 - lo,
        };
    }
}

fn sweep(mask: ArrayView2<bool>, kernel: SquareKernel, op: Op, axis: Axis) -> Array2<bool> {
    let mut out = Array2::from_elem(mask.dim(), false);
    if mask.is_empty() {
        return out;
    }
    Zip::from(out.lanes_mut(axis))
        .and(mask.lanes(axis))
        .par_for_each(|out_lane, in_lane| sweep_lane(in_lane, out_lane, kernel, op));
    out
}

fn apply(mask: ArrayView2<bool>, kernel: SquareKernel, op: Op) -> Array2<bool> {
    if kernel.size == 1 {
        return mask.to_owned();
    }
    let rows_done = sweep(mask, kernel, op, Axis(1));
    sweep(rows_done.view(), kernel, op, Axis(0))
}

fn repeat(mask: Array2<bool>, kernel: SquareKernel, op: Op, iterations: usize) -> Array2<bool> {
    (0..iterations).fold(mask, |acc, _| apply(acc.view(), kernel, op))
}

/// One round of dilation
pub fn dilate(mask: ArrayView2<bool>, kernel: SquareKernel) -> Array2<bool> {
    apply(mask, kernel, Op::Dilate)
}

/// One round of erosion
pub fn erode(mask: ArrayView2<bool>, kernel: SquareKernel) -> Array2<bool> {
    apply(mask, kernel, Op::Erode)
}

/// `iterations` rounds of dilation; zero rounds returns the mask unchanged.
pub fn dilate_n(mask: ArrayView2<bool>, kernel: SquareKernel, iterations: usize) -> Array2<bool> {
    repeat(mask.to_owned(), kernel, Op::Dilate, iterations)
}

/// Opening: `iterations` erosions followed by `iterations` dilations.
///
/// Removes specks smaller than the kernel while leaving larger regions
/// roughly in place.
pub fn open(mask: ArrayView2<bool>, kernel: SquareKernel, iterations: usize) -> Array2<bool> {
    let eroded = repeat(mask.to_owned(), kernel, Op::Erode, iterations);
    repeat(eroded, kernel, Op::Dilate, iterations)
}

/// Closing: `iterations` dilations followed by `iterations` erosions.
///
/// Bridges gaps between nearby fragments and fills small holes.
pub fn close(mask: ArrayView2<bool>, kernel: SquareKernel, iterations: usize) -> Array2<bool> {
    let dilated = repeat(mask.to_owned(), kernel, Op::Dilate, iterations);
    repeat(dilated, kernel, Op::Erode, iterations)
}
