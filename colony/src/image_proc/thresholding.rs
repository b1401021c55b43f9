//! Threshold masks for colony segmentation
//!
//! Colonies render darker than the agar background, so every mask here marks
//! pixels *below* a threshold as foreground.

use ndarray::{Array2, ArrayView2, Zip};

/// Global inverse threshold: foreground where `pixel < threshold`.
pub fn global_threshold(image: ArrayView2<u8>, threshold: u8) -> Array2<bool> {
    image.mapv(|value| value < threshold)
}

/// Summed-area table of `image` padded by `pad` pixels of replicated border.
///
/// The table has one extra leading row and column of zeros, so the sum over
/// padded rows `y0..y1` and columns `x0..x1` is
/// `t[y1,x1] - t[y0,x1] - t[y1,x0] + t[y0,x0]`.
fn padded_integral(image: ArrayView2<u8>, pad: usize) -> Array2<u64> {
    let (rows, cols) = image.dim();
    let (prows, pcols) = (rows + 2 * pad, cols + 2 * pad);
    let mut table = Array2::<u64>::zeros((prows + 1, pcols + 1));

    for py in 0..prows {
        let y = py.saturating_sub(pad).min(rows - 1);
        let mut row_sum = 0u64;
        for px in 0..pcols {
            let x = px.saturating_sub(pad).min(cols - 1);
            row_sum += u64::from(image[[y, x]]);
            table[[py + 1, px + 1]] = table[[py, px + 1]] + row_sum;
        }
    }

    table
}

/// Adaptive mean inverse threshold
///
/// A pixel is foreground when it is darker than the mean of its
/// `block_size x block_size` neighbourhood minus `c`. Borders are replicated.
/// The comparison is carried out in integers so results do not depend on
/// floating-point rounding.
///
/// # Arguments
///
/// * `image` - Normalized intensity image
/// * `block_size` - Odd window side length
/// * `c` - Offset subtracted from the local mean
pub fn adaptive_mean_threshold(image: ArrayView2<u8>, block_size: usize, c: u8) -> Array2<bool> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Array2::from_elem((rows, cols), false);
    }

    let pad = block_size / 2;
    let table = padded_integral(image, pad);
    let area = (block_size * block_size) as u64;

    let mut mask = Array2::from_elem((rows, cols), false);
    Zip::indexed(&mut mask)
        .and(&image)
        .par_for_each(|(y, x), fg, &value| {
            let (y1, x1) = (y + block_size, x + block_size);
            let sum = table[[y1, x1]] + table[[y, x]] - table[[y, x1]] - table[[y1, x]];
            // value < sum / area - c  <=>  (value + c) * area < sum
            *fg = (u64::from(value) + u64::from(c)) * area < sum;
        });

    mask
}

/// Pixel-wise logical OR of two masks of equal shape
pub fn combine_masks(a: ArrayView2<bool>, b: ArrayView2<bool>) -> Array2<bool> {
    let mut combined = a.to_owned();
    Zip::from(&mut combined).and(&b).for_each(|out, &other| *out |= other);
    combined
}
