//! Region labelling and colony extraction from binary masks.

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::colony::Colony;
use crate::config::DetectionParams;

/// Pixel statistics of one connected region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Number of pixels in the region
    pub area: usize,
    /// Mean column index
    pub centroid_x: f64,
    /// Mean row index
    pub centroid_y: f64,
}

/// Find connected components in a binary mask
///
/// This uses a simple 8-connectivity flood fill algorithm. Labels start at 1
/// and follow raster order of each component's first pixel; background is 0.
///
/// # Returns
///
/// A labeled image and the number of components
pub fn connected_components(mask: ArrayView2<bool>) -> (Array2<u32>, u32) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::zeros((rows, cols));
    let mut label_counter = 0;

    const NEIGHBORS: [(isize, isize); 8] = [
        (-1, -1),
        (-1, 0),
        (-1, 1),
        (0, -1),
        (0, 1),
        (1, -1),
        (1, 0),
        (1, 1),
    ];

    let mut stack = Vec::new();
    for ((i, j), &fg) in mask.indexed_iter() {
        if !fg || labels[[i, j]] != 0 {
            continue;
        }
        label_counter += 1;
        labels[[i, j]] = label_counter;
        stack.push((i, j));

        while let Some((y, x)) = stack.pop() {
            for &(dy, dx) in &NEIGHBORS {
                let (Some(ny), Some(nx)) = (y.checked_add_signed(dy), x.checked_add_signed(dx))
                else {
                    continue;
                };
                if ny < rows && nx < cols && mask[[ny, nx]] && labels[[ny, nx]] == 0 {
                    labels[[ny, nx]] = label_counter;
                    stack.push((ny, nx));
                }
            }
        }
    }

    (labels, label_counter)
}

/// Area and centroid of every labelled region, indexed by `label - 1`
pub fn region_stats(labels: ArrayView2<u32>, num_labels: u32) -> Vec<Region> {
    let mut sums = vec![(0usize, 0f64, 0f64); num_labels as usize];
    for ((y, x), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let entry = &mut sums[(label - 1) as usize];
        entry.0 += 1;
        entry.1 += x as f64;
        entry.2 += y as f64;
    }

    sums.into_iter()
        .map(|(area, sum_x, sum_y)| Region {
            area,
            centroid_x: sum_x / area as f64,
            centroid_y: sum_y / area as f64,
        })
        .collect()
}

/// Sort colonies top to bottom, then left to right.
pub fn sort_colonies(colonies: &mut [Colony]) {
    colonies.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
}

/// Converts a mask into the size-filtered, ordered colony list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColonyExtractor {
    min_area: f64,
    max_area: f64,
}

impl ColonyExtractor {
    pub fn new(params: &DetectionParams) -> Self {
        Self {
            min_area: params.min_area(),
            max_area: params.max_area(),
        }
    }

    /// Regions with `min_area <= area <= max_area`, as colonies sorted by (y, x)
    ///
    /// The radius is that of the circle with the region's pixel area.
    pub fn extract(&self, mask: ArrayView2<bool>) -> Vec<Colony> {
        let (labels, num_labels) = connected_components(mask);
        let regions = region_stats(labels.view(), num_labels);

        let mut colonies: Vec<Colony> = regions
            .iter()
            .filter(|region| {
                let area = region.area as f64;
                area >= self.min_area && area <= self.max_area
            })
            .map(|region| Colony::from_area(region.centroid_x, region.centroid_y, region.area as f64))
            .collect();
        sort_colonies(&mut colonies);

        debug!(
            regions = num_labels,
            kept = colonies.len(),
            "Extracted colonies"
        );
        colonies
    }
}
