//! Image processing stages of the colony detection pipeline
//!
//! Each stage works on `ndarray` arrays indexed `[row, column]`:
//! normalized intensity images are `Array2<u8>` and masks are `Array2<bool>`.

pub mod convert;
pub mod extract;
pub mod morphology;
pub mod preprocess;
pub mod segment;
pub mod thresholding;

pub use convert::{array2_to_gray_image, encode_mask_png, encode_png, gray_image_to_array2};
pub use extract::{connected_components, region_stats, ColonyExtractor, Region};
pub use preprocess::{decode_image, to_grayscale, Clahe, ImagePreprocessor};
pub use segment::Segmenter;
