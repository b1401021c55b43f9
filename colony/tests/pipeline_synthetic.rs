//! Pipeline behaviour on synthetic plates

use colony::image_proc::{encode_mask_png, ImagePreprocessor, Segmenter};
use colony::test_util::{synthetic_plate, synthetic_rgb_plate, PlateSpec};
use colony::{ColonyDetector, DetectionParams, DetectionParamsRaw};

fn param_grid() -> Vec<DetectionParams> {
    let raws = [
        DetectionParamsRaw::default(),
        DetectionParamsRaw {
            global_thresh: 0,
            adaptive_block_size: 3,
            adaptive_c: 0,
            morph_kernel_size: 1,
            opening_iterations: 0,
            dilation_iterations: 0,
            closing_iterations: 0,
            min_area: 0.0,
            max_area: 1.0,
            clahe_clip_limit: 0.5,
            clahe_tile_grid_size: 2,
        },
        DetectionParamsRaw {
            global_thresh: 255,
            adaptive_block_size: 99,
            adaptive_c: 20,
            morph_kernel_size: 15,
            opening_iterations: 8,
            dilation_iterations: 8,
            closing_iterations: 12,
            min_area: 10.0,
            max_area: 1.0e9,
            clahe_clip_limit: 5.0,
            clahe_tile_grid_size: 32,
        },
        DetectionParamsRaw {
            global_thresh: 100,
            adaptive_block_size: 31,
            morph_kernel_size: 4,
            min_area: 300.0,
            max_area: 2000.0,
            ..Default::default()
        },
    ];
    raws.into_iter()
        .map(|raw| DetectionParams::new(raw).unwrap())
        .collect()
}

#[test]
fn test_mask_is_binary_with_input_dimensions() {
    let spec = PlateSpec {
        width: 160,
        height: 120,
        centers: vec![(40.0, 40.0), (110.0, 80.0)],
        noise_amplitude: 8,
        ..Default::default()
    };
    let plate = synthetic_plate(&spec);

    for params in param_grid() {
        let normalized = ImagePreprocessor::new(&params).normalize(&plate);
        assert_eq!(normalized.dim(), (120, 160));

        let mask = Segmenter::new(&params).segment(normalized.view());
        assert_eq!(mask.dim(), (120, 160));

        let png = encode_mask_png(mask.view()).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (160, 120));
        assert!(
            decoded.pixels().all(|p| p[0] == 0 || p[0] == 255),
            "mask for {params:?} has values other than 0 and 255"
        );
    }
}

#[test]
fn test_plate_mask_has_exactly_two_values() {
    let plate = synthetic_plate(&PlateSpec::default());
    let detection = ColonyDetector::new(&DetectionParams::default()).detect(&plate);
    let png = encode_mask_png(detection.mask.view()).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_luma8();

    let mut seen: Vec<u8> = decoded.pixels().map(|p| p[0]).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen, vec![0, 255]);
}

#[test]
fn test_colony_areas_within_bounds() {
    let spec = PlateSpec {
        noise_amplitude: 10,
        ..Default::default()
    };
    let plate = synthetic_plate(&spec);

    for params in param_grid() {
        let detection = ColonyDetector::new(&params).detect(&plate);
        for colony in &detection.colonies {
            let area = colony.area();
            assert!(
                area >= params.min_area() - 1e-6 && area <= params.max_area() + 1e-6,
                "area {area} outside [{}, {}]",
                params.min_area(),
                params.max_area()
            );
            assert!(colony.radius >= 0.0);
        }
    }
}

#[test]
fn test_detection_is_deterministic() {
    let spec = PlateSpec {
        noise_amplitude: 10,
        ..Default::default()
    };
    let plate = synthetic_plate(&spec);
    let detector = ColonyDetector::new(&DetectionParams::default());

    let first = detector.detect(&plate);
    let second = detector.detect(&plate);
    assert_eq!(first.colonies, second.colonies);
    assert_eq!(first.mask, second.mask);
}

#[test]
fn test_noisy_plate_counts_every_disk() {
    let spec = PlateSpec {
        noise_amplitude: 10,
        ..Default::default()
    };
    let detection = ColonyDetector::new(&DetectionParams::default()).detect(&synthetic_plate(&spec));

    assert_eq!(detection.colonies.len(), spec.centers.len());
    for (colony, &(cx, cy)) in detection.colonies.iter().zip(&spec.centers) {
        assert!((colony.x - cx).abs() < 3.0, "x {} vs {}", colony.x, cx);
        assert!((colony.y - cy).abs() < 3.0, "y {} vs {}", colony.y, cy);
    }
}

#[test]
fn test_color_plate_matches_grayscale_count() {
    let spec = PlateSpec::default();
    let detector = ColonyDetector::new(&DetectionParams::default());
    let gray = detector.detect(&synthetic_plate(&spec));
    let color = detector.detect(&synthetic_rgb_plate(&spec));
    assert_eq!(gray.colonies.len(), color.colonies.len());
}

#[test]
fn test_output_sorted_by_row_then_column() {
    let spec = PlateSpec {
        centers: vec![(250.0, 50.0), (50.0, 50.0), (150.0, 190.0), (60.0, 120.0)],
        ..Default::default()
    };
    let detection = ColonyDetector::new(&DetectionParams::default()).detect(&synthetic_plate(&spec));
    assert_eq!(detection.colonies.len(), 4);
    for pair in detection.colonies.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!(a.y < b.y || (a.y == b.y && a.x <= b.x), "{a:?} before {b:?}");
    }
}

#[test]
fn test_blank_plate_has_no_colonies() {
    let detection =
        ColonyDetector::new(&DetectionParams::default()).detect(&synthetic_plate(&PlateSpec::empty()));
    assert!(detection.colonies.is_empty());
    assert!(detection.mask.iter().all(|&fg| !fg));
}
