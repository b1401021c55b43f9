//! End-to-end session workflows through the service facade

use std::sync::Arc;
use std::thread;

use colony::test_util::{encode_png_bytes, synthetic_plate, PlateSpec};
use colony::{
    Colony, ColonyCounter, ColonyError, DetectOutcome, DetectionParams, DetectionParamsRaw,
    ImageId, RemovalPolicy, ServiceConfig, SessionId, SessionStore, UploadFile, ValidationError,
};

fn counter() -> ColonyCounter {
    ColonyCounter::new(ServiceConfig {
        worker_threads: 2,
        ..Default::default()
    })
    .unwrap()
}

fn plate_file(name: &str, spec: &PlateSpec) -> UploadFile {
    UploadFile::new(name, encode_png_bytes(&synthetic_plate(spec)))
}

fn csv_rows(bytes: &[u8]) -> Vec<csv::StringRecord> {
    csv::Reader::from_reader(bytes)
        .records()
        .map(|r| r.unwrap())
        .collect()
}

fn upload_one(counter: &ColonyCounter) -> (SessionId, ImageId) {
    let upload = counter
        .upload(vec![plate_file("plate.png", &PlateSpec::default())], None)
        .unwrap();
    (upload.session_id, upload.images[0].image_id)
}

#[test]
fn scenario_a_add_then_remove_manual_point() {
    let counter = counter();
    let (_, image) = upload_one(&counter);

    let outcome = counter
        .detect(image, DetectionParams::default(), false)
        .unwrap();
    let auto = outcome.completed().unwrap().count();

    let point = Colony::new(100.0, 100.0, 0.0);
    let state = counter
        .update_annotations(image, vec![point], Vec::new())
        .unwrap();
    assert_eq!(state.auto_count, auto);
    assert_eq!(state.manual_added, 1);
    assert_eq!(state.final_count, auto + 1);

    let state = counter
        .update_annotations(image, Vec::new(), Vec::new())
        .unwrap();
    assert_eq!(state.manual_added, 0);
    assert_eq!(state.final_count, auto);
    assert_eq!(counter.get_annotation_state(image).unwrap(), state);
}

#[test]
fn scenario_b_export_two_images_in_upload_order() {
    let counter = counter();
    let small = PlateSpec {
        centers: vec![(80.0, 80.0)],
        ..Default::default()
    };
    let upload = counter
        .upload(
            vec![
                plate_file("first.png", &PlateSpec::default()),
                plate_file("second.png", &small),
            ],
            None,
        )
        .unwrap();
    let (first, second) = (upload.images[0].image_id, upload.images[1].image_id);

    counter.detect(first, DetectionParams::default(), false).unwrap();
    let tuned = DetectionParamsRaw {
        global_thresh: 110,
        ..Default::default()
    };
    counter.detect(second, tuned, false).unwrap();
    counter
        .update_annotations(second, vec![Colony::new(10.0, 10.0, 0.0)], Vec::new())
        .unwrap();

    let rows = csv_rows(&counter.export(upload.session_id).unwrap());
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][0], first.to_string());
    assert_eq!(&rows[0][1], "first.png");
    assert_eq!(&rows[0][2], "5");
    assert_eq!(&rows[0][5], "5");
    assert_eq!(&rows[0][6], "127");
    assert_eq!(&rows[1][1], "second.png");
    assert_eq!(&rows[1][2], "1");
    assert_eq!(&rows[1][3], "1");
    assert_eq!(&rows[1][5], "2");
    assert_eq!(&rows[1][6], "110");
}

#[test]
fn scenario_c_inverted_area_range_rejected_before_detection() {
    let counter = counter();
    let (_, image) = upload_one(&counter);
    counter.detect(image, DetectionParams::default(), false).unwrap();
    let before = counter.store().image(image).unwrap();

    let bad = DetectionParamsRaw {
        min_area: 1000.0,
        max_area: 500.0,
        ..Default::default()
    };
    let err = counter.detect(image, bad.clone(), true).unwrap_err();
    assert!(matches!(
        err,
        ColonyError::Validation(ValidationError::AreaOrder { .. })
    ));
    assert!(counter.submit_detect(image, bad, false).is_err());

    let after = counter.store().image(image).unwrap();
    assert_eq!(after.issued_sequence, before.issued_sequence);
    assert_eq!(after.detection, before.detection);
}

#[test]
fn export_includes_images_never_detected() {
    let counter = counter();
    let upload = counter
        .upload(
            vec![
                plate_file("a.png", &PlateSpec::default()),
                plate_file("b.png", &PlateSpec::empty()),
                plate_file("c.png", &PlateSpec::default()),
            ],
            None,
        )
        .unwrap();
    counter
        .detect(upload.images[2].image_id, DetectionParams::default(), false)
        .unwrap();

    let rows = csv_rows(&counter.export(upload.session_id).unwrap());
    assert_eq!(rows.len(), 3);
    let names: Vec<&str> = rows.iter().map(|r| &r[1]).collect();
    assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    assert_eq!(&rows[0][5], "0");
    assert_eq!(&rows[0][6], "");
    assert_eq!(&rows[2][2], "5");
}

#[test]
fn bad_file_does_not_abort_upload() {
    let counter = counter();
    let upload = counter
        .upload(
            vec![
                plate_file("good-1.png", &PlateSpec::default()),
                UploadFile::new("broken.png", b"not a png at all".to_vec()),
                plate_file("../nested/good-2.png", &PlateSpec::empty()),
            ],
            None,
        )
        .unwrap();

    let names: Vec<&str> = upload.images.iter().map(|i| i.filename.as_str()).collect();
    assert_eq!(names, vec!["good-1.png", "nested/good-2.png"]);
    assert_eq!(upload.rejected.len(), 1);
    assert_eq!(upload.rejected[0].filename, "broken.png");
    assert_eq!(upload.images[0].width, 320);
    assert_eq!(upload.images[0].height, 240);

    let rows = csv_rows(&counter.export(upload.session_id).unwrap());
    assert_eq!(rows.len(), 2);
}

#[test]
fn upload_continues_existing_session() {
    let counter = counter();
    let (session, first) = upload_one(&counter);
    let upload = counter
        .upload(vec![plate_file("more.png", &PlateSpec::empty())], Some(session))
        .unwrap();
    assert_eq!(upload.session_id, session);

    let ids: Vec<ImageId> = counter
        .store()
        .session_images(session)
        .unwrap()
        .into_iter()
        .map(|entry| entry.image_id)
        .collect();
    assert_eq!(ids, vec![first, upload.images[0].image_id]);

    let ghost = SessionId::from_raw(u64::MAX);
    assert!(matches!(
        counter.upload(vec![plate_file("x.png", &PlateSpec::empty())], Some(ghost)),
        Err(ColonyError::SessionNotFound(id)) if id == ghost
    ));
}

#[test]
fn annotation_updates_are_idempotent() {
    let counter = counter();
    let (_, image) = upload_one(&counter);
    let auto = counter
        .detect(image, DetectionParams::default(), false)
        .unwrap()
        .completed()
        .unwrap();
    let removed = vec![auto.result.colonies[0]];
    let added = vec![Colony::new(5.0, 5.0, 0.0), Colony::new(300.0, 200.0, 0.0)];

    let first = counter
        .update_annotations(image, added.clone(), removed.clone())
        .unwrap();
    let second = counter.update_annotations(image, added, removed).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.final_count, auto.count() + 2 - 1);
}

#[test]
fn annotations_before_detection_count_from_zero() {
    let counter = counter();
    let (_, image) = upload_one(&counter);
    let state = counter
        .update_annotations(image, Vec::new(), vec![Colony::new(1.0, 1.0, 3.0)])
        .unwrap();
    assert_eq!(state.auto_count, 0);
    assert_eq!(state.final_count, 0);
}

#[test]
fn unknown_image_is_not_found() {
    let counter = counter();
    let ghost = ImageId::from_raw(u64::MAX);
    assert!(matches!(
        counter.update_annotations(ghost, Vec::new(), Vec::new()),
        Err(ColonyError::ImageNotFound(_))
    ));
    assert!(matches!(
        counter.detect(ghost, DetectionParams::default(), false),
        Err(ColonyError::ImageNotFound(_))
    ));
    assert!(counter.fetch_image(ghost).is_err());
}

#[test]
fn detect_and_annotate_race_on_one_image() {
    let counter = Arc::new(counter());
    let (_, image) = upload_one(&counter);

    let detectors: Vec<_> = (0..4i32)
        .map(|i| {
            let counter = counter.clone();
            thread::spawn(move || {
                let raw = DetectionParamsRaw {
                    global_thresh: 120 + i,
                    ..Default::default()
                };
                counter.detect(image, raw, i % 2 == 0).unwrap();
            })
        })
        .collect();
    let editors: Vec<_> = (0..4i32)
        .map(|i| {
            let counter = counter.clone();
            thread::spawn(move || {
                let added = vec![Colony::new(10.0 * f64::from(i), 5.0, 0.0); i as usize + 1];
                counter.update_annotations(image, added, Vec::new()).unwrap()
            })
        })
        .collect();

    for handle in detectors {
        handle.join().unwrap();
    }
    for handle in editors {
        let state = handle.join().unwrap();
        assert_eq!(
            state.final_count,
            state.auto_count + state.manual_added - state.manual_removed
        );
    }

    // Whatever the interleaving, stored state is one writer's complete output.
    let entry = counter.store().image(image).unwrap();
    let added = &entry.edits.added;
    assert!((1..=4).contains(&added.len()));
    assert!(added.iter().all(|c| *c == added[0]));
    let detection = entry.detection.unwrap();
    assert_eq!(detection.count(), PlateSpec::default().centers.len());

    let state = counter.get_annotation_state(image).unwrap();
    assert_eq!(state.auto_count, detection.count());
    assert_eq!(state.final_count, detection.count() + added.len());
}

#[test]
fn queued_detections_are_superseded_by_newer_requests() {
    let counter = ColonyCounter::new(ServiceConfig {
        worker_threads: 1,
        queue_capacity: 8,
        skip_superseded: true,
        ..Default::default()
    })
    .unwrap();

    let big = PlateSpec {
        width: 2000,
        height: 2000,
        centers: vec![(500.0, 500.0), (1500.0, 1500.0)],
        ..Default::default()
    };
    let upload = counter
        .upload(
            vec![
                plate_file("big.png", &big),
                plate_file("small.png", &PlateSpec::default()),
            ],
            None,
        )
        .unwrap();
    let (blocker, image) = (upload.images[0].image_id, upload.images[1].image_id);

    // Occupy the only worker, then queue three requests for the same image.
    let busy = counter
        .submit_detect(blocker, DetectionParams::default(), false)
        .unwrap();
    let tickets: Vec<_> = (0..3)
        .map(|_| {
            counter
                .submit_detect(image, DetectionParams::default(), false)
                .unwrap()
        })
        .collect();
    assert_eq!(
        tickets.iter().map(|t| t.sequence()).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    busy.wait().unwrap();
    let outcomes: Vec<DetectOutcome> = tickets.into_iter().map(|t| t.wait().unwrap()).collect();
    assert!(matches!(
        outcomes[0],
        DetectOutcome::Superseded { sequence: 1, latest: 3, .. }
    ));
    assert!(matches!(outcomes[1], DetectOutcome::Superseded { sequence: 2, .. }));
    let response = outcomes[2].clone().completed().unwrap();
    assert_eq!(response.sequence, 3);
    assert!(response.latest);
    assert_eq!(
        counter.store().image(image).unwrap().detection.unwrap().sequence,
        3
    );
}

#[test]
fn default_config_completes_every_detect() {
    let counter = ColonyCounter::new(ServiceConfig {
        worker_threads: 1,
        ..Default::default()
    })
    .unwrap();
    let (_, image) = upload_one(&counter);

    let tickets: Vec<_> = (0..3)
        .map(|_| {
            counter
                .submit_detect(image, DetectionParams::default(), false)
                .unwrap()
        })
        .collect();
    let responses: Vec<_> = tickets
        .into_iter()
        .map(|t| {
            t.wait()
                .unwrap()
                .completed()
                .expect("detect was skipped with default config")
        })
        .collect();

    for response in &responses {
        assert_eq!(response.count(), PlateSpec::default().centers.len());
    }
    assert!(responses[2].latest);
    assert_eq!(
        counter.store().image(image).unwrap().detection.unwrap().sequence,
        3
    );
}

#[test]
fn full_queue_is_reported() {
    let counter = ColonyCounter::new(ServiceConfig {
        worker_threads: 1,
        queue_capacity: 1,
        ..Default::default()
    })
    .unwrap();
    let big = PlateSpec {
        width: 2000,
        height: 2000,
        ..Default::default()
    };
    let upload = counter
        .upload(
            vec![plate_file("a.png", &big), plate_file("b.png", &big)],
            None,
        )
        .unwrap();
    let (a, b) = (upload.images[0].image_id, upload.images[1].image_id);

    let mut tickets = Vec::new();
    let mut saw_full = false;
    for _ in 0..4 {
        for image in [a, b] {
            match counter.submit_detect(image, DetectionParams::default(), false) {
                Ok(ticket) => tickets.push(ticket),
                Err(ColonyError::QueueFull) => saw_full = true,
                Err(other) => panic!("unexpected error {other}"),
            }
        }
    }
    assert!(saw_full);
    for ticket in tickets {
        ticket.wait().unwrap();
    }
}

#[test]
fn mask_fetch_and_preview() {
    let counter = counter();
    let (_, image) = upload_one(&counter);
    let response = counter
        .detect(image, DetectionParams::default(), true)
        .unwrap()
        .completed()
        .unwrap();

    let mask = response.result.mask_png.as_ref().unwrap();
    let decoded = image::load_from_memory(mask).unwrap().to_luma8();
    assert_eq!(decoded.dimensions(), (320, 240));
    assert!(decoded.pixels().all(|p| p[0] == 0 || p[0] == 255));
    assert!(decoded.pixels().any(|p| p[0] == 255));

    let fetched = counter.fetch_image(image).unwrap();
    assert_eq!(fetched.content_type, "image/png");
    assert_eq!(fetched.filename, "plate.png");

    let preview = counter.fetch_preview(image).unwrap();
    let rendered = image::load_from_memory(&preview).unwrap();
    assert_eq!((rendered.width(), rendered.height()), (320, 240));
}

#[test]
fn rematch_policy_through_service() {
    let counter = ColonyCounter::new(ServiceConfig {
        worker_threads: 1,
        removal_policy: RemovalPolicy::RematchOnSave,
        match_tolerance: 5.0,
        ..Default::default()
    })
    .unwrap();
    let (_, image) = upload_one(&counter);
    let auto = counter
        .detect(image, DetectionParams::default(), false)
        .unwrap()
        .completed()
        .unwrap();
    let target = auto.result.colonies[1];

    let nudged = Colony::new(target.x + 2.0, target.y - 1.0, 0.0);
    let stray = Colony::new(5.0, 235.0, 0.0);
    let state = counter
        .update_annotations(image, Vec::new(), vec![nudged, stray])
        .unwrap();
    assert_eq!(state.manual_removed, 1);
    assert_eq!(state.final_count, auto.count() - 1);
    assert_eq!(
        counter.store().image(image).unwrap().edits.removed,
        vec![target]
    );
}

#[test]
fn removed_session_is_gone() {
    let counter = counter();
    let (session, image) = upload_one(&counter);
    assert_eq!(counter.remove_session(session).unwrap(), 1);
    assert!(matches!(
        counter.export(session),
        Err(ColonyError::SessionNotFound(_))
    ));
    assert!(counter.get_annotation_state(image).is_err());
}
