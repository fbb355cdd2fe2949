//! CLI tool to run a saved screenshot (or minimap crop) through the minimap
//! analyzer and, optionally, locate it on a region's large map.
//! Usage: cargo run -p sr-vision --features cli --bin analyze_minimap -- \
//!     <screenshot.png> [output_dir] [data_dir region_id]

use std::path::PathBuf;

use sr_data::{AtlasStore, FileAtlas};
use sr_vision::{AnalyzerConfig, EstimatorConfig, LargeMapInfo, MinimapAnalyzer, PositionEstimator};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <screenshot.png> [output_dir] [data_dir region_id]", args[0]);
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    let output_dir = if args.len() >= 3 {
        PathBuf::from(&args[2])
    } else {
        PathBuf::from("./debug_output")
    };
    let _ = std::fs::create_dir_all(&output_dir);

    println!("Loading image: {}", input_path.display());
    let img = image::open(&input_path)
        .expect("Failed to open image")
        .to_rgba8();
    let img = sr_capture::to_reference(img);

    let mut analyzer = MinimapAnalyzer::new(AnalyzerConfig::default());

    let mut map = None;
    if args.len() >= 5 {
        let atlas = FileAtlas::load(&PathBuf::from(&args[3])).expect("Failed to load atlas");
        let info = LargeMapInfo::load(&atlas, &args[4], analyzer.config(), None)
            .expect("Failed to load large map");
        analyzer.load_templates(&atlas, &info.landmark_template_ids());
        println!(
            "Region {}: {}x{}, {} landmark(s)",
            info.region.id,
            info.width(),
            info.height(),
            info.landmarks.len()
        );
        let has_other_floor = atlas
            .region(&args[4])
            .map(|r| r.has_other_floor)
            .unwrap_or(false);
        map = Some((info, has_other_floor));
    }

    let (ids, has_other_floor) = match &map {
        Some((info, other)) => (info.landmark_template_ids(), *other),
        None => (Vec::new(), false),
    };

    println!("\n=== Minimap ===");
    let mm = analyzer.analyze(&img, &ids, has_other_floor);
    match mm.facing_angle {
        Some(a) => println!("Facing: {:.1} deg", a),
        None => println!("Facing: NOT FOUND"),
    }
    println!("Under attack: {}", mm.under_attack);
    println!("Enemy locked: {}", mm.enemy_locked);
    println!("Road pixels: {}", sr_vision::masks::count_nonzero(&mm.road_mask));
    for (id, list) in &mm.landmarks {
        for det in list.iter() {
            println!(
                "  Landmark {}: x={:.0} y={:.0} w={:.0} h={:.0} inliers={:.0}",
                id, det.x, det.y, det.w, det.h, det.confidence
            );
        }
    }

    let _ = mm.origin.save(output_dir.join("minimap.png"));
    let _ = mm.arrow_mask.save(output_dir.join("arrow_mask.png"));
    let _ = mm.road_mask.save(output_dir.join("road_mask.png"));
    let _ = mm.landmark_mask.save(output_dir.join("landmark_mask.png"));

    if let Some((info, _)) = &map {
        println!("\n=== Position ===");
        let estimator = PositionEstimator::new(EstimatorConfig::default());
        match estimator.cal_character_pos(&mm, info, None, false, false) {
            Some(est) => println!(
                "{} fix: ({:.1}, {:.1}) conf {:.3} scale {:.2}",
                est.strategy, est.world.x, est.world.y, est.confidence, est.scale
            ),
            None => println!("Position: NOT FOUND"),
        }
    }

    println!("\nDebug images saved to {}", output_dir.display());
}
