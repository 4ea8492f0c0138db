extern crate log;
extern crate pretty_env_logger;

use std::path::PathBuf;
use std::process::exit;

use clap::{arg, command, ArgAction, Command};
use rand::rngs::StdRng;
use rand::SeedableRng;

use bubblescan::debug::{bubble_strip, hotspot_grid, rectify_scan, ImageDebugWriter};
use bubblescan::{
    build_templates, interpret_page, match_scan, BallotMetadata, CancelToken, Interpretation,
    PageTemplate, ScannedPage,
};

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let debug = matches.get_flag("debug");
    let metadata_path = matches
        .get_one::<String>("metadata")
        .expect("metadata path is required");
    let page_paths: Vec<&String> = matches
        .get_many::<String>("page")
        .expect("at least one page raster is required")
        .collect();
    let scan_path = matches
        .get_one::<String>("scan_path")
        .expect("scan image path is required");

    let metadata_json = match std::fs::read_to_string(metadata_path) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error reading metadata: {}", e);
            exit(1);
        }
    };
    let metadata = match BallotMetadata::from_json(&metadata_json) {
        Ok(metadata) => metadata,
        Err(e) => {
            eprintln!("Error parsing metadata: {}", e);
            exit(1);
        }
    };

    let mut rng = match matches.get_one::<String>("seed") {
        Some(seed) => match seed.parse::<u64>() {
            Ok(n) => StdRng::seed_from_u64(n),
            Err(e) => {
                eprintln!("Error parsing seed: {}", e);
                exit(1);
            }
        },
        None => StdRng::from_entropy(),
    };

    let mut pages = Vec::with_capacity(page_paths.len());
    for path in &page_paths {
        match image::open(path) {
            Ok(img) => pages.push(img.into_luma8()),
            Err(e) => {
                eprintln!("Error reading page {}: {}", path, e);
                exit(1);
            }
        }
    }
    let templates = match build_templates(&metadata, pages, &mut rng) {
        Ok(templates) => templates,
        Err(e) => {
            eprintln!("Error building templates: {}", e);
            exit(1);
        }
    };

    let scan_image = match image::open(scan_path) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("Error reading scan {}: {}", scan_path, e);
            exit(1);
        }
    };
    let mut scan = match ScannedPage::from_image(&scan_image) {
        Ok(scan) => scan,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    let cancel = CancelToken::new();

    if templates.len() == 1 {
        match interpret_page(&templates[0], &mut scan, &cancel) {
            Ok(interpretation) => {
                if debug {
                    write_debug_images(scan_path, &templates[0], &scan, &interpretation);
                }
                print_json(&interpretation);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                exit(1);
            }
        }
    } else {
        match match_scan(&templates, &mut scan, &cancel) {
            Ok(outcome) => {
                if debug {
                    if let Some(best) = outcome.readings.first() {
                        write_debug_images(
                            scan_path,
                            &templates[best.template_index],
                            &scan,
                            &best.interpretation,
                        );
                    }
                }
                print_json(&outcome);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                exit(1);
            }
        }
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing result: {}", e);
            exit(1);
        }
    }
}

fn write_debug_images(
    scan_path: &str,
    template: &PageTemplate,
    scan: &ScannedPage,
    interpretation: &Interpretation,
) {
    let writer = ImageDebugWriter::new(PathBuf::from(scan_path), template);
    writer.write_luma("hotspots", &hotspot_grid(&template.orig, &template.hotspots));
    writer.write_luma(
        "rectified",
        &rectify_scan(&template.orig, scan.luma(), &interpretation.transform),
    );
    writer.write_rgb(
        "bubbles",
        &bubble_strip(template, scan.luma(), scan.threshold, &interpretation.transform),
    );
}

#[allow(clippy::cognitive_complexity)]
fn cli() -> Command {
    command!()
        .arg(arg!(-m --metadata <PATH> "Path to bubbles metadata json").required(true))
        .arg(
            arg!(-p --page <PNG> "Rendered original page raster, repeatable in metadata order")
                .required(true)
                .action(ArgAction::Append),
        )
        .arg(arg!(-s --seed <SEED> "Hotspot selection seed; omit for entropy"))
        .arg(arg!(-d --debug "Write debug images next to the scan"))
        .arg(arg!(scan_path: <SCAN_IMAGE> "Path to the scanned ballot image").required(true))
}
