use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Extensions picked up by the split (matched case-sensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".png", ".tif"];

pub const DEFAULT_TRAIN_RATIO: f64 = 0.8;

/// Manifests written by [`create_train_val_split`]
#[derive(Debug, Clone)]
pub struct SplitSummary {
    pub train_file: PathBuf,
    pub val_file: PathBuf,
    pub train_count: usize,
    pub val_count: usize,
}

/// Index splitting `total` items so the first part holds `floor(total * ratio)`
pub fn split_index(total: usize, train_ratio: f64) -> usize {
    ((total as f64 * train_ratio).floor() as usize).min(total)
}

fn list_images(images_dir: &Path) -> anyhow::Result<Vec<String>> {
    let entries = fs::read_dir(images_dir)
        .with_context(|| format!("Failed to list {}", images_dir.display()))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        // Follows symlinks, so linked images count as files
        if !entry.path().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            names.push(name);
        }
    }

    // Directory order is platform dependent; sort so a seed gives the same split everywhere
    names.sort();
    Ok(names)
}

fn write_manifest(path: &Path, images_dir: &Path, names: &[String]) -> anyhow::Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for name in names {
        writeln!(writer, "{}", images_dir.join(name).display())?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `train.txt` and `val.txt` listing the images of `images_dir`.
///
/// Images are shuffled before splitting; without a `seed` the order differs
/// on every run. Both manifests are written even when one of them is empty.
pub fn create_train_val_split(
    images_dir: &Path,
    output_dir: &Path,
    train_ratio: f64,
    seed: Option<u64>,
) -> anyhow::Result<SplitSummary> {
    if !(0.0..=1.0).contains(&train_ratio) {
        anyhow::bail!("train_ratio must be between 0.0 and 1.0, got {}", train_ratio);
    }

    let mut image_files = list_images(images_dir)?;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    image_files.shuffle(&mut rng);

    let split_at = split_index(image_files.len(), train_ratio);
    let (train_files, val_files) = image_files.split_at(split_at);

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let train_file = output_dir.join("train.txt");
    let val_file = output_dir.join("val.txt");

    write_manifest(&train_file, images_dir, train_files)?;
    write_manifest(&val_file, images_dir, val_files)?;

    info!(
        "Created: {} images in train.txt, {} images in val.txt",
        train_files.len(),
        val_files.len()
    );

    Ok(SplitSummary {
        train_file,
        val_file,
        train_count: train_files.len(),
        val_count: val_files.len(),
    })
}
