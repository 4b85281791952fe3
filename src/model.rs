//! Shared domain types for the two job runners.

use serde::Serialize;
use std::collections::HashMap;

use crate::params;

/// Particle coordinates grouped per micrograph. Coordinates are carried as
/// the exact text read from the input table and written back verbatim, so a
/// pass through this tool never reformats positions.
#[derive(Debug, Clone)]
pub struct MicrographCoords {
    /// Project-relative micrograph path, as named in the particles table.
    pub micrograph: String,
    /// (x, y) pairs in input-table order.
    pub coords: Vec<(String, String)>,
}

/// Group particle rows by micrograph, keeping first-appearance order of the
/// micrographs and input order of each coordinate list.
pub fn group_by_micrograph<I>(rows: I) -> Vec<MicrographCoords>
where
    I: IntoIterator<Item = (String, String, String)>,
{
    let mut groups: Vec<MicrographCoords> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (mic, x, y) in rows {
        match index.get(&mic) {
            Some(&i) => groups[i].coords.push((x, y)),
            None => {
                index.insert(mic.clone(), groups.len());
                groups.push(MicrographCoords {
                    micrograph: mic,
                    coords: vec![(x, y)],
                });
            }
        }
    }
    groups
}

/// Sort groups by descending particle count. The sort is stable, so equally
/// populated micrographs stay in input order.
pub fn sort_by_count_descending(groups: &mut [MicrographCoords]) {
    groups.sort_by(|a, b| b.coords.len().cmp(&a.coords.len()));
}

/// Box sizes suggested to downstream extraction jobs, derived once from the
/// picking diameter on the first successful picking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestedBoxes {
    pub diameter: i64,
    pub full_box: i64,
    pub binned_box: i64,
}

impl SuggestedBoxes {
    pub fn derive(diameter: i64, angpix: f64) -> Self {
        let full_box = params::full_box_size(diameter, angpix);
        Self {
            diameter,
            full_box,
            binned_box: params::binned_box_size(full_box, angpix),
        }
    }
}

/// crYOLO training configuration, serialized to `config_cryolo.json` before
/// the tool is launched. Field names follow the tool's schema.
#[derive(Debug, Clone, Serialize)]
pub struct CryoloConfig {
    pub model: CryoloModelConfig,
    pub train: CryoloTrainConfig,
    pub valid: CryoloValidConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct CryoloModelConfig {
    pub architecture: String,
    pub input_size: u32,
    pub max_box_per_image: u32,
    pub anchors: [i64; 2],
    /// Low-pass cutoff plus the directory filtered images are written to.
    pub filter: (f64, String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CryoloTrainConfig {
    pub train_image_folder: String,
    pub train_annot_folder: String,
    pub train_times: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub nb_epoch: u32,
    pub object_scale: f64,
    pub no_object_scale: f64,
    pub coord_scale: f64,
    pub class_scale: f64,
    pub pretrained_weights: String,
    pub saved_weights_name: String,
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CryoloValidConfig {
    pub valid_image_folder: String,
    pub valid_annot_folder: String,
    pub valid_times: u32,
}

impl CryoloConfig {
    /// Fine-tune configuration with the fixed hyperparameters the runner
    /// always uses; only the box size, scratch dir and model paths vary.
    pub fn fine_tune(
        box_size: i64,
        filtered_dir: &str,
        image_folder: &str,
        annot_folder: &str,
        pretrained_weights: &str,
        saved_weights_name: &str,
    ) -> Self {
        Self {
            model: CryoloModelConfig {
                architecture: "PhosaurusNet".into(),
                input_size: 1024,
                max_box_per_image: 600,
                anchors: [box_size, box_size],
                filter: (0.1, filtered_dir.to_string()),
            },
            train: CryoloTrainConfig {
                train_image_folder: image_folder.into(),
                train_annot_folder: annot_folder.into(),
                train_times: 10,
                batch_size: 6,
                learning_rate: 0.0001,
                nb_epoch: 200,
                object_scale: 5.0,
                no_object_scale: 1.0,
                coord_scale: 1.0,
                class_scale: 1.0,
                pretrained_weights: pretrained_weights.into(),
                saved_weights_name: saved_weights_name.into(),
                debug: true,
            },
            valid: CryoloValidConfig {
                valid_image_folder: String::new(),
                valid_annot_folder: String::new(),
                valid_times: 1,
            },
        }
    }
}
