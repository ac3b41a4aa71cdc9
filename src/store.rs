/// Annotation store and dataset selection
///
/// Maps an image key (usually a filename) to the Dataset drawn over it.
/// Selection is a pure substring match over an ordered entry list with a
/// mandatory default, so every key resolves to something.
use std::path::Path;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::region::{GlomerulusClass, Region};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access store file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse store file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("store names default dataset `{0}` but no dataset has that name")]
    MissingDefault(String),
}

/// Named, ordered set of Regions for one source image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub regions: Vec<Region>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, regions: Vec<Region>) -> Self {
        Self {
            name: name.into(),
            regions,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// Substrings of the image key that select this dataset
    pub keys: Vec<String>,
    pub dataset: Dataset,
}

/// On-disk layout of a store file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    default: String,
    datasets: Vec<StoreEntry>,
}

#[derive(Debug, Clone)]
pub struct AnnotationStore {
    entries: Vec<StoreEntry>,
    default: Dataset,
}

impl AnnotationStore {
    pub fn new(default: Dataset) -> Self {
        Self {
            entries: Vec::new(),
            default,
        }
    }

    /// Insert or replace the entry whose dataset has the same name.
    /// New entries are matched after the existing ones.
    pub fn upsert(&mut self, keys: Vec<String>, dataset: Dataset) {
        if dataset.name == self.default.name {
            self.default = dataset.clone();
        }
        match self.entries.iter_mut().find(|e| e.dataset.name == dataset.name) {
            Some(entry) => {
                entry.keys = keys;
                entry.dataset = dataset;
            }
            None => self.entries.push(StoreEntry { keys, dataset }),
        }
    }

    /// The dataset for `key`: first entry with a key pattern contained in it,
    /// else the default.
    pub fn select(&self, key: &str) -> &Dataset {
        let selected = self
            .entries
            .iter()
            .find(|entry| entry.keys.iter().any(|pattern| !pattern.is_empty() && key.contains(pattern.as_str())))
            .map(|entry| &entry.dataset)
            .unwrap_or(&self.default);
        debug!("Selected dataset `{}` for key {:?}", selected.name, key);
        selected
    }

    pub fn default_dataset(&self) -> &Dataset {
        &self.default
    }

    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    /// Demo datasets bundled with the viewer
    pub fn builtin() -> Self {
        let mut store = Self::new(Dataset::new("img1", recorded_img1()));
        store.upsert(vec!["6cb".to_string()], Dataset::new("img2", estimated_img2()));
        store.upsert(vec!["647".to_string()], Dataset::new("img3", estimated_img3()));
        store.upsert(
            vec!["final".to_string(), "KB1704935".to_string()],
            Dataset::new("final", ingested_final()),
        );
        store
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self::from_json(&content)?;
        info!(
            "Loaded store {} ({} dataset(s), default `{}`)",
            path.display(),
            store.entries.len(),
            store.default.name
        );
        Ok(store)
    }

    pub fn from_json(content: &str) -> Result<Self, StoreError> {
        let file: StoreFile = serde_json::from_str(content)?;
        let default = file
            .datasets
            .iter()
            .find(|entry| entry.dataset.name == file.default)
            .map(|entry| entry.dataset.clone())
            .ok_or_else(|| StoreError::MissingDefault(file.default.clone()))?;

        Ok(Self {
            entries: file.datasets,
            default,
        })
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        let mut datasets = self.entries.clone();
        if !datasets.iter().any(|e| e.dataset.name == self.default.name) {
            datasets.push(StoreEntry {
                keys: Vec::new(),
                dataset: self.default.clone(),
            });
        }
        let file = StoreFile {
            default: self.default.name.clone(),
            datasets,
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        std::fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!("Saved store to {}", path.display());
        Ok(())
    }
}

impl Default for AnnotationStore {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Hand-recorded centers on img1, in capture order
const IMG1_POINTS: [(f64, f64); 28] = [
    (38.8, 14.2), (39.9, 17.7), (35.6, 18.2), (35.2, 20.7), (37.2, 24.1),
    (36.2, 31.9), (33.7, 34.3), (34.8, 41.0), (34.0, 47.1), (32.7, 51.8),
    (40.8, 33.8), (42.9, 34.6), (44.3, 34.3), (39.9, 41.9), (41.6, 42.7),
    (44.7, 47.2), (42.6, 52.6), (45.1, 53.4), (43.0, 58.2), (39.2, 61.0),
    (41.8, 63.3), (34.9, 73.8), (36.8, 73.7), (52.3, 62.2), (50.4, 65.4),
    (49.8, 67.7), (50.9, 69.2), (50.9, 75.4),
];

/// Stable pseudo-random class for a recorded point, so a reload never
/// reshuffles the demo.
fn deterministic_class(id: &str, index: usize) -> GlomerulusClass {
    const CYCLE: [GlomerulusClass; 5] = [
        GlomerulusClass::Cellular,
        GlomerulusClass::Cellular,
        GlomerulusClass::Membranous,
        GlomerulusClass::Normal,
        GlomerulusClass::Sclerotic,
    ];
    let hash: usize = id.chars().map(|c| c as usize).sum::<usize>() + index;
    CYCLE[hash % CYCLE.len()]
}

fn recorded_img1() -> Vec<Region> {
    IMG1_POINTS
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            let id = format!("rec-{}", i + 1);
            Region {
                class: deterministic_class(&id, i),
                id,
                x,
                y,
                width: 5.0,
                height: 5.0,
                confidence: 0.85 + (i % 15) as f64 * 0.01,
            }
        })
        .collect()
}

fn region(id: &str, x: f64, y: f64, size: f64, class: GlomerulusClass, confidence: f64) -> Region {
    Region {
        id: id.to_string(),
        x,
        y,
        width: size,
        height: size,
        class,
        confidence,
    }
}

fn estimated_img2() -> Vec<Region> {
    use GlomerulusClass::*;
    vec![
        region("g2-1", 30.0, 25.0, 5.0, Cellular, 0.96),
        region("g2-2", 50.0, 22.0, 5.5, Membranous, 0.94),
        region("g2-3", 70.0, 28.0, 5.0, Sclerotic, 0.91),
        region("g2-4", 35.0, 48.0, 6.0, Normal, 0.97),
        region("g2-5", 55.0, 50.0, 5.5, Sclerotic, 0.88),
        region("g2-6", 75.0, 45.0, 5.0, Cellular, 0.95),
    ]
}

fn estimated_img3() -> Vec<Region> {
    use GlomerulusClass::*;
    vec![
        region("g3-1", 30.0, 20.0, 7.0, Cellular, 0.99),
        region("g3-2", 28.0, 40.0, 6.5, Sclerotic, 0.95),
        region("g3-3", 32.0, 60.0, 7.0, Normal, 0.92),
        region("g3-4", 65.0, 30.0, 6.5, Membranous, 0.94),
        region("g3-5", 62.0, 50.0, 7.0, Cellular, 0.97),
    ]
}

/// Model detections on the KB1704935 slide after ingestion, highest
/// confidence first: (x, y, width, height, class, confidence)
const FINAL_DETECTIONS: [(f64, f64, f64, f64, GlomerulusClass, f64); 32] = {
    use GlomerulusClass::*;
    [
        (39.6398, 40.6705, 2.6135, 2.2062, Cellular, 0.0883105993270874),
        (45.2742, 31.2836, 2.7995, 2.0582, Cellular, 0.0882626473903656),
        (42.2738, 49.1544, 2.6819, 2.2221, Cellular, 0.0826101005077362),
        (57.6153, 42.9124, 2.1662, 2.0591, Cellular, 0.08173311501741409),
        (79.6788, 27.2979, 1.8393, 1.5112, Cellular, 0.07917356491088867),
        (30.0821, 58.7411, 2.2539, 2.1225, Cellular, 0.07818613946437836),
        (45.0772, 49.3901, 2.3643, 2.4892, Cellular, 0.07802518457174301),
        (72.8743, 48.5460, 2.1259, 2.0047, Cellular, 0.07585994899272919),
        (34.4494, 45.1075, 2.4714, 2.2850, Membranous, 0.07275200635194778),
        (75.0446, 27.6056, 2.0623, 1.8052, Cellular, 0.07079311460256577),
        (29.1045, 53.0885, 2.2892, 1.8071, Cellular, 0.06755459308624268),
        (37.3245, 64.9904, 2.7300, 2.5951, Cellular, 0.06651205569505692),
        (39.8310, 62.6660, 2.3880, 2.4878, Cellular, 0.06559428572654724),
        (41.4401, 61.7972, 2.0911, 2.1593, Cellular, 0.05980074778199196),
        (50.4731, 40.7069, 1.9390, 2.1834, Cellular, 0.058875422924757004),
        (48.4011, 39.5583, 1.7092, 1.6791, Cellular, 0.056889887899160385),
        (47.3139, 38.3699, 2.0810, 1.7727, Cellular, 0.056071165949106216),
        (35.2478, 41.9694, 2.4452, 2.2291, Membranous, 0.054602548480033875),
        (81.2549, 44.8401, 2.1977, 2.1897, Cellular, 0.05252838879823685),
        (40.3062, 38.7388, 1.6793, 1.4286, Sclerotic, 0.051045674830675125),
        (75.5587, 49.1170, 1.5428, 1.3891, Sclerotic, 0.04226357862353325),
        (27.7555, 62.1551, 2.7420, 1.8477, Cellular, 0.040914200246334076),
        (23.5690, 59.4785, 1.7843, 1.6699, Cellular, 0.03812061995267868),
        (56.1842, 21.8645, 1.9098, 1.3586, Sclerotic, 0.03795149177312851),
        (15.4270, 64.6623, 2.5151, 2.8424, Cellular, 0.03439229354262352),
        (75.6567, 32.0988, 2.1208, 2.1938, Cellular, 0.03246008977293968),
        (44.3956, 33.5411, 2.4151, 1.7725, Crescents, 0.03101876564323902),
        (52.5958, 33.1264, 2.3120, 1.7280, Cellular, 0.016650589182972908),
        (83.7557, 41.5586, 1.5184, 1.4473, Sclerotic, 0.011531938798725605),
        (38.2029, 56.8646, 1.4605, 1.6150, Cellular, 0.005470057483762503),
        (78.3657, 25.3346, 2.6456, 1.5115, Cellular, 0.0),
        (74.9678, 45.6508, 1.4634, 1.3263, Membranous, 0.0),
    ]
};

fn ingested_final() -> Vec<Region> {
    FINAL_DETECTIONS
        .iter()
        .enumerate()
        .map(|(i, &(x, y, width, height, class, confidence))| Region {
            id: format!("final-{}", i + 1),
            x,
            y,
            width,
            height,
            class,
            confidence,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_selection() {
        let store = AnnotationStore::builtin();
        assert_eq!(store.select("6cb3e1a0eb3.jpg").name, "img2");
        assert_eq!(store.select("/slides/64740d5ae.jpg").name, "img3");
        assert_eq!(store.select("final_img.jpg").name, "final");
        assert_eq!(store.select("KB1704935-HE.png").name, "final");
        assert_eq!(store.select("875edca0.jpg").name, "img1");
    }

    #[test]
    fn test_selector_is_total() {
        let store = AnnotationStore::builtin();
        for key in ["", "unknown.tiff", "🙂", "a/b/c"] {
            let dataset = store.select(key);
            assert_eq!(dataset, store.default_dataset());
            assert_eq!(dataset.len(), 28);
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let store = AnnotationStore::builtin();
        assert_eq!(store.select("6cb.jpg"), store.select("6cb.jpg"));
        assert_eq!(recorded_img1(), recorded_img1());
    }

    #[test]
    fn test_recorded_img1_shape() {
        let regions = recorded_img1();
        assert_eq!(regions[0].id, "rec-1");
        assert_eq!(regions[27].id, "rec-28");
        assert!(regions.iter().all(|r| r.width == 5.0 && r.height == 5.0));
        assert!(regions.iter().all(|r| (0.85..=0.99 + 1e-9).contains(&r.confidence)));
        // "rec-1" sums to 408, index 0 -> 408 % 5 = 3
        assert_eq!(regions[0].class, GlomerulusClass::Normal);
    }

    #[test]
    fn test_builtin_final_dataset() {
        let store = AnnotationStore::builtin();
        let dataset = store.select("final_img.jpg");
        assert_eq!(dataset.len(), 32);
        assert_eq!(dataset.regions[0].id, "final-1");
        assert_eq!(dataset.regions[0].x, 39.6398);
        assert_eq!(dataset.regions[31].id, "final-32");
        assert_eq!(dataset.regions[31].class, GlomerulusClass::Membranous);
        assert!(dataset.regions.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));
    }

    #[test]
    fn test_first_matching_entry_wins() {
        let mut store = AnnotationStore::new(Dataset::new("fallback", Vec::new()));
        store.upsert(vec!["slide".to_string()], Dataset::new("a", Vec::new()));
        store.upsert(vec!["slide-2".to_string()], Dataset::new("b", Vec::new()));
        assert_eq!(store.select("slide-2.png").name, "a");

        store.upsert(vec!["zzz".to_string()], Dataset::new("a", Vec::new()));
        assert_eq!(store.select("slide-2.png").name, "b");
        assert_eq!(store.entries().len(), 2);
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("pathoview-store-{}.json", std::process::id()));
        let store = AnnotationStore::builtin();
        store.save(&path).unwrap();

        let loaded = AnnotationStore::load(&path).unwrap();
        assert_eq!(loaded.default_dataset().name, "img1");
        assert_eq!(loaded.select("6cb.jpg").len(), 6);
        assert_eq!(loaded.select("nothing").len(), 28);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_default_is_rejected() {
        let json = r#"{"default": "nope", "datasets": []}"#;
        assert!(matches!(
            AnnotationStore::from_json(json),
            Err(StoreError::MissingDefault(_))
        ));
    }
}
