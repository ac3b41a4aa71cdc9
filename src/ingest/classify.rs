/// Label text classification
///
/// Annotators attach free-text Chinese labels to each box. The class is taken
/// from the first keyword of `PRIORITY_TABLE` found in the joined label text.
/// The table order is the tie-break rule when a label mentions several
/// keywords, and the priority decides which of two duplicate boxes survives.
use crate::region::GlomerulusClass;

/// Priority of a detection whose labels match no keyword
pub const DEFAULT_PRIORITY: u8 = 1;

/// (keyword, class, priority), checked top to bottom
pub const PRIORITY_TABLE: [(&str, GlomerulusClass, u8); 5] = [
    ("硬化", GlomerulusClass::Sclerotic, 10),
    ("新月体", GlomerulusClass::Crescents, 9),
    ("系膜", GlomerulusClass::Membranous, 8),
    ("固有", GlomerulusClass::Normal, 7),
    ("毛细血管", GlomerulusClass::Cellular, 5),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: GlomerulusClass,
    pub priority: u8,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            class: GlomerulusClass::Cellular,
            priority: DEFAULT_PRIORITY,
        }
    }
}

pub fn classify_labels<S: AsRef<str>>(labels: &[S]) -> Classification {
    let joined = labels
        .iter()
        .map(|l| l.as_ref())
        .collect::<Vec<_>>()
        .join(",");

    PRIORITY_TABLE
        .iter()
        .find(|(keyword, _, _)| joined.contains(keyword))
        .map(|&(_, class, priority)| Classification { class, priority })
        .unwrap_or_default()
}
