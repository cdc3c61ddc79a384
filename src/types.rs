//! Result types handed back to the host.

use serde::{Deserialize, Serialize};

/// One saved file, in the shape the host's image preview expects.
///
/// ```json
/// { "filename": "ComfyUI-euler-0001.webp", "subfolder": "sd_xl_base", "type": "output" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedImage {
    pub filename: String,
    /// Folder relative to the output root, `/`-separated, `""` for the root.
    pub subfolder: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl SavedImage {
    pub fn output(filename: impl Into<String>, subfolder: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind: "output".into(),
        }
    }
}
