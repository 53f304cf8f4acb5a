//! Prompt Pack Loader: read-only load of system and repair prompts
//! from a directory at startup. Prompts are opaque text — no template
//! interpolation happens here; the LLM provider handles assembly.

use std::path::Path;

#[derive(Debug, Clone)]
pub struct PromptPack {
    pub system: String,
    pub repair: String,
}

impl PromptPack {
    /// Reads `system.txt` and `repair.txt` from `dir`. Missing either file
    /// is a fatal startup error.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let system = std::fs::read_to_string(dir.join("system.txt"))
            .map_err(|e| anyhow::anyhow!("failed to read system.txt from {}: {e}", dir.display()))?;
        let repair = std::fs::read_to_string(dir.join("repair.txt"))
            .map_err(|e| anyhow::anyhow!("failed to read repair.txt from {}: {e}", dir.display()))?;
        Ok(Self { system, repair })
    }
}
