/// The model family a conversion run targets.
///
/// Hyperparameter keys are namespaced by `name` (e.g. `llama.block_count`),
/// and `name` is also what gets written as `general.architecture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Architecture {
    pub name: &'static str,
    /// Base of the human-readable `general.name`.
    pub display_name: &'static str,
}

impl Architecture {
    pub const LLAMA: Architecture = Architecture {
        name: "llama",
        display_name: "LLaMA",
    };

    /// Full metadata key for an architecture-scoped suffix.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}.{}", self.name, suffix)
    }

    /// Model name written to `general.name`. A 4096-token context marks the
    /// second generation of the family.
    pub fn model_name(&self, n_ctx: u32) -> String {
        if n_ctx == 4096 {
            format!("{} v2", self.display_name)
        } else {
            self.display_name.to_string()
        }
    }
}

impl Default for Architecture {
    fn default() -> Self {
        Architecture::LLAMA
    }
}
