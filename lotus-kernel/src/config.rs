//! Emulator configuration consumed by the HLE kernel.

use lotus_abi::layout::FCRAM_SIZE;

/// Tunables fixed at system construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of emulated CPU cores, each with a private thread manager.
    pub core_count: usize,
    /// FCRAM size in bytes.
    pub fcram_size: u32,
    /// Ticks added to the core timer on every `GetSystemTick`, to defeat
    /// guest busy-wait loops that poll the tick counter.
    pub tick_advance: u64,
    /// Build-identity strings reported by the emulator-information queries.
    pub build_name: String,
    pub build_version: String,
    pub build_date: String,
    pub scm_branch: String,
    pub scm_desc: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            core_count: 4,
            fcram_size: FCRAM_SIZE,
            tick_advance: 150,
            build_name: "lotus".into(),
            build_version: env!("CARGO_PKG_VERSION").into(),
            build_date: "unknown".into(),
            scm_branch: "unknown".into(),
            scm_desc: "unknown".into(),
        }
    }
}
