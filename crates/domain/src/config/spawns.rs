use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spawn coordinator configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnsConfig {
    /// Maximum child agents executing concurrently. Clamped to `1..=32`.
    #[serde(default = "d_max_parallel")]
    pub max_parallel: usize,
    /// Fallback per-spawn timeout when neither the request nor the
    /// delegation entry sets one. None = no timeout.
    #[serde(default)]
    pub default_timeout_minutes: Option<u64>,
    /// Turn cap for child turn loops. 0 = unbounded.
    #[serde(default = "d_child_max_turns")]
    pub child_max_turns: u32,
}

impl SpawnsConfig {
    /// Clamp `max_parallel` to the allowed range `1..=32`.
    pub fn clamped(&self) -> Self {
        Self {
            max_parallel: self.max_parallel.clamp(1, 32),
            ..self.clone()
        }
    }
}

impl Default for SpawnsConfig {
    fn default() -> Self {
        Self {
            max_parallel: d_max_parallel(),
            default_timeout_minutes: None,
            child_max_turns: d_child_max_turns(),
        }
    }
}

fn d_max_parallel() -> usize {
    4
}

fn d_child_max_turns() -> u32 {
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SpawnsConfig::default();
        assert_eq!(cfg.max_parallel, 4);
        assert_eq!(cfg.child_max_turns, 8);
        assert!(cfg.default_timeout_minutes.is_none());
    }

    #[test]
    fn clamp_bounds() {
        let cfg = SpawnsConfig {
            max_parallel: 0,
            ..Default::default()
        };
        assert_eq!(cfg.clamped().max_parallel, 1);
        let cfg = SpawnsConfig {
            max_parallel: 100,
            ..Default::default()
        };
        assert_eq!(cfg.clamped().max_parallel, 32);
    }
}
