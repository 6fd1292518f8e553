// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentPreference {
    /// MAILBOX when offered, FIFO otherwise.
    #[default]
    Mailbox,
    /// Always FIFO (guaranteed by every surface).
    Fifo,
}

/// Knobs of the Vulkan backend. Everything has a default so a partial
/// `[render]` table is enough.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Enable VK_LAYER_KHRONOS_validation and route its output to tracing.
    pub validation: bool,
    pub present_mode: PresentPreference,
    pub clear_color: [f32; 4],
    pub light_count: usize,
    /// Fixed seed for light placement; random when absent.
    pub light_seed: Option<u64>,
    /// Persist the pipeline cache next to the working directory.
    pub pipeline_cache: bool,
    pub max_anisotropy: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            present_mode: PresentPreference::Mailbox,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            light_count: 200,
            light_seed: None,
            pipeline_cache: true,
            max_anisotropy: 16.0,
        }
    }
}

impl RendererConfig {
    /// Applies FPLUS_VALIDATION (0/1) and FPLUS_PRESENT_MODE (mailbox/fifo).
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup("FPLUS_VALIDATION").as_deref() {
            Some("1") => self.validation = true,
            Some("0") => self.validation = false,
            _ => {}
        }
        match lookup("FPLUS_PRESENT_MODE").as_deref() {
            Some(s) if s.eq_ignore_ascii_case("fifo") => self.present_mode = PresentPreference::Fifo,
            Some(s) if s.eq_ignore_ascii_case("mailbox") => {
                self.present_mode = PresentPreference::Mailbox
            }
            _ => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let cfg: RendererConfig = toml::from_str(
            r#"
            present_mode = "fifo"
            light_count = 64
            "#,
        )
        .unwrap();
        assert_eq!(cfg.present_mode, PresentPreference::Fifo);
        assert_eq!(cfg.light_count, 64);
        assert_eq!(cfg.max_anisotropy, 16.0);
        assert_eq!(cfg.light_seed, None);
    }

    #[test]
    fn overrides_win_over_file_values() {
        let cfg = RendererConfig {
            validation: true,
            ..Default::default()
        }
        .with_overrides(|k| match k {
            "FPLUS_VALIDATION" => Some("0".into()),
            "FPLUS_PRESENT_MODE" => Some("FIFO".into()),
            _ => None,
        });
        assert!(!cfg.validation);
        assert_eq!(cfg.present_mode, PresentPreference::Fifo);
    }

    #[test]
    fn unknown_override_values_are_ignored() {
        let cfg = RendererConfig::default().with_overrides(|_| Some("maybe".into()));
        assert_eq!(cfg, RendererConfig::default());
    }
}
