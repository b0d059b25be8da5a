use std::{env, fs, path::PathBuf};

use profile_core::domain::{DemandFactorPolicy, Polarity, SiteScaling};
use serde::Deserialize;
use time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Fixed resampling interval; must divide a day evenly.
    pub interval_minutes: u32,
    /// Per-file budget for dropped rows before the file fails integrity.
    pub max_dropped_rows: usize,
    /// Where raw exports land for intake.
    pub dropbox_dir: PathBuf,
    /// Admitted files, sorted into per-month folders.
    pub data_root: PathBuf,
    /// Where sequence-failed files are moved.
    pub quarantine_dir: PathBuf,
    /// Merged per-site and system profiles.
    pub profile_dir: PathBuf,
    pub log_dir: PathBuf,
    pub hash_cache: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            max_dropped_rows: 3,
            dropbox_dir: PathBuf::from("dropbox/kw"),
            data_root: PathBuf::from("data/kw"),
            quarantine_dir: PathBuf::from("data/kw/error"),
            profile_dir: PathBuf::from("lp"),
            log_dir: PathBuf::from("logs"),
            hash_cache: PathBuf::from(".processed-hashes.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemandFactorChoice {
    SumOfMaxima,
    ScaledEstimate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub demand_factor: DemandFactorChoice,
    /// Scale applied to the peak when estimating connected load:
    /// commercial 1.1–1.2, residential 1.2–1.3, lighting 1.5–2.0.
    pub connected_load_scale: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            demand_factor: DemandFactorChoice::SumOfMaxima,
            connected_load_scale: 1.2,
        }
    }
}

/// One metered site in the register-export fleet. Files are matched to a
/// site when the lowercased file name contains `name`.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub meter_id: String,
    /// CT/PT multiplier applied to raw register values.
    pub multiplier: f64,
    #[serde(default)]
    pub polarity: Polarity,
}

impl SiteConfig {
    pub fn scaling(&self) -> SiteScaling {
        SiteScaling {
            multiplier: self.multiplier,
            polarity: self.polarity,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub analysis: AnalysisConfig,
    pub sites: Vec<SiteConfig>,
}

impl AppConfig {
    /// Load from the file named by `PROFILE_CONFIG`, else from
    /// `profile-config.toml` when present, else defaults. An explicitly
    /// named file that is missing or malformed is an error; falling back
    /// silently would mask a misconfigured deployment.
    pub fn load() -> anyhow::Result<Self> {
        match env::var("PROFILE_CONFIG") {
            Ok(path) => Self::load_from(&PathBuf::from(path)),
            Err(_) => {
                let default_path = PathBuf::from("profile-config.toml");
                if default_path.exists() {
                    Self::load_from(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.ingest.interval_minutes))
    }

    pub fn demand_factor_policy(&self) -> DemandFactorPolicy {
        match self.analysis.demand_factor {
            DemandFactorChoice::SumOfMaxima => DemandFactorPolicy::SumOfMaxima,
            DemandFactorChoice::ScaledEstimate => DemandFactorPolicy::ScaledEstimate {
                scale: self.analysis.connected_load_scale,
            },
        }
    }

    /// The site whose name appears in the file name, if any.
    pub fn site_for_file(&self, file_name: &str) -> Option<&SiteConfig> {
        let lower = file_name.to_lowercase();
        self.sites.iter().find(|s| lower.contains(&s.name.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_a_configless_run() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.ingest.interval_minutes, 15);
        assert_eq!(cfg.ingest.max_dropped_rows, 3);
        assert!(cfg.sites.is_empty());
        assert!(matches!(
            cfg.demand_factor_policy(),
            DemandFactorPolicy::SumOfMaxima
        ));
    }

    #[test]
    fn toml_round_trip_with_sites_and_policy() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [ingest]
            interval_minutes = 30
            data_root = "data/reads"

            [analysis]
            demand_factor = "scaled-estimate"
            connected_load_scale = 1.5

            [[sites]]
            name = "north"
            meter_id = "85400796"
            multiplier = 160.0

            [[sites]]
            name = "gen"
            meter_id = "85400801"
            multiplier = 160.0
            polarity = "generation"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.ingest.interval_minutes, 30);
        // Unset fields keep their defaults.
        assert_eq!(cfg.ingest.max_dropped_rows, 3);
        assert_eq!(cfg.sites.len(), 2);
        assert_eq!(cfg.sites[1].polarity, Polarity::Generation);
        assert!(matches!(
            cfg.demand_factor_policy(),
            DemandFactorPolicy::ScaledEstimate { scale } if scale == 1.5
        ));
    }

    #[test]
    fn site_matching_is_case_insensitive_substring() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [[sites]]
            name = "north"
            meter_id = "1"
            multiplier = 1.0
            "#,
        )
        .unwrap();

        assert!(cfg.site_for_file("North_2024-01_0101.csv").is_some());
        assert!(cfg.site_for_file("south_2024-01.csv").is_none());
    }
}
