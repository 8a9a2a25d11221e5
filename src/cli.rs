//! Command-line interface.
//!
//! `serve` (the default) runs the stdio conversation server; `seed` loads a
//! coach catalog from a JSON file so a fresh database has clients and
//! interventions to work with.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::storage::{Client, ClientIntervention, Coach, IncidentKind, Intervention, Storage};

/// SOS coaching conversation server.
#[derive(Parser, Debug)]
#[command(name = "sos-coach", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve JSON-RPC conversations over stdio
    Serve,

    /// Load coaches, clients and interventions from a JSON catalog
    Seed {
        /// Path to the catalog file
        catalog: PathBuf,
    },
}

impl Cli {
    /// The subcommand to run, `serve` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

/// Catalog file layout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCatalog {
    pub coaches: Vec<SeedCoach>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCoach {
    pub name: String,
    #[serde(default)]
    pub coaching_style: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub interventions: Vec<SeedIntervention>,
    #[serde(default)]
    pub clients: Vec<SeedClient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedIntervention {
    pub kind: IncidentKind,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub context_tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedClient {
    pub name: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub auth_user_id: Option<String>,
    /// Per-client tweaks, keyed by intervention name within the coach's catalog.
    #[serde(default)]
    pub overrides: Vec<SeedOverride>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedOverride {
    pub intervention: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_active() -> bool {
    true
}

/// Counts of rows written by a seed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub coaches: usize,
    pub clients: usize,
    pub interventions: usize,
    pub overrides: usize,
}

impl std::fmt::Display for SeedSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Seeded {} coaches, {} clients, {} interventions, {} client overrides",
            self.coaches, self.clients, self.interventions, self.overrides
        )
    }
}

/// Read and parse a catalog file.
pub fn load_catalog(path: &Path) -> AppResult<SeedCatalog> {
    let raw = std::fs::read_to_string(path).map_err(|e| AppError::Config {
        message: format!("Cannot read catalog {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&raw).map_err(|e| AppError::Config {
        message: format!("Invalid catalog {}: {}", path.display(), e),
    })
}

/// Check that every client override names an intervention of its own coach.
pub fn validate_catalog(catalog: &SeedCatalog) -> AppResult<()> {
    for coach in &catalog.coaches {
        let names: HashSet<String> = coach
            .interventions
            .iter()
            .map(|i| i.name.to_lowercase())
            .collect();
        for client in &coach.clients {
            if let Some(tweak) = client
                .overrides
                .iter()
                .find(|o| !names.contains(&o.intervention.to_lowercase()))
            {
                return Err(AppError::Config {
                    message: format!(
                        "Client {} overrides unknown intervention '{}'",
                        client.name, tweak.intervention
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Write every coach in `catalog` with their interventions and clients.
///
/// The whole catalog is validated first, so a bad override writes nothing.
pub async fn seed_catalog(storage: &dyn Storage, catalog: SeedCatalog) -> AppResult<SeedSummary> {
    validate_catalog(&catalog)?;
    let mut summary = SeedSummary::default();

    for seed in catalog.coaches {
        let mut coach = Coach::new(seed.name);
        coach.coaching_style = seed.coaching_style;
        coach.tone = seed.tone;
        storage.create_coach(&coach).await?;
        summary.coaches += 1;

        let mut by_name: HashMap<String, String> = HashMap::new();
        for item in seed.interventions {
            let mut intervention =
                Intervention::new(&coach.id, item.kind, item.name, item.description)
                    .with_tags(item.context_tags);
            intervention.category = item.category;
            storage.create_intervention(&intervention).await?;
            by_name.insert(intervention.name.to_lowercase(), intervention.id);
            summary.interventions += 1;
        }

        for seed_client in seed.clients {
            let mut client = Client::new(&coach.id, seed_client.name);
            client.access_token = seed_client.access_token;
            client.auth_user_id = seed_client.auth_user_id;
            storage.create_client(&client).await?;
            summary.clients += 1;

            for tweak in seed_client.overrides {
                let intervention_id = by_name
                    .get(&tweak.intervention.to_lowercase())
                    .ok_or_else(|| AppError::Config {
                        message: format!(
                            "Client {} overrides unknown intervention '{}'",
                            client.name, tweak.intervention
                        ),
                    })?;
                let mut row = ClientIntervention::new(&client.id, intervention_id);
                row.active = tweak.active;
                row.favorite = tweak.favorite;
                row.coach_notes = tweak.notes;
                storage.upsert_client_intervention(&row).await?;
                summary.overrides += 1;
            }
        }

        info!(coach_id = %coach.id, "Coach seeded");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const CATALOG: &str = r#"{
        "coaches": [{
            "name": "Dana",
            "tone": "warm",
            "interventions": [
                {"kind": "craving", "name": "Herbal tea", "description": "Brew a cup", "contextTags": ["home"]},
                {"kind": "energy", "name": "Stairs", "description": "Two flights", "category": "movement"}
            ],
            "clients": [{
                "name": "Sam",
                "accessToken": "tok",
                "overrides": [{"intervention": "herbal tea", "favorite": true}]
            }]
        }]
    }"#;

    #[test]
    fn test_cli_defaults_to_serve() {
        let cli = Cli::parse_from(["sos-coach"]);
        assert_eq!(cli.command(), Command::Serve);

        let cli = Cli::parse_from(["sos-coach", "seed", "catalog.json"]);
        assert_eq!(
            cli.command(),
            Command::Seed {
                catalog: PathBuf::from("catalog.json")
            }
        );
    }

    #[test]
    fn test_load_catalog_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let catalog = load_catalog(file.path()).unwrap();
        assert_eq!(catalog.coaches.len(), 1);
        assert_eq!(catalog.coaches[0].interventions[1].kind, IncidentKind::Energy);
        assert!(catalog.coaches[0].clients[0].overrides[0].active);
    }

    #[test]
    fn test_load_catalog_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"coaches\": 3}").unwrap();
        let err = load_catalog(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid catalog"));
    }

    #[tokio::test]
    async fn test_seed_catalog_writes_everything() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let catalog: SeedCatalog = serde_json::from_str(CATALOG).unwrap();
        let summary = seed_catalog(&storage, catalog).await.unwrap();
        assert_eq!(
            summary,
            SeedSummary {
                coaches: 1,
                clients: 1,
                interventions: 2,
                overrides: 1,
            }
        );

        let client = storage.find_client_by_token("tok").await.unwrap().unwrap();
        let coach = storage.get_coach(&client.coach_id).await.unwrap().unwrap();
        assert_eq!(coach.tone.as_deref(), Some("warm"));

        let cravings = storage
            .list_client_interventions(&client.id, IncidentKind::Craving, true)
            .await
            .unwrap();
        assert_eq!(cravings.len(), 1);
        assert!(cravings[0].favorite);
        assert_eq!(cravings[0].intervention.context_tags, vec!["home".to_string()]);
    }

    #[tokio::test]
    async fn test_seed_rejects_unknown_override() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let catalog: SeedCatalog = serde_json::from_str(
            r#"{"coaches": [{"name": "Dana", "clients": [{"name": "Sam", "overrides": [{"intervention": "Nap"}]}]}]}"#,
        )
        .unwrap();
        let err = seed_catalog(&storage, catalog).await.unwrap_err();
        assert!(err.to_string().contains("unknown intervention 'Nap'"));
    }

    #[tokio::test]
    async fn test_bad_override_writes_nothing() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let catalog: SeedCatalog = serde_json::from_str(
            r#"{"coaches": [
                {"name": "Dana", "clients": [{"name": "Sam", "accessToken": "tok"}]},
                {"name": "Lee",
                 "interventions": [{"kind": "craving", "name": "Tea", "description": "Brew"}],
                 "clients": [{"name": "Robin", "accessToken": "tok-2", "overrides": [{"intervention": "Coffee"}]}]}
            ]}"#,
        )
        .unwrap();

        let err = seed_catalog(&storage, catalog).await.unwrap_err();
        assert!(err.to_string().contains("Robin"));
        assert!(storage.find_client_by_token("tok").await.unwrap().is_none());
        assert!(storage.find_client_by_token("tok-2").await.unwrap().is_none());
    }

    #[test]
    fn test_validate_catalog_matches_names_per_coach() {
        let catalog: SeedCatalog = serde_json::from_str(CATALOG).unwrap();
        assert!(validate_catalog(&catalog).is_ok());

        // An intervention belonging to another coach does not count.
        let catalog: SeedCatalog = serde_json::from_str(
            r#"{"coaches": [
                {"name": "Dana", "interventions": [{"kind": "craving", "name": "Tea", "description": "Brew"}]},
                {"name": "Lee", "clients": [{"name": "Robin", "overrides": [{"intervention": "tea"}]}]}
            ]}"#,
        )
        .unwrap();
        assert!(validate_catalog(&catalog).is_err());
    }
}
