// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blob-store population: user knowledge objects and leaderboard markers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use skm_knowledge::{Knowledge, KnowledgeConfig, NormalizedKnowledge, Ranking};

use crate::store::ObjectStore;
use crate::{PopulationError, Rankings};

/// The persisted `users/<username>` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKnowledge {
    /// Opaque hash of the scanned user, if known.
    pub user_hash: Option<String>,
    /// Knowledge layout version the record was written at.
    pub version: String,
    /// The published score vector.
    pub knowledge: NormalizedKnowledge,
}

/// The population surface the orchestrator publishes into.
#[async_trait]
pub trait Population: Send + Sync {
    /// Whether a user record exists at the given layout version.
    async fn user_knowledge_exists(
        &self,
        username: &str,
        version: &str,
    ) -> Result<bool, PopulationError>;

    /// Normalize and publish a user's knowledge and leaderboard markers.
    async fn add_user_knowledge(
        &self,
        username: &str,
        knowledge: &Knowledge,
    ) -> Result<(), PopulationError>;

    /// Load a previously published user record.
    async fn get_user_knowledge(
        &self,
        username: &str,
    ) -> Result<Option<StoredKnowledge>, PopulationError>;

    /// Rank every published name of `knowledge` against the population.
    async fn calculate_rankings(
        &self,
        knowledge: &NormalizedKnowledge,
    ) -> Result<Rankings, PopulationError>;
}

/// Population over any [`ObjectStore`].
///
/// Key layout: `users/<username>` holds the JSON record; each published name
/// additionally owns a zero-byte marker
/// `leaderboard/<comp>/.../<username>:<score:.2>` so ranking is one prefix
/// listing.
pub struct BlobPopulation<S> {
    store: S,
    config: KnowledgeConfig,
}

impl<S: ObjectStore> BlobPopulation<S> {
    /// A population in `store` normalizing at `config.depth`.
    pub fn new(store: S, config: KnowledgeConfig) -> Self {
        Self { store, config }
    }

    /// The normalization settings this population publishes at.
    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    fn user_key(username: &str) -> String {
        format!("users/{username}")
    }

    fn leaderboard_prefix(dotted_name: &str) -> String {
        let mut prefix = String::from("leaderboard");
        for component in dotted_name.split('.') {
            prefix.push('/');
            prefix.push_str(component);
        }
        prefix.push('/');
        prefix
    }

    /// Rank one score against the markers stored under a dotted name.
    pub async fn ranking_for(
        &self,
        dotted_name: &str,
        score: f64,
    ) -> Result<Ranking, PopulationError> {
        let prefix = Self::leaderboard_prefix(dotted_name);
        let mut scores = Vec::new();
        for key in self.store.list(&prefix).await? {
            match key.rsplit_once(':').and_then(|(_, raw)| raw.parse::<f64>().ok()) {
                Some(stored) => scores.push(stored),
                None => warn!(key, "ignoring malformed leaderboard marker"),
            }
        }
        Ok(Ranking::new(&scores, score))
    }
}

#[async_trait]
impl<S: ObjectStore> Population for BlobPopulation<S> {
    async fn user_knowledge_exists(
        &self,
        username: &str,
        version: &str,
    ) -> Result<bool, PopulationError> {
        Ok(self
            .get_user_knowledge(username)
            .await?
            .map(|stored| stored.version == version)
            .unwrap_or(false))
    }

    async fn add_user_knowledge(
        &self,
        username: &str,
        knowledge: &Knowledge,
    ) -> Result<(), PopulationError> {
        let normalized = knowledge.normalize_today(&self.config);
        debug!(username, names = normalized.len(), "publishing knowledge");

        let record = StoredKnowledge {
            user_hash: knowledge.user_hash().map(str::to_string),
            version: knowledge.version().to_string(),
            knowledge: normalized.clone(),
        };
        let user_key = Self::user_key(username);
        let body = serde_json::to_vec(&record).map_err(|source| PopulationError::Malformed {
            key: user_key.clone(),
            source,
        })?;
        let user_etag = self.store.put(&user_key, body).await?;
        let mut written = vec![(user_key, user_etag)];

        for (name, score) in normalized.iter() {
            let user_prefix = format!("{}{username}", Self::leaderboard_prefix(name));
            for stale in self.store.list(&user_prefix).await? {
                self.store.delete(&stale).await?;
            }
            let marker = format!("{user_prefix}:{score:.2}");
            let etag = self.store.put(&marker, Vec::new()).await?;
            written.push((marker, etag));
        }

        for (key, etag) in written {
            self.store.wait_until_exists(&key, &etag).await?;
        }
        Ok(())
    }

    async fn get_user_knowledge(
        &self,
        username: &str,
    ) -> Result<Option<StoredKnowledge>, PopulationError> {
        let key = Self::user_key(username);
        match self.store.get(&key).await? {
            Some(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|source| PopulationError::Malformed { key, source }),
            None => Ok(None),
        }
    }

    async fn calculate_rankings(
        &self,
        knowledge: &NormalizedKnowledge,
    ) -> Result<Rankings, PopulationError> {
        let mut rankings = Rankings::new();
        for (name, score) in knowledge.iter() {
            rankings.insert(name.to_string(), self.ranking_for(name, score).await?);
        }
        Ok(rankings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn knowledge_with(parts: &[&str], count: u32) -> Knowledge {
        let mut knowledge = Knowledge::with_user_hash("hash-1");
        let parts: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        knowledge.add(&parts, Utc::now().date_naive(), count);
        knowledge
    }

    fn population() -> BlobPopulation<MemoryStore> {
        BlobPopulation::new(MemoryStore::new(), KnowledgeConfig::default())
    }

    #[tokio::test]
    async fn publish_writes_user_record_and_markers() {
        let population = population();
        let knowledge = knowledge_with(&["python", "socket", "recv"], 10);
        population
            .add_user_knowledge("octocat", &knowledge)
            .await
            .unwrap();

        let stored = population
            .get_user_knowledge("octocat")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, knowledge.version());
        assert_eq!(stored.user_hash.as_deref(), Some("hash-1"));
        assert!(stored.knowledge.get("python.socket").is_some());

        let markers = population
            .store
            .list("leaderboard/python/socket/")
            .await
            .unwrap();
        assert_eq!(markers.len(), 1);
        assert!(markers[0].starts_with("leaderboard/python/socket/octocat:"));
        let overall = population
            .store
            .list("leaderboard/python/__overall__/")
            .await
            .unwrap();
        assert_eq!(overall.len(), 1);
    }

    #[tokio::test]
    async fn republishing_replaces_stale_markers() {
        let population = population();
        population
            .add_user_knowledge("octocat", &knowledge_with(&["python", "socket"], 200))
            .await
            .unwrap();
        let before = population
            .store
            .list("leaderboard/python/socket/")
            .await
            .unwrap();

        population
            .add_user_knowledge("octocat", &knowledge_with(&["python", "socket"], 1))
            .await
            .unwrap();
        let after = population
            .store
            .list("leaderboard/python/socket/")
            .await
            .unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 1);
        assert_ne!(before[0], after[0]);
    }

    #[tokio::test]
    async fn existence_is_version_gated() {
        let population = population();
        let knowledge = knowledge_with(&["python", "socket"], 5);
        assert!(
            !population
                .user_knowledge_exists("octocat", knowledge.version())
                .await
                .unwrap()
        );
        population
            .add_user_knowledge("octocat", &knowledge)
            .await
            .unwrap();
        assert!(
            population
                .user_knowledge_exists("octocat", knowledge.version())
                .await
                .unwrap()
        );
        assert!(
            !population
                .user_knowledge_exists("octocat", "some-other-version")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn ranking_reads_the_marker_population() {
        let population = population();
        for (user, score) in [("a", 0.1), ("b", 0.5), ("c", 0.7), ("d", 1.0)] {
            population
                .store
                .put(
                    &format!("leaderboard/python/socket/{user}:{score:.2}"),
                    Vec::new(),
                )
                .await
                .unwrap();
        }

        let ranking = population.ranking_for("python.socket", 0.6).await.unwrap();
        assert_eq!(ranking.rank, 2);
        assert_eq!(ranking.population, 4);
        assert_eq!(ranking.relevance, 2);
    }
}
