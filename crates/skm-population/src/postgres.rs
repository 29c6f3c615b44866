// SPDX-License-Identifier: MIT OR Apache-2.0
//! The relational mirror of published rankings.

use sqlx::PgPool;
use tracing::{debug, warn};

use skm_knowledge::NestedRanking;

use crate::{PopulationError, Rankings};

/// Writes the nested ranking tree into `skill_set.skills`.
///
/// The row chain is
/// `github_user → github_account → role (type = 'contractor') → skill_set`;
/// the role id doubles as the skill-set id.
pub struct PostgresRankings {
    pool: PgPool,
}

impl PostgresRankings {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using a `postgres://` URL (typically `DATABASE_URL`).
    pub async fn connect(database_url: &str) -> Result<Self, PopulationError> {
        Ok(Self {
            pool: PgPool::connect(database_url).await?,
        })
    }

    /// Fold `rankings` into the nested tree and overwrite the user's skills.
    pub async fn publish(
        &self,
        username: &str,
        rankings: &Rankings,
        depth: usize,
    ) -> Result<(), PopulationError> {
        let mut nested = NestedRanking::new(depth);
        for (name, ranking) in rankings {
            if let Err(err) = nested.set(name, ranking) {
                warn!(name, error = %err, "dropping unprojectable ranking");
            }
        }
        let skills = nested.to_value().to_string();

        let github_user_id: i64 =
            sqlx::query_scalar("SELECT id FROM github_user WHERE login = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| PopulationError::MissingRow {
                    what: "github_user",
                    who: username.to_string(),
                })?;

        let user_id: i64 =
            sqlx::query_scalar("SELECT user_id FROM github_account WHERE github_user_id = $1")
                .bind(github_user_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| PopulationError::MissingRow {
                    what: "github_account",
                    who: username.to_string(),
                })?;

        let skill_set_id: i64 =
            sqlx::query_scalar("SELECT id FROM role WHERE user_id = $1 AND type = 'contractor'")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| PopulationError::MissingRow {
                    what: "contractor role",
                    who: username.to_string(),
                })?;

        sqlx::query("UPDATE skill_set SET skills = $1 WHERE id = $2")
            .bind(&skills)
            .bind(skill_set_id)
            .execute(&self.pool)
            .await?;

        debug!(username, skill_set_id, "rankings mirrored to database");
        Ok(())
    }
}
