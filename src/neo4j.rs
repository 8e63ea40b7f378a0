//! Graph store backed by a Neo4j server.
//!
//! Every operation is a single parameterized Cypher statement; traversal and
//! similarity scoring (`apoc.text.jaroWinklerDistance`) run inside the
//! database.

use crate::database::{MovieStore, LISTING_LIMIT, RECOMMENDATION_LIMIT, SIMILARITY_THRESHOLD};
use crate::error::{Error, Result};
use crate::model::*;
use async_trait::async_trait;
use log::{debug, info, warn};
use neo4rs::{query, BoltNull, BoltType, Graph, Query, Row};
use std::sync::Arc;

const INDEXES: &[&str] = &[
    "CREATE INDEX user_name IF NOT EXISTS FOR (u:user) ON (u.Name)",
    "CREATE INDEX movie_title IF NOT EXISTS FOR (m:Movie) ON (m.title)",
    "CREATE INDEX genre_name IF NOT EXISTS FOR (g:Genre) ON (g.name)",
];

const FIND_USER: &str = "
MATCH (u:user {Name: $name})
RETURN u.Name AS name, u.password_hash AS password_hash, u.password AS password
LIMIT 1";

const ADD_HASHED_USER: &str = "
OPTIONAL MATCH (existing:user {Name: $name})
WITH existing WHERE existing IS NULL
CREATE (u:user {Name: $name, password_hash: $credential})
RETURN u.Name AS name";

const ADD_PLAINTEXT_USER: &str = "
OPTIONAL MATCH (existing:user {Name: $name})
WITH existing WHERE existing IS NULL
CREATE (u:user {Name: $name, password: $credential})
RETURN u.Name AS name";

const RECOMMEND: &str = "
MATCH (vu:user {Name: $user_name})-[:LIKES]->(cross_movie:Movie)<-[:LIKES]-(u:user),
      (u)-[:LIKES]->(other_movie:Movie)
WHERE NOT (vu)-[:LIKES]->(other_movie)
WITH other_movie, count(u) AS likes
RETURN other_movie.id AS id, other_movie.title AS title, other_movie.genres AS genres,
       other_movie.overview AS overview, other_movie.popularity AS popularity,
       other_movie.release_date AS release_date, likes
ORDER BY likes DESC, title
LIMIT $limit";

const SIMILAR: &str = "
MATCH (m1:Movie {title: $title})-[:HAS_GENRE]->(g:Genre)
WITH m1, m1.overview AS input_overview, collect(g.name) AS input_genres
MATCH (m2:Movie)-[:HAS_GENRE]->(g2:Genre)
WHERE m1 <> m2 AND m2.overview IS NOT NULL AND g2.name IN input_genres
WITH m2, input_overview, collect(DISTINCT g2.name) AS shared_genres,
     count(DISTINCT g2) AS shared_genres_count
WITH m2, shared_genres, shared_genres_count,
     apoc.text.jaroWinklerDistance(input_overview, m2.overview) AS similarity
WHERE similarity > $threshold
RETURN m2.title AS title, similarity, shared_genres_count, shared_genres
ORDER BY similarity DESC, shared_genres_count DESC, title
LIMIT $limit";

const LIKE: &str = "
MATCH (u:user {Name: $user_name}), (m:Movie {title: $title})
MERGE (u)-[:LIKES]->(m)
RETURN m.title AS title";

// Imported movies may carry their id as text or a float.
const ADD_MOVIE: &str = "
OPTIONAL MATCH (existing:Movie)
WITH coalesce(max(toInteger(existing.id)), 0) + 1 AS next_id
CREATE (m:Movie {
    id: next_id,
    title: $title,
    genres: $genres,
    overview: $overview,
    popularity: $popularity,
    release_date: $release_date
})
FOREACH (genre_name IN $genre_names |
    MERGE (g:Genre {name: genre_name})
    MERGE (m)-[:HAS_GENRE]->(g))
RETURN m.id AS id";

// A plain `DESC` puts nulls first in Neo4j. Movies without a popularity are
// listed last, matching the embedded store.
const SEARCH_MOVIES: &str = "
MATCH (m:Movie)
WHERE m.title CONTAINS $search_query
RETURN m.id AS id, m.title AS title, m.genres AS genres, m.overview AS overview,
       m.popularity AS popularity, m.release_date AS release_date
ORDER BY m.popularity IS NULL, m.popularity DESC";

const POPULAR_MOVIES: &str = "
MATCH (m:Movie)
RETURN m.id AS id, m.title AS title, m.genres AS genres, m.overview AS overview,
       m.popularity AS popularity, m.release_date AS release_date
ORDER BY m.popularity IS NULL, m.popularity DESC
LIMIT $limit";

pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password).await?;
        info!("connected to neo4j at {}", uri);
        let store = Self {
            graph: Arc::new(graph),
        };
        store.init_indexes().await;
        Ok(store)
    }

    async fn init_indexes(&self) {
        for index in INDEXES {
            if let Err(err) = self.graph.run(query(index)).await {
                warn!("could not create index: {}", err);
            }
        }
    }

    async fn rows(&self, q: Query) -> Result<Vec<Row>> {
        let mut result = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

fn nullable<T: Into<BoltType>>(value: Option<T>) -> BoltType {
    value.map_or(BoltType::Null(BoltNull), Into::into)
}

fn optional_string(row: &Row, key: &str) -> Option<String> {
    row.get::<Option<String>>(key).ok().flatten()
}

/// Genres are free text on older records and a list on imported ones.
fn genres_text(row: &Row) -> String {
    optional_string(row, "genres")
        .or_else(|| {
            row.get::<Vec<String>>("genres")
                .ok()
                .map(|genres| genres.join(", "))
        })
        .unwrap_or_default()
}

/// Popularity may have been stored as a float, an integer or form text.
fn popularity(row: &Row) -> Option<f64> {
    row.get::<Option<f64>>("popularity")
        .ok()
        .flatten()
        .or_else(|| {
            row.get::<Option<i64>>("popularity")
                .ok()
                .flatten()
                .map(|p| p as f64)
        })
        .or_else(|| optional_string(row, "popularity").and_then(|p| p.trim().parse().ok()))
}

/// Ids are integers on created movies and may be text or floats on imported ones.
fn movie_id(row: &Row) -> Option<i64> {
    row.get::<Option<i64>>("id")
        .ok()
        .flatten()
        .or_else(|| optional_string(row, "id").and_then(|id| id.trim().parse().ok()))
        .or_else(|| row.get::<Option<f64>>("id").ok().flatten().map(|id| id as i64))
}

fn movie_from_row(row: &Row) -> Movie {
    Movie {
        id: movie_id(row),
        title: optional_string(row, "title").unwrap_or_default(),
        genres: genres_text(row),
        overview: optional_string(row, "overview"),
        popularity: popularity(row),
        release_date: optional_string(row, "release_date"),
    }
}

#[async_trait]
impl MovieStore for Neo4jStore {
    async fn find_user(&self, name: &str) -> Result<Option<User>> {
        let rows = self.rows(query(FIND_USER).param("name", name)).await?;
        let row = match rows.first() {
            Some(row) => row,
            None => return Ok(None),
        };
        let credential = match (
            optional_string(row, "password_hash"),
            optional_string(row, "password"),
        ) {
            (Some(hash), _) => Credential::Hashed(hash),
            (None, Some(plaintext)) => Credential::Plaintext(plaintext),
            (None, None) => {
                debug!("user {} has no credential", name);
                return Ok(None);
            }
        };
        Ok(Some(User {
            name: row.get("name")?,
            credential,
        }))
    }

    async fn add_user(&self, user: &User) -> Result<bool> {
        let (statement, credential) = match &user.credential {
            Credential::Hashed(hash) => (ADD_HASHED_USER, hash),
            Credential::Plaintext(plaintext) => (ADD_PLAINTEXT_USER, plaintext),
        };
        let q = query(statement)
            .param("name", user.name.as_str())
            .param("credential", credential.as_str());
        Ok(!self.rows(q).await?.is_empty())
    }

    async fn recommend_for(&self, user_name: &str) -> Result<Vec<Recommendation>> {
        let q = query(RECOMMEND)
            .param("user_name", user_name)
            .param("limit", RECOMMENDATION_LIMIT as i64);
        self.rows(q)
            .await?
            .iter()
            .map(|row| -> Result<Recommendation> {
                Ok(Recommendation {
                    movie: movie_from_row(row),
                    likes: row.get("likes")?,
                })
            })
            .collect()
    }

    async fn similar_movies(&self, title: &str) -> Result<Vec<SimilarMovie>> {
        let q = query(SIMILAR)
            .param("title", title)
            .param("threshold", SIMILARITY_THRESHOLD)
            .param("limit", RECOMMENDATION_LIMIT as i64);
        self.rows(q)
            .await?
            .iter()
            .map(|row| -> Result<SimilarMovie> {
                let mut shared_genres: Vec<String> = row.get("shared_genres")?;
                shared_genres.sort();
                Ok(SimilarMovie {
                    title: optional_string(row, "title").unwrap_or_default(),
                    similarity: row.get("similarity")?,
                    shared_genres_count: row.get("shared_genres_count")?,
                    shared_genres,
                })
            })
            .collect()
    }

    async fn like_movie(&self, user_name: &str, title: &str) -> Result<Option<String>> {
        let q = query(LIKE)
            .param("user_name", user_name)
            .param("title", title);
        Ok(self
            .rows(q)
            .await?
            .first()
            .and_then(|row| optional_string(row, "title")))
    }

    async fn add_movie(&self, movie: NewMovie) -> Result<Movie> {
        let genre_names = movie.genre_names();
        let q = query(ADD_MOVIE)
            .param("title", movie.title.as_str())
            .param("genres", movie.genres.as_str())
            .param("overview", nullable(movie.overview.clone()))
            .param("popularity", nullable(movie.popularity))
            .param("release_date", nullable(movie.release_date.clone()))
            .param("genre_names", genre_names);
        let rows = self.rows(q).await?;
        let id = rows
            .first()
            .and_then(movie_id)
            .ok_or(Error::Corrupt("created movie id"))?;
        Ok(movie.with_id(id))
    }

    async fn list_movies(&self, search: Option<&str>) -> Result<Vec<Movie>> {
        let q = match search.filter(|s| !s.is_empty()) {
            Some(search) => query(SEARCH_MOVIES).param("search_query", search),
            None => query(POPULAR_MOVIES).param("limit", LISTING_LIMIT as i64),
        };
        Ok(self.rows(q).await?.iter().map(movie_from_row).collect())
    }
}
