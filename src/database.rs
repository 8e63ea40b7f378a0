use crate::error::{Error, Result};
use crate::model::*;
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

pub const RECOMMENDATION_LIMIT: usize = 10;
pub const SIMILARITY_THRESHOLD: f64 = 0.2;
pub const LISTING_LIMIT: usize = 50;

/// The graph of users, movies and genres the web handlers query.
#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn find_user(&self, name: &str) -> Result<Option<User>>;

    /// Returns `false` if a user with that name already exists.
    async fn add_user(&self, user: &User) -> Result<bool>;

    /// Movies liked by users who share a liked movie with `user_name`,
    /// excluding the ones `user_name` already likes.
    async fn recommend_for(&self, user_name: &str) -> Result<Vec<Recommendation>>;

    /// Movies sharing a genre with `title`, ranked by overview similarity.
    async fn similar_movies(&self, title: &str) -> Result<Vec<SimilarMovie>>;

    /// Merges a LIKES edge and returns the liked title, or `None` if either
    /// the user or the movie does not exist.
    async fn like_movie(&self, user_name: &str, title: &str) -> Result<Option<String>>;

    async fn add_movie(&self, movie: NewMovie) -> Result<Movie>;

    async fn list_movies(&self, search: Option<&str>) -> Result<Vec<Movie>>;
}

/// Popularity descending, movies without one last.
pub fn by_popularity(a: &Movie, b: &Movie) -> Ordering {
    match (a.popularity, b.popularity) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

const USERS: &[u8] = b"users";
const MOVIES: &[u8] = b"movies";
const MOVIES_TITLE: &[u8] = b"movies_title";
const GENRES: &[u8] = b"genres";
const MOVIE_GENRES: &[u8] = b"movie_genres";
const GENRE_MOVIES: &[u8] = b"genre_movies";
const LIKES: &[u8] = b"likes";
const LIKED_BY: &[u8] = b"liked_by";
const META: &[u8] = b"meta";
const LAST_MOVIE_ID: &[u8] = b"last_movie_id";

// Big-endian so that keys sort by id.
fn serialize_id(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

fn deserialize_id(id: &[u8]) -> Result<i64> {
    id.try_into()
        .map(i64::from_be_bytes)
        .map_err(|_| Error::Corrupt("movie id"))
}

fn trailing_id(key: &[u8]) -> Result<i64> {
    let start = key
        .len()
        .checked_sub(8)
        .ok_or(Error::Corrupt("edge key"))?;
    deserialize_id(&key[start..])
}

/// `len(name) name id`, the layout of every name-to-movie edge key.
fn name_id_key(name: &str, id: i64) -> Vec<u8> {
    let mut key = name_prefix(name);
    key.extend_from_slice(&serialize_id(id));
    key
}

// Length-prefixed, so no name is a scan prefix of another.
fn name_prefix(name: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + name.len());
    prefix.extend_from_slice(&(name.len() as u32).to_be_bytes());
    prefix.extend_from_slice(name.as_bytes());
    prefix
}

fn id_name_key(id: i64, name: &str) -> Vec<u8> {
    let mut key = serialize_id(id).to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

fn increment(old: Option<&[u8]>) -> Option<Vec<u8>> {
    let last = old
        .and_then(|bytes| bytes.try_into().ok())
        .map(i64::from_be_bytes)
        .unwrap_or(0);
    Some(serialize_id(last + 1).to_vec())
}

fn storage_error(err: TransactionError<()>) -> Error {
    match err {
        TransactionError::Storage(e) => Error::Sled(e),
        TransactionError::Abort(()) => Error::Corrupt("aborted transaction"),
    }
}

trait GraphTrees {
    fn get_movie(&self, id: i64) -> Result<Option<Movie>>;
    fn movie_ids_by_title(&self, title: &str) -> Result<Vec<i64>>;
    fn liked_ids(&self, user_name: &str) -> Result<HashSet<i64>>;
    fn liked_by(&self, id: i64) -> Result<Vec<String>>;
    fn genres_of(&self, id: i64) -> Result<Vec<String>>;
    fn movies_in_genre(&self, genre: &str) -> Result<Vec<i64>>;
}

impl GraphTrees for sled::Db {
    fn get_movie(&self, id: i64) -> Result<Option<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        match movies.get(serialize_id(id))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn movie_ids_by_title(&self, title: &str) -> Result<Vec<i64>> {
        let titles = self.open_tree(MOVIES_TITLE)?;
        titles
            .scan_prefix(name_prefix(title))
            .keys()
            .map(|key| trailing_id(&key?))
            .collect()
    }

    fn liked_ids(&self, user_name: &str) -> Result<HashSet<i64>> {
        let likes = self.open_tree(LIKES)?;
        likes
            .scan_prefix(name_prefix(user_name))
            .keys()
            .map(|key| trailing_id(&key?))
            .collect()
    }

    fn liked_by(&self, id: i64) -> Result<Vec<String>> {
        let liked_by = self.open_tree(LIKED_BY)?;
        liked_by
            .scan_prefix(serialize_id(id))
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key[8..].to_vec()).map_err(|_| Error::Corrupt("user name"))
            })
            .collect()
    }

    fn genres_of(&self, id: i64) -> Result<Vec<String>> {
        let movie_genres = self.open_tree(MOVIE_GENRES)?;
        movie_genres
            .scan_prefix(serialize_id(id))
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key[8..].to_vec()).map_err(|_| Error::Corrupt("genre name"))
            })
            .collect()
    }

    fn movies_in_genre(&self, genre: &str) -> Result<Vec<i64>> {
        let genre_movies = self.open_tree(GENRE_MOVIES)?;
        genre_movies
            .scan_prefix(name_prefix(genre))
            .keys()
            .map(|key| trailing_id(&key?))
            .collect()
    }
}

#[async_trait]
impl MovieStore for sled::Db {
    async fn find_user(&self, name: &str) -> Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        match users.get(name)? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    async fn add_user(&self, user: &User) -> Result<bool> {
        let users = self.open_tree(USERS)?;
        let data = bincode::serialize(user)?;
        let swapped =
            users.compare_and_swap(user.name.as_bytes(), None as Option<&[u8]>, Some(data))?;
        Ok(swapped.is_ok())
    }

    async fn recommend_for(&self, user_name: &str) -> Result<Vec<Recommendation>> {
        let liked = self.liked_ids(user_name)?;
        // One count per (shared movie, other user) path, like a traversal would.
        let mut counts: HashMap<i64, i64> = HashMap::new();
        for &cross in &liked {
            for other_user in self.liked_by(cross)? {
                if other_user == user_name {
                    continue;
                }
                for other_movie in self.liked_ids(&other_user)? {
                    if !liked.contains(&other_movie) {
                        *counts.entry(other_movie).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut recommendations = Vec::with_capacity(counts.len());
        for (id, likes) in counts {
            if let Some(movie) = self.get_movie(id)? {
                recommendations.push(Recommendation { movie, likes });
            }
        }
        recommendations.sort_by(|a, b| {
            b.likes
                .cmp(&a.likes)
                .then_with(|| a.movie.title.cmp(&b.movie.title))
        });
        recommendations.truncate(RECOMMENDATION_LIMIT);
        Ok(recommendations)
    }

    async fn similar_movies(&self, title: &str) -> Result<Vec<SimilarMovie>> {
        let source_id = match self.movie_ids_by_title(title)?.first() {
            Some(&id) => id,
            None => return Ok(Vec::new()),
        };
        let source_overview = match self.get_movie(source_id)?.and_then(|m| m.overview) {
            Some(overview) => overview,
            None => return Ok(Vec::new()),
        };

        let mut shared: HashMap<i64, BTreeSet<String>> = HashMap::new();
        for genre in self.genres_of(source_id)? {
            for id in self.movies_in_genre(&genre)? {
                if id != source_id {
                    shared.entry(id).or_default().insert(genre.clone());
                }
            }
        }

        let mut similar = Vec::new();
        for (id, genres) in shared {
            let movie = match self.get_movie(id)? {
                Some(movie) => movie,
                None => continue,
            };
            let overview = match &movie.overview {
                Some(overview) => overview,
                None => continue,
            };
            let similarity = strsim::jaro_winkler(&source_overview, overview);
            if similarity > SIMILARITY_THRESHOLD {
                similar.push(SimilarMovie {
                    title: movie.title,
                    similarity,
                    shared_genres_count: genres.len() as i64,
                    shared_genres: genres.into_iter().collect(),
                });
            }
        }
        similar.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.shared_genres_count.cmp(&a.shared_genres_count))
                .then_with(|| a.title.cmp(&b.title))
        });
        similar.truncate(RECOMMENDATION_LIMIT);
        Ok(similar)
    }

    async fn like_movie(&self, user_name: &str, title: &str) -> Result<Option<String>> {
        let users = self.open_tree(USERS)?;
        if !users.contains_key(user_name)? {
            return Ok(None);
        }
        let ids = self.movie_ids_by_title(title)?;
        if ids.is_empty() {
            return Ok(None);
        }
        let likes = self.open_tree(LIKES)?;
        let liked_by = self.open_tree(LIKED_BY)?;
        for id in ids {
            let like_key = name_id_key(user_name, id);
            let liked_by_key = id_name_key(id, user_name);
            (&likes, &liked_by)
                .transaction(|(likes, liked_by)| {
                    likes.insert(like_key.as_slice(), &b""[..])?;
                    liked_by.insert(liked_by_key.as_slice(), &b""[..])?;
                    Ok::<_, ConflictableTransactionError<()>>(())
                })
                .map_err(storage_error)?;
        }
        Ok(Some(title.to_owned()))
    }

    async fn add_movie(&self, movie: NewMovie) -> Result<Movie> {
        let meta = self.open_tree(META)?;
        let id = meta
            .update_and_fetch(LAST_MOVIE_ID, increment)?
            .ok_or(Error::Corrupt("movie id counter"))?;
        let id = deserialize_id(&id)?;

        let genre_names = movie.genre_names();
        let movie = movie.with_id(id);
        let data = bincode::serialize(&movie)?;
        let title_key = name_id_key(&movie.title, id);

        let movies = self.open_tree(MOVIES)?;
        let titles = self.open_tree(MOVIES_TITLE)?;
        let genres = self.open_tree(GENRES)?;
        let movie_genres = self.open_tree(MOVIE_GENRES)?;
        let genre_movies = self.open_tree(GENRE_MOVIES)?;
        (&movies, &titles, &genres, &movie_genres, &genre_movies)
            .transaction(|(movies, titles, genres, movie_genres, genre_movies)| {
                movies.insert(&serialize_id(id)[..], data.as_slice())?;
                titles.insert(title_key.as_slice(), &b""[..])?;
                for genre in &genre_names {
                    genres.insert(genre.as_bytes(), &b""[..])?;
                    movie_genres.insert(id_name_key(id, genre), &b""[..])?;
                    genre_movies.insert(name_id_key(genre, id), &b""[..])?;
                }
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(storage_error)?;
        Ok(movie)
    }

    async fn list_movies(&self, search: Option<&str>) -> Result<Vec<Movie>> {
        let search = search.filter(|s| !s.is_empty());
        let movies_tree = self.open_tree(MOVIES)?;
        let mut movies = Vec::new();
        for data in movies_tree.iter().values() {
            let movie: Movie = bincode::deserialize(&data?)?;
            if search.map_or(true, |s| movie.title.contains(s)) {
                movies.push(movie);
            }
        }
        movies.sort_by(by_popularity);
        if search.is_none() {
            movies.truncate(LISTING_LIMIT);
        }
        Ok(movies)
    }
}
