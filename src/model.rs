use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Credential {
    Hashed(String),
    /// Records created before passwords were hashed.
    Plaintext(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub name: String,
    pub credential: Credential,
}

impl User {
    pub fn verify_password(&self, password: &str) -> Result<bool, bcrypt::BcryptError> {
        match &self.credential {
            Credential::Hashed(hash) => bcrypt::verify(password, hash),
            Credential::Plaintext(stored) => Ok(stored == password),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Movie {
    pub id: Option<i64>,
    pub title: String,
    pub genres: String,
    pub overview: Option<String>,
    pub popularity: Option<f64>,
    pub release_date: Option<String>,
}

/// A movie as submitted through the add form, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMovie {
    pub title: String,
    pub genres: String,
    pub overview: Option<String>,
    pub popularity: Option<f64>,
    pub release_date: Option<String>,
}

impl NewMovie {
    pub fn with_id(self, id: i64) -> Movie {
        Movie {
            id: Some(id),
            title: self.title,
            genres: self.genres,
            overview: self.overview,
            popularity: self.popularity,
            release_date: self.release_date,
        }
    }

    pub fn genre_names(&self) -> Vec<String> {
        split_genres(&self.genres)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Recommendation {
    #[serde(flatten)]
    pub movie: Movie,
    pub likes: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SimilarMovie {
    pub title: String,
    pub similarity: f64,
    pub shared_genres_count: i64,
    pub shared_genres: Vec<String>,
}

/// Splits a free-text genre field such as `"Horror, Thriller"` or
/// `"Horror|Mystery"` into distinct genre names, keeping first occurrence order.
pub fn split_genres(genres: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in genres.split(|c| c == ',' || c == '|').map(str::trim) {
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_credential() {
        let user = User {
            name: "admin".to_owned(),
            credential: Credential::Hashed(bcrypt::hash("password", 4).unwrap()),
        };
        assert!(user.verify_password("password").unwrap());
        assert!(!user.verify_password("Password").unwrap());
    }

    #[test]
    fn plaintext_credential() {
        let user = User {
            name: "legacy".to_owned(),
            credential: Credential::Plaintext("1234".to_owned()),
        };
        assert!(user.verify_password("1234").unwrap());
        assert!(!user.verify_password("12345").unwrap());
        assert!(!user.verify_password("").unwrap());
    }

    #[test]
    fn genres() {
        assert_eq!(split_genres("Horror, Thriller"), vec!["Horror", "Thriller"]);
        assert_eq!(
            split_genres(" Horror|Science Fiction ,,Horror "),
            vec!["Horror", "Science Fiction"]
        );
        assert!(split_genres(" , ").is_empty());
    }
}
