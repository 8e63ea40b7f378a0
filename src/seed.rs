use crate::database::MovieStore;
use crate::error::Result;
use crate::model::*;
use log::info;

const MOVIES: &[(&str, &str, &str, f64, &str)] = &[
    (
        "The Shining",
        "Horror, Thriller",
        "A family heads to an isolated hotel for the winter where a sinister presence influences the father into violence.",
        19.6,
        "1980-05-23",
    ),
    (
        "Halloween",
        "Horror, Thriller",
        "Fifteen years after murdering his sister on Halloween night, Michael Myers escapes from a mental hospital and returns to his hometown.",
        31.2,
        "1978-10-24",
    ),
    (
        "Alien",
        "Horror, Science Fiction",
        "The crew of a commercial spacecraft encounters a deadly lifeform after investigating a distress call from an alien vessel.",
        33.9,
        "1979-05-25",
    ),
    (
        "The Thing",
        "Horror, Mystery, Science Fiction",
        "A research team in Antarctica is hunted by a shape-shifting alien that assumes the appearance of its victims.",
        28.4,
        "1982-06-25",
    ),
    (
        "Scream",
        "Horror, Mystery",
        "A year after the murder of her mother, a teenage girl is terrorized by a masked killer who targets her and her friends.",
        25.0,
        "1996-12-20",
    ),
    (
        "Get Out",
        "Horror, Mystery, Thriller",
        "A young man visits his girlfriend's family estate, where his uneasiness about their reception of him eventually reaches a boiling point.",
        22.7,
        "2017-02-24",
    ),
];

const LIKES: &[(&str, &str)] = &[
    ("admin", "The Shining"),
    ("foo", "The Shining"),
    ("foo", "Alien"),
    ("foo", "Scream"),
    ("bar", "Alien"),
    ("bar", "The Thing"),
];

/// Fills a store that has no `admin` user yet with a few users, movies and likes.
pub async fn seed_demo(store: &dyn MovieStore, bcrypt_cost: u32) -> Result<()> {
    if store.find_user("admin").await?.is_some() {
        info!("store already seeded");
        return Ok(());
    }
    let users = [
        User {
            name: "admin".to_owned(),
            credential: Credential::Hashed(bcrypt::hash("password", bcrypt_cost)?),
        },
        User {
            name: "foo".to_owned(),
            credential: Credential::Hashed(bcrypt::hash("1234", bcrypt_cost)?),
        },
        User {
            name: "bar".to_owned(),
            credential: Credential::Plaintext("bar".to_owned()),
        },
    ];
    for user in &users {
        store.add_user(user).await?;
    }
    for &(title, genres, overview, popularity, release_date) in MOVIES {
        store
            .add_movie(NewMovie {
                title: title.to_owned(),
                genres: genres.to_owned(),
                overview: Some(overview.to_owned()),
                popularity: Some(popularity),
                release_date: Some(release_date.to_owned()),
            })
            .await?;
    }
    for &(user, title) in LIKES {
        store.like_movie(user, title).await?;
    }
    info!(
        "seeded {} users, {} movies and {} likes",
        users.len(),
        MOVIES.len(),
        LIKES.len()
    );
    Ok(())
}
