//! One-shot messages kept in the session until the next rendered page.

use actix_session::Session;
use log::debug;
use serde::{Deserialize, Serialize};

const FLASHES: &str = "_flashes";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Danger,
    Info,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Flash {
    pub level: Level,
    pub message: String,
}

fn pending(session: &Session) -> Vec<Flash> {
    session
        .get::<Vec<Flash>>(FLASHES)
        .unwrap_or_else(|err| {
            debug!("dropping unreadable flashes: {:?}", err);
            None
        })
        .unwrap_or_default()
}

pub fn flash<S: Into<String>>(session: &Session, level: Level, message: S) {
    let mut flashes = pending(session);
    flashes.push(Flash {
        level,
        message: message.into(),
    });
    if let Err(err) = session.insert(FLASHES, flashes) {
        debug!("could not store flash: {:?}", err);
    }
}

/// Returns and forgets every pending message.
pub fn take(session: &Session) -> Vec<Flash> {
    let flashes = pending(session);
    session.remove(FLASHES);
    flashes
}
