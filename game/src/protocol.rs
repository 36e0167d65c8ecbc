use std::convert::From;

use serde::{Deserialize, Serialize};

use crate::model::{Card, Player};

/// Every possible kind of request that a client may send.
///
/// On the wire each request is one JSON object tagged by a `type` field,
/// e.g. `{"type":"join","name":"alice"}`. A request whose `type` is not
/// recognized deserializes to `Unknown`, which the server ignores; a frame
/// that is not valid JSON at all never reaches this enum.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    Join(JoinRequest),
    Start,
    PlayCard(PlayCardRequest),
    #[serde(other)]
    Unknown,
}

/// Every possible kind of response that the server may send.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Message(MessageResponse),
    Cards(CardsResponse),
    PlayCard(PlayCardResponse),
}

// Auxillary macro for converting inner request/response types into their
// outermost counterparts.

macro_rules! derive_from {
    ($to:ident, $ty:ident, $r:ident) => {
        impl From<$r> for $to {
            fn from(r: $r) -> Self {
                $to::$ty(r)
            }
        }
    };
}

/// Ask to be seated at the table under the given name.
///
/// Names are display-only: they are not required to be unique, and the
/// server never uses them to authorize anything.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct JoinRequest {
    pub name: String,
}

derive_from!(Request, Join, JoinRequest);

/// Attempt to play a card from the caller's hand.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlayCardRequest {
    pub card: Card,
}

derive_from!(Request, PlayCard, PlayCardRequest);

/// A free-text notice: join/start/turn/reset announcements when broadcast,
/// rule-violation advisories when sent point-to-point.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

derive_from!(Response, Message, MessageResponse);

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        MessageResponse {
            message: message.into(),
        }
    }
}

/// The hand dealt to one seat. Sent point-to-point, once per game start;
/// no other player ever sees it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CardsResponse {
    pub cards: Vec<Card>,
}

derive_from!(Response, Cards, CardsResponse);

/// A successfully played card, broadcast to the whole table.
///
/// `player_id` is the acting player's current position in the roster; it is
/// recomputed per event and shifts when earlier seats empty.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayCardResponse {
    pub player_id: usize,
    pub card: Card,
}

derive_from!(Response, PlayCard, PlayCardResponse);

impl From<Player> for JoinRequest {
    fn from(p: Player) -> Self {
        JoinRequest { name: p.name }
    }
}
