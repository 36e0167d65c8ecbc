/// The core business logic of the server.
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::mpsc;
use futures::lock::Mutex;
use log::{debug, error};
use rand::thread_rng;
use serde::Deserialize;
use snafu::Snafu;

use crate::model::{Card, Deck, Player};
use crate::protocol::{CardsResponse, MessageResponse, PlayCardResponse, Request, Response};

/// The sender half for responses to a single client.
///
/// Sends are synchronous and best-effort: the table never waits on a peer,
/// and a dead channel only costs a log line.
pub type ResponseTx = mpsc::UnboundedSender<Response>;

/// The receiver half for responses to a single client.
pub type ResponseRx = mpsc::UnboundedReceiver<Response>;

pub struct Core {
    settings: Settings,
    next_connection: AtomicU64,
    table: Mutex<Table>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
pub struct Settings {
    /// How many seated players a game needs before it may start.
    pub min_players: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self { min_players: 4 }
    }
}

impl Core {
    /// Create a new core with an empty table.
    pub fn new(settings: Settings) -> Self {
        Core {
            settings,
            next_connection: AtomicU64::new(0),
            table: Mutex::new(Table::default()),
        }
    }

    /// Register a new connection with the core.
    ///
    /// The response channel should have a consumer that somehow delivers the
    /// responses to the client. In the actual server, this means serializing
    /// and writing each response to a WebSocket; in a test, the client holds
    /// the receiving half directly.
    ///
    /// The returned context provides the connection-handling task the means
    /// to execute incoming requests.
    pub async fn register(&self, response_tx: ResponseTx) -> Context<'_> {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::SeqCst));
        Context {
            core: self,
            id,
            response_tx,
        }
    }
}

/// An opaque identity for one connection.
///
/// Seats are authorized by connection identity, never by player name or by
/// the positional id that appears in broadcast events.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConnectionId(u64);

/// The handle by which a connection task drives the core.
pub struct Context<'core> {
    core: &'core Core,
    id: ConnectionId,
    response_tx: ResponseTx,
}

impl<'core> Context<'core> {
    /// Execute one request against the table.
    ///
    /// This does not return a value; everything the client learns about the
    /// outcome arrives through a response channel. Rule violations by a
    /// seated, in-game caller earn a point-to-point advisory; requests that
    /// look like transport noise are dropped with a debug log.
    pub async fn execute(&mut self, req: Request) {
        let result = match req {
            Request::Join(join) => {
                let mut table = self.core.table.lock().await;
                table.join(self.id, join.name, self.response_tx.clone())
            }
            Request::Start => {
                let mut table = self.core.table.lock().await;
                table.start(self.core.settings.min_players)
            }
            Request::PlayCard(play) => {
                let mut table = self.core.table.lock().await;
                table.play_card(self.id, play.card)
            }
            Request::Unknown => {
                debug!("ignoring unrecognized request from connection {:?}", self.id);
                return;
            }
        };

        if let Err(err) = result {
            if err.is_advisory() {
                self.reply(MessageResponse::new(err.to_string()).into());
            } else {
                debug!("dropping request from connection {:?}: {}", self.id, err);
            }
        }
    }

    /// Remove this connection's seat from the table, e.g. on disconnect.
    pub async fn cleanup(&mut self) {
        self.core.table.lock().await.leave(self.id);
    }

    fn reply(&mut self, response: Response) {
        if let Err(e) = self.response_tx.unbounded_send(response) {
            error!("while sending response to connection {:?}: {}", self.id, e);
        }
    }
}

/// A rejected table transition.
///
/// The display string of each advisory variant is exactly the notice sent
/// back to the offending client.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("Game already started. Please wait for the next game."))]
    GameInProgress,
    #[snafu(display("Cannot start game. Game already started."))]
    AlreadyStarted,
    #[snafu(display("Cannot start game. Not enough players."))]
    NotEnoughPlayers,
    #[snafu(display("It is not your turn."))]
    NotYourTurn,
    #[snafu(display("You do not have that card."))]
    CardNotInHand,
    #[snafu(display("game has not started"))]
    NotStarted,
    #[snafu(display("connection has no seat at the table"))]
    UnknownPlayer,
}

impl Error {
    /// Whether the offender is told about the rejection. `NotStarted` and
    /// `UnknownPlayer` are transport noise and stay silent.
    fn is_advisory(&self) -> bool {
        !matches!(self, Error::NotStarted | Error::UnknownPlayer)
    }
}

/// The one shared table.
///
/// Every transition happens behind `Core`'s mutex, so they are serialized:
/// turn order and hand integrity never see a half-applied mutation.
#[derive(Default)]
struct Table {
    started: bool,
    seats: Vec<Seat>,
    turn_index: usize,
    round_trick: Vec<Card>,
}

impl Table {
    /// Seat a new player. Allowed any time the game is not running; the
    /// whole table, joiner included, hears about it.
    fn join(&mut self, id: ConnectionId, name: String, tx: ResponseTx) -> Result<(), Error> {
        if self.started {
            return Err(Error::GameInProgress);
        }
        let notice = format!("{} joined the game", name);
        self.seats.push(Seat {
            id,
            player: Player { name },
            hand: Vec::new(),
            tx,
        });
        self.broadcast(MessageResponse::new(notice).into());
        Ok(())
    }

    /// Begin the game: fresh deck, shuffled, dealt in seat order.
    ///
    /// Each seat receives its own hand point-to-point before the public
    /// start and turn announcements go out. Seats past the end of the deck
    /// get an empty hand.
    fn start(&mut self, min_players: usize) -> Result<(), Error> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        if self.seats.len() < min_players {
            return Err(Error::NotEnoughPlayers);
        }

        let mut deck = Deck::standard();
        deck.shuffle(&mut thread_rng());
        let hands = deck.deal(self.seats.len());
        for (seat, hand) in self.seats.iter_mut().zip(hands) {
            seat.hand = hand;
            seat.send(
                CardsResponse {
                    cards: seat.hand.clone(),
                }
                .into(),
            );
        }

        self.started = true;
        self.turn_index = 0;
        self.broadcast(MessageResponse::new("Game started!").into());
        self.announce_turn();
        Ok(())
    }

    /// Play `card` on behalf of the caller's seat.
    ///
    /// The first exact rank+suit match leaves the hand and joins the round
    /// trick; nothing ever consumes the trick until reset. Every rejection
    /// leaves the table untouched.
    fn play_card(&mut self, id: ConnectionId, card: Card) -> Result<(), Error> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        let position = self.position_of(id).ok_or(Error::UnknownPlayer)?;
        if position != self.turn_index {
            return Err(Error::NotYourTurn);
        }

        let seat = &mut self.seats[position];
        let index = seat
            .hand
            .iter()
            .position(|c| *c == card)
            .ok_or(Error::CardNotInHand)?;
        let played = seat.hand.remove(index);
        self.round_trick.push(played);
        self.broadcast(
            PlayCardResponse {
                player_id: position,
                card: played,
            }
            .into(),
        );
        self.advance_turn();
        Ok(())
    }

    /// Remove the first seat bound to `id`, if any. Emptying the roster
    /// resets the table for the next game.
    fn leave(&mut self, id: ConnectionId) {
        if let Some(position) = self.position_of(id) {
            let seat = self.seats.remove(position);
            debug!("{} left the table", seat.player.name);
            if self.seats.is_empty() {
                self.reset();
            }
        }
    }

    /// Return to the waiting state. Idempotent; cannot fail.
    fn reset(&mut self) {
        self.started = false;
        self.turn_index = 0;
        self.round_trick.clear();
        self.broadcast(MessageResponse::new("All players disconnected. Game reset.").into());
    }

    fn advance_turn(&mut self) {
        self.turn_index = (self.turn_index + 1) % self.seats.len();
        self.announce_turn();
    }

    fn announce_turn(&mut self) {
        let notice = format!("Player {}'s turn", self.turn_index + 1);
        self.broadcast(MessageResponse::new(notice).into());
    }

    fn position_of(&self, id: ConnectionId) -> Option<usize> {
        self.seats.iter().position(|seat| seat.id == id)
    }

    /// Best-effort fan-out to every seat, regardless of game state.
    fn broadcast(&mut self, response: Response) {
        for seat in self.seats.iter_mut() {
            seat.send(response.clone());
        }
    }
}

/// One seated player, bound to the outbound channel of its connection.
struct Seat {
    id: ConnectionId,
    player: Player,
    hand: Vec<Card>,
    tx: ResponseTx,
}

impl Seat {
    fn send(&mut self, r: Response) {
        if let Err(e) = self.tx.unbounded_send(r) {
            error!("while sending response to {}: {}", self.player.name, e);
        }
    }
}
